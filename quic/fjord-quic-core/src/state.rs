// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Small macros for enum-backed state machines with exhaustive transition
//! tables. Invalid transitions are values, not panics, so protocol handlers
//! can map them onto wire errors.

use core::fmt;

pub type Result<T> = core::result::Result<(), Error<T>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error<T> {
    pub current: T,
    pub event: &'static str,
}

impl<T: fmt::Debug> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid event {:?} for state {:?}",
            self.event, self.current
        )
    }
}

#[cfg(feature = "std")]
impl<T: fmt::Debug> std::error::Error for Error<T> {}

/// Generates transition methods from a table of `event(From | From => To)`
/// rules. Each method mutates the state in place on a valid transition and
/// returns a [`state::Error`](Error) otherwise.
#[macro_export]
macro_rules! __state_event__ {
    ($(
        $(#[doc = $doc:literal])*
        $event:ident (
            $( $($valid:ident)|+ => $target:ident ),+
            $(,)?
        );
    )*) => {
        $(
            $(#[doc = $doc])*
            #[inline]
            pub fn $event(&mut self) -> $crate::state::Result<Self> {
                match self {
                    $(
                        $(Self::$valid)|+ => {
                            *self = Self::$target;
                            Ok(())
                        }
                    )+
                    other => Err($crate::state::Error {
                        current: other.clone(),
                        event: stringify!($event),
                    }),
                }
            }
        )*
    };
}

pub use crate::__state_event__ as event;

/// Generates a `fn is_*(&self) -> bool` predicate over one or more states
#[macro_export]
macro_rules! __state_is__ {
    ($(#[doc = $doc:literal])* $function:ident, $($state:ident)|+) => {
        $(
            #[doc = $doc]
        )*
        #[inline]
        pub fn $function(&self) -> bool {
            matches!(self, $(Self::$state)|+)
        }
    };
}

pub use crate::__state_is__ as is;

#[cfg(test)]
mod tests {
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    enum Light {
        #[default]
        Red,
        Green,
        Yellow,
    }

    impl Light {
        crate::state::event! {
            on_go(Red => Green);
            on_slow(Green => Yellow);
            on_stop(Yellow | Green => Red);
        }

        crate::state::is!(is_stopped, Red);
    }

    #[test]
    fn transitions() {
        let mut light = Light::default();
        assert!(light.is_stopped());
        light.on_go().unwrap();
        assert_eq!(light, Light::Green);
        light.on_stop().unwrap();
        assert!(light.is_stopped());

        let error = light.on_slow().unwrap_err();
        assert_eq!(error.current, Light::Red);
        assert_eq!(error.event, "on_slow");
    }
}
