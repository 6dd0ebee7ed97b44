// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Time primitives for the transport.
//!
//! The host supplies the clock (§ external interfaces); the core only ever
//! compares and offsets [`Timestamp`]s, it never reads wall time itself.

use core::{fmt, num::NonZeroU64, ops::Add, time::Duration};

/// An absolute, monotonic point in time, measured in microseconds from the
/// clock's epoch.
///
/// The absolute value is opaque: it is not related to any calendar time and
/// only comparable against timestamps from the same clock. The internal
/// representation can never be zero, so `Option<Timestamp>` is pointer-sized.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NonZeroU64);

impl Timestamp {
    /// Creates a `Timestamp` at the given `Duration` past the clock's epoch
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        let micros = duration.as_micros();
        debug_assert!(micros <= u64::MAX as u128);
        // a zero duration rounds up to 1us past the epoch
        let micros = NonZeroU64::new(micros as u64).unwrap_or(NonZeroU64::MIN);
        Self(micros)
    }

    /// Converts the `Timestamp` into the `Duration` since the clock's epoch
    #[inline]
    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.0.get())
    }

    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_add(duration)
            .map(Self::from_duration)
    }

    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_sub(duration)
            .map(Self::from_duration)
    }

    /// Returns the `Duration` elapsed since an earlier `Timestamp`, or zero
    /// if `earlier` is actually later
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.as_duration().saturating_sub(earlier.as_duration())
    }

    /// Returns true if this timestamp is at or before `deadline`
    #[inline]
    pub fn has_elapsed(self, deadline: Timestamp) -> bool {
        self >= deadline
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    #[track_caller]
    fn add(self, duration: Duration) -> Self {
        self.checked_add(duration).expect("timestamp overflow")
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.as_duration())
    }
}

/// A monotonic time source supplied by the host
pub trait Clock {
    fn now(&self) -> Timestamp;
}

impl<T: Clock> Clock for &T {
    #[inline]
    fn now(&self) -> Timestamp {
        (*self).now()
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use core::cell::Cell;

    /// A manually-advanced clock for tests
    #[derive(Debug)]
    pub struct Clock {
        now: Cell<Timestamp>,
    }

    impl Default for Clock {
        fn default() -> Self {
            Self {
                now: Cell::new(Timestamp::from_duration(Duration::from_millis(1))),
            }
        }
    }

    impl Clock {
        pub fn inc_by(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }
    }

    impl super::Clock for Clock {
        fn now(&self) -> Timestamp {
            self.now.get()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_arithmetic() {
        let a = Timestamp::from_duration(Duration::from_millis(10));
        let b = a + Duration::from_millis(5);
        assert!(b > a);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(5));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
        assert!(b.has_elapsed(a));
        assert!(!a.has_elapsed(b));
    }

    #[test]
    fn zero_duration_rounds_up() {
        let epoch = Timestamp::from_duration(Duration::ZERO);
        assert_eq!(epoch.as_duration(), Duration::from_micros(1));
    }
}
