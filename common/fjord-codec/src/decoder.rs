// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Panic-free, slice-based decoding.
//!
//! A [`DecoderBuffer`] is a cursor over a byte slice. Every operation
//! consumes the buffer by value and returns the remaining view, which makes
//! it impossible to read the same bytes twice by accident:
//!
//! ```
//! # use fjord_codec::*;
//! let data = [0, 1, 2, 3];
//! let buffer = DecoderBuffer::new(&data);
//! let (value, buffer) = buffer.decode::<u16>().unwrap();
//! assert_eq!(value, 1);
//! assert_eq!(buffer.len(), 2);
//! ```

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;
pub type DecoderBufferMutResult<'a, T> = Result<(T, DecoderBufferMut<'a>), DecoderError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer ran out of bytes while `usize` more were needed
    UnexpectedEof(usize),
    /// The buffer contained bytes after the value ended
    UnexpectedBytes(usize),
    /// A length prefix exceeded what the platform's `usize` can address
    LengthCapacityExceeded,
    /// The bytes decoded but violated an invariant of the value
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            Self::UnexpectedBytes(len) => write!(f, "unexpected bytes: {len}"),
            Self::LengthCapacityExceeded => {
                write!(f, "length could not be represented in platform's usize type")
            }
            Self::InvariantViolation(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

impl From<DecoderError> for &'static str {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::UnexpectedEof(_) => "unexpected eof",
            DecoderError::UnexpectedBytes(_) => "unexpected bytes",
            DecoderError::LengthCapacityExceeded => {
                "length could not be represented in platform's usize type"
            }
            DecoderError::InvariantViolation(msg) => msg,
        }
    }
}

/// Returns a [`DecoderError::InvariantViolation`] unless the expression holds
#[macro_export]
macro_rules! decoder_invariant {
    ($expr:expr, $invariant:expr) => {
        if !($expr) {
            return ::core::result::Result::Err(
                $crate::decoder::DecoderError::InvariantViolation($invariant).into(),
            );
        }
    };
}

/// A value which can be decoded from an immutable buffer
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// A value which can be decoded from a mutable buffer
pub trait DecoderValueMut<'a>: Sized {
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self>;
}

/// A value whose decoding depends on a previously-decoded parameter,
/// e.g. a frame body parameterized by its tag.
pub trait DecoderParameterizedValue<'a>: Sized {
    type Parameter;

    fn decode_parameterized(
        parameter: Self::Parameter,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self>;
}

pub trait DecoderParameterizedValueMut<'a>: Sized {
    type Parameter;

    fn decode_parameterized_mut(
        parameter: Self::Parameter,
        buffer: DecoderBufferMut<'a>,
    ) -> DecoderBufferMutResult<'a, Self>;
}

/// Implements [`DecoderValue`] and [`DecoderValueMut`] with a single body
#[macro_export]
macro_rules! decoder_value {
    (impl<$lt:lifetime $(, $generic:ident)*> $ty:ty {
        fn decode($buffer:ident: Buffer) -> Result<$ret:ty> $impl:block
    }) => {
        impl<$lt $(, $generic: $crate::DecoderValue<$lt>)*> $crate::DecoderValue<$lt> for $ty {
            #[inline]
            fn decode($buffer: $crate::DecoderBuffer<$lt>) -> $crate::DecoderBufferResult<$lt, $ret> $impl
        }

        impl<$lt $(, $generic: $crate::DecoderValueMut<$lt>)*> $crate::DecoderValueMut<$lt> for $ty {
            #[inline]
            fn decode_mut($buffer: $crate::DecoderBufferMut<$lt>) -> $crate::DecoderBufferMutResult<$lt, $ret> $impl
        }
    };
}

/// Implements [`DecoderParameterizedValue`] and [`DecoderParameterizedValueMut`]
/// with a single body
#[macro_export]
macro_rules! decoder_parameterized_value {
    (impl<$lt:lifetime $(, $generic:ident)*> $ty:ty {
        fn decode($param:ident: $param_ty:ty, $buffer:ident: Buffer) -> Result<$ret:ty> $impl:block
    }) => {
        impl<$lt $(, $generic: $crate::DecoderValue<$lt>)*> $crate::DecoderParameterizedValue<$lt> for $ty {
            type Parameter = $param_ty;

            #[inline]
            fn decode_parameterized($param: Self::Parameter, $buffer: $crate::DecoderBuffer<$lt>) -> $crate::DecoderBufferResult<$lt, $ret> $impl
        }

        impl<$lt $(, $generic: $crate::DecoderValueMut<$lt>)*> $crate::DecoderParameterizedValueMut<$lt> for $ty {
            type Parameter = $param_ty;

            #[inline]
            fn decode_parameterized_mut($param: Self::Parameter, $buffer: $crate::DecoderBufferMut<$lt>) -> $crate::DecoderBufferMutResult<$lt, $ret> $impl
        }
    };
}

macro_rules! impl_buffer {
    (
        $name:ident,
        $slice:ty,
        $value:ident,
        $value_call:ident,
        $parameterized:ident,
        $parameterized_call:ident,
        $split:ident
    ) => {
        impl<'a> $name<'a> {
            #[inline]
            pub fn new(bytes: $slice) -> Self {
                Self { bytes }
            }

            /// Splits off a slice of `count` bytes from the front of the buffer
            #[inline]
            pub fn decode_slice(self, count: usize) -> Result<(Self, Self), DecoderError> {
                self.ensure_len(count)?;
                let (slice, remaining) = self.bytes.$split(count);
                Ok((Self::new(slice), Self::new(remaining)))
            }

            /// Decodes a value of type `T` from the front of the buffer
            #[inline]
            pub fn decode<T: $value<'a>>(self) -> Result<(T, Self), DecoderError> {
                T::$value_call(self)
            }

            /// Decodes a slice prefixed by a length of type `Len`
            #[inline]
            pub fn decode_slice_with_len_prefix<Len>(self) -> Result<(Self, Self), DecoderError>
            where
                Len: $value<'a> + core::convert::TryInto<usize>,
            {
                let (len, buffer) = self.decode::<Len>()?;
                let len = len
                    .try_into()
                    .map_err(|_| DecoderError::LengthCapacityExceeded)?;
                buffer.decode_slice(len)
            }

            /// Decodes a value of type `T` prefixed by a length of type `Len`.
            ///
            /// The value must consume the entire length-prefixed slice.
            #[inline]
            pub fn decode_with_len_prefix<Len, T>(self) -> Result<(T, Self), DecoderError>
            where
                Len: $value<'a> + core::convert::TryInto<usize>,
                T: $value<'a>,
            {
                let (slice, buffer) = self.decode_slice_with_len_prefix::<Len>()?;
                let (value, slice) = slice.decode::<T>()?;
                slice.ensure_empty()?;
                Ok((value, buffer))
            }

            /// Decodes a parameterized value of type `T`
            #[inline]
            pub fn decode_parameterized<T: $parameterized<'a>>(
                self,
                parameter: T::Parameter,
            ) -> Result<(T, Self), DecoderError> {
                T::$parameterized_call(parameter, self)
            }

            /// Discards `count` bytes from the front of the buffer
            #[inline]
            pub fn skip(self, count: usize) -> Result<Self, DecoderError> {
                self.decode_slice(count).map(|(_, buffer)| buffer)
            }

            /// Discards a length-prefixed slice from the front of the buffer
            #[inline]
            pub fn skip_with_len_prefix<Len>(self) -> Result<Self, DecoderError>
            where
                Len: $value<'a> + core::convert::TryInto<usize>,
            {
                let (len, buffer) = self.decode::<Len>()?;
                let len = len
                    .try_into()
                    .map_err(|_| DecoderError::LengthCapacityExceeded)?;
                buffer.skip(len)
            }

            /// Creates a peeking [`DecoderBuffer`] over the current view,
            /// leaving `self` untouched
            #[inline]
            #[must_use]
            pub fn peek(&self) -> DecoderBuffer<'_> {
                DecoderBuffer::new(&self.bytes)
            }

            /// Returns the byte at `index` without consuming anything
            #[inline]
            pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
                self.bytes
                    .get(index)
                    .copied()
                    .ok_or(DecoderError::UnexpectedEof(index))
            }

            /// Returns an error unless the buffer holds at least `len` bytes
            #[inline]
            pub fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
                if self.len() < len {
                    Err(DecoderError::UnexpectedEof(len))
                } else {
                    Ok(())
                }
            }

            /// Returns an error unless the buffer is empty
            #[inline]
            pub fn ensure_empty(&self) -> Result<(), DecoderError> {
                if self.is_empty() {
                    Ok(())
                } else {
                    Err(DecoderError::UnexpectedBytes(self.len()))
                }
            }

            #[inline]
            pub fn len(&self) -> usize {
                self.bytes.len()
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.bytes.is_empty()
            }

            /// Borrows the underlying slice. Bypasses the panic protection the
            /// buffer otherwise provides, hence the name.
            #[inline]
            pub fn as_less_safe_slice(&self) -> &[u8] {
                &self.bytes
            }

            /// Consumes the buffer into the underlying slice
            #[inline]
            pub fn into_less_safe_slice(self) -> $slice {
                self.bytes
            }
        }

        impl<'a> From<$slice> for $name<'a> {
            #[inline]
            fn from(bytes: $slice) -> Self {
                Self::new(bytes)
            }
        }

        impl<'a> PartialEq<[u8]> for $name<'a> {
            #[inline]
            fn eq(&self, rhs: &[u8]) -> bool {
                let bytes: &[u8] = &self.bytes;
                bytes.eq(rhs)
            }
        }
    };
}

/// A cursor over an immutable byte slice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl_buffer!(
    DecoderBuffer,
    &'a [u8],
    DecoderValue,
    decode,
    DecoderParameterizedValue,
    decode_parameterized,
    split_at
);

/// A cursor over a mutable byte slice, for decoding that rewrites in place
/// (packet deprotection and decryption)
#[derive(Debug, PartialEq, Eq)]
pub struct DecoderBufferMut<'a> {
    bytes: &'a mut [u8],
}

impl_buffer!(
    DecoderBufferMut,
    &'a mut [u8],
    DecoderValueMut,
    decode_mut,
    DecoderParameterizedValueMut,
    decode_parameterized_mut,
    split_at_mut
);

impl<'a> DecoderBufferMut<'a> {
    /// Reborrows the buffer as an immutable [`DecoderBuffer`], consuming it
    #[inline]
    pub fn freeze(self) -> DecoderBuffer<'a> {
        DecoderBuffer::new(self.bytes)
    }
}

macro_rules! decoder_value_integer {
    ($call:ident, $ty:ty) => {
        decoder_value!(
            impl<'a> $ty {
                fn decode(buffer: Buffer) -> Result<Self> {
                    let (value, buffer) = buffer.decode_slice(core::mem::size_of::<Self>())?;
                    let value = NetworkEndian::$call(value.as_less_safe_slice());
                    Ok((value, buffer))
                }
            }
        );
    };
}

decoder_value!(
    impl<'a> u8 {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (value, buffer) = buffer.decode_slice(1)?;
            let value = value.as_less_safe_slice()[0];
            Ok((value, buffer))
        }
    }
);

decoder_value_integer!(read_u16, u16);
decoder_value_integer!(read_u32, u32);
decoder_value_integer!(read_u64, u64);
decoder_value_integer!(read_u128, u128);

decoder_value!(
    impl<'a> () {
        fn decode(buffer: Buffer) -> Result<Self> {
            Ok(((), buffer))
        }
    }
);

// Consumes the rest of the buffer
decoder_value!(
    impl<'a> DecoderBuffer<'a> {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            let (slice, buffer) = buffer.decode_slice(len)?;
            Ok((slice.freeze_if_needed(), buffer))
        }
    }
);

impl<'a> DecoderBuffer<'a> {
    /// Normalizes the buffer into an immutable [`DecoderBuffer`]. Enables
    /// decode bodies generated for both buffer kinds to produce shared
    /// references.
    #[inline]
    pub fn freeze_if_needed(self) -> DecoderBuffer<'a> {
        self
    }
}

impl<'a> DecoderBufferMut<'a> {
    /// Normalizes the buffer into an immutable [`DecoderBuffer`]
    #[inline]
    pub fn freeze_if_needed(self) -> DecoderBuffer<'a> {
        self.freeze()
    }
}

impl<'a> DecoderValueMut<'a> for DecoderBufferMut<'a> {
    #[inline]
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self> {
        let len = buffer.len();
        buffer.decode_slice(len)
    }
}

decoder_value!(
    impl<'a> &'a [u8] {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            let (slice, buffer) = buffer.decode_slice(len)?;
            Ok((slice.freeze_if_needed().into_less_safe_slice(), buffer))
        }
    }
);
