// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{convert::TryFrom, fmt, ops::Deref};
use fjord_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# QUIC packets and frames commonly use a variable-length encoding for
//# non-negative integer values.  This encoding ensures that smaller
//# integer values need fewer bytes to encode.

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

pub const MAX_VARINT_VALUE: u64 = (1 << 62) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VarIntError {}

/// An integer in the range `0..2^62`, the numeric domain of every counted
/// quantity on the QUIC wire.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Result<Self, VarIntError> {
        if value > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(value))
    }

    pub const fn from_u8(value: u8) -> Self {
        Self(value as u64)
    }

    pub const fn from_u16(value: u16) -> Self {
        Self(value as u64)
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-16
    //# This means that integers are encoded on 1, 2, 4, or 8 bytes and can
    //# encode 6-, 14-, 30-, or 62-bit values, respectively.
    #[inline]
    pub const fn encoding_len(self) -> usize {
        match self.0 {
            0..=0x3f => 1,
            0x40..=0x3fff => 2,
            0x4000..=0x3fff_ffff => 4,
            _ => 8,
        }
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Self::new(self.0.checked_add(rhs.0)?).ok()
    }

    #[inline]
    pub fn checked_add_usize(self, rhs: usize) -> Option<Self> {
        self.checked_add(Self::try_from(rhs).ok()?)
    }

    #[inline]
    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self::new(self.0.saturating_add(rhs.0)).unwrap_or(Self::MAX)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(rhs.0)?))
    }

    #[inline]
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        Self::new(self.0.checked_mul(rhs.0)?).ok()
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<u64> for VarInt {
    #[inline]
    fn as_ref(&self) -> &u64 {
        &self.0
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

macro_rules! impl_from_lesser {
    ($ty:ty) => {
        impl From<$ty> for VarInt {
            #[inline]
            fn from(value: $ty) -> Self {
                Self(value.into())
            }
        }
    };
}

impl_from_lesser!(u8);
impl_from_lesser!(u16);
impl_from_lesser!(u32);

impl From<VarInt> for u64 {
    #[inline]
    fn from(value: VarInt) -> u64 {
        value.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = <usize as TryFrom<u64>>::Error;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into()
    }
}

impl core::ops::Add for VarInt {
    type Output = Self;

    #[inline]
    #[track_caller]
    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).expect("VarInt overflow occurred")
    }
}

impl core::ops::AddAssign for VarInt {
    #[inline]
    #[track_caller]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl core::ops::Sub for VarInt {
    type Output = Self;

    #[inline]
    #[track_caller]
    fn sub(self, rhs: Self) -> Self {
        // bounds check is inherited from u64
        Self(self.0 - rhs.0)
    }
}

impl core::ops::SubAssign for VarInt {
    #[inline]
    #[track_caller]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl PartialEq<u64> for VarInt {
    #[inline]
    fn eq(&self, other: &u64) -> bool {
        self.0.eq(other)
    }
}

impl PartialOrd<u64> for VarInt {
    #[inline]
    fn partial_cmp(&self, other: &u64) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

impl PartialEq<usize> for VarInt {
    #[inline]
    fn eq(&self, other: &usize) -> bool {
        self.0.eq(&(*other as u64))
    }
}

impl PartialOrd<usize> for VarInt {
    #[inline]
    fn partial_cmp(&self, other: &usize) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(&(*other as u64))
    }
}

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let len = self.encoding_len();
        let value = self.0;
        encoder.write_sized(len, |buffer| match len {
            1 => buffer[0] = value as u8,
            2 => buffer.copy_from_slice(&(value as u16 | 0x4000).to_be_bytes()),
            4 => buffer.copy_from_slice(&(value as u32 | 0x8000_0000).to_be_bytes()),
            _ => buffer.copy_from_slice(&(value | 0xc000_0000_0000_0000).to_be_bytes()),
        });
    }

    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, _encoder: &E) -> usize {
        self.encoding_len()
    }
}

decoder_value!(
    impl<'a> VarInt {
        fn decode(buffer: Buffer) -> Result<Self> {
            let first = buffer.peek_byte(0)?;

            Ok(match first >> 6 {
                0b00 => {
                    let buffer = buffer.skip(1)?;
                    (Self((first & 0x3f) as u64), buffer)
                }
                0b01 => {
                    let (value, buffer) = buffer.decode::<u16>()?;
                    (Self((value & 0x3fff) as u64), buffer)
                }
                0b10 => {
                    let (value, buffer) = buffer.decode::<u32>()?;
                    (Self((value & 0x3fff_ffff) as u64), buffer)
                }
                _ => {
                    let (value, buffer) = buffer.decode::<u64>()?;
                    (Self(value & MAX_VARINT_VALUE), buffer)
                }
            })
        }
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(value: VarInt) -> (usize, VarInt) {
        let mut storage = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&value);
        let len = encoder.len();
        let (decoded, _) = DecoderBuffer::new(&storage[..len])
            .decode::<VarInt>()
            .unwrap();
        (len, decoded)
    }

    #[test]
    fn round_trip_property() {
        check!().with_type::<u64>().for_each(|value| {
            let value = VarInt::new(value & MAX_VARINT_VALUE).unwrap();
            let (len, decoded) = round_trip(value);
            assert_eq!(decoded, value);
            assert_eq!(len, value.encoding_len());
        });
    }

    #[test]
    fn encoding_is_minimal() {
        for (value, expected) in [
            (0u64, 1),
            (63, 1),
            (64, 2),
            (16_383, 2),
            (16_384, 4),
            (1_073_741_823, 4),
            (1_073_741_824, 8),
            (MAX_VARINT_VALUE, 8),
        ] {
            assert_eq!(VarInt::new(value).unwrap().encoding_len(), expected);
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
    //= type=test
    //# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to
    //# the decimal value 151,288,809,941,952,652
    #[test]
    fn rfc_examples() {
        for (bytes, expected) in [
            (&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c][..], 151_288_809_941_952_652u64),
            (&[0x9d, 0x7f, 0x3e, 0x7d][..], 494_878_333),
            (&[0x7b, 0xbd][..], 15_293),
            (&[0x25][..], 37),
        ] {
            let (value, remaining) = DecoderBuffer::new(bytes).decode::<VarInt>().unwrap();
            assert!(remaining.is_empty());
            assert_eq!(value.as_u64(), expected);
        }
    }

    #[test]
    fn non_minimal_encodings_are_accepted() {
        // 37 encoded on two bytes
        let bytes = [0x40, 0x25];
        let (value, _) = DecoderBuffer::new(&bytes).decode::<VarInt>().unwrap();
        assert_eq!(value.as_u64(), 37);
    }

    #[test]
    fn overflow_checks() {
        assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
        assert_eq!(VarInt::MAX.checked_add(VarInt::from_u8(1)), None);
        assert_eq!(VarInt::MAX.saturating_add(VarInt::MAX), VarInt::MAX);
        assert_eq!(VarInt::ZERO.checked_sub(VarInt::from_u8(1)), None);
    }
}
