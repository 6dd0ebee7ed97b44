// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC connection ID

use fjord_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# In QUIC version 1, this value MUST NOT exceed 20 bytes.

/// The maximum length of a connection ID in QUIC version 1
pub const MAX_LEN: usize = 20;

/// An opaque connection identifier, 0 to 20 bytes.
///
/// Zero-length IDs are valid: an endpoint that never migrates and
/// demultiplexes on the network path alone may ask its peer to address it
/// with empty IDs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidLength;

impl ConnectionId {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    /// Creates a connection ID from a byte slice, returning `None` if the
    /// slice exceeds 20 bytes
    #[inline]
    pub fn try_from_bytes(slice: &[u8]) -> Option<Self> {
        Self::try_from(slice).ok()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A fixed ID for tests
    #[cfg(any(test, feature = "testing"))]
    pub const TEST_ID: Self = {
        let mut bytes = [0u8; MAX_LEN];
        bytes[0] = 0xfe;
        bytes[1] = 0xed;
        bytes[2] = 0xc0;
        bytes[3] = 0xde;
        Self { bytes, len: 4 }
    };
}

impl core::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ConnectionId({:?})", self.as_bytes())
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = InvalidLength;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        if slice.len() > MAX_LEN {
            return Err(InvalidLength);
        }
        let mut bytes = [0; MAX_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }
}

impl AsRef<[u8]> for ConnectionId {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl EncoderValue for ConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_bytes())
    }
}

// Decodes the remainder of the buffer as a connection ID; callers slice the
// buffer to the ID's length first
decoder_value!(
    impl<'a> ConnectionId {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            let (bytes, buffer) = buffer.decode_slice(len)?;
            let id = ConnectionId::try_from(bytes.as_less_safe_slice()).map_err(|_| {
                fjord_codec::DecoderError::InvariantViolation("connection id too long")
            })?;
            Ok((id, buffer))
        }
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_bounds() {
        assert!(ConnectionId::try_from_bytes(&[0u8; 21]).is_none());
        let id = ConnectionId::try_from_bytes(&[0u8; 20]).unwrap();
        assert_eq!(id.len(), 20);

        let empty = ConnectionId::try_from_bytes(&[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty, ConnectionId::EMPTY);
    }

    #[test]
    fn equality_ignores_storage_tail() {
        let a = ConnectionId::try_from_bytes(&[1, 2, 3]).unwrap();
        let b = ConnectionId::try_from_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), &[1, 2, 3]);
    }
}
