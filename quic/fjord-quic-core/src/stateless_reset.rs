// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use fjord_codec::{decoder_value, Encoder, EncoderValue};
use subtle::ConstantTimeEq;

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# A stateless reset is provided as an option of last resort for an
//# endpoint that does not have access to the state of a connection.

pub const LEN: usize = 16;

/// The smallest 1-RTT packet a stateless reset can be mistaken for: a short
/// header byte, a zero-length connection ID, and a token-sized tail.
pub const MIN_PACKET_LEN: usize = 1 + 4 + LEN;

/// A 16-byte stateless reset token.
///
/// Tokens are compared in constant time: an attacker probing with guessed
/// tokens must not learn how many leading bytes matched.
#[derive(Clone, Copy, Debug, Eq)]
pub struct Token([u8; LEN]);

impl Token {
    /// A zeroed token for contexts where none was provided.
    /// Never advertised to a peer.
    pub const ZEROED: Self = Self([0; LEN]);

    #[inline]
    pub fn into_inner(self) -> [u8; LEN] {
        self.0
    }
}

impl PartialEq for Token {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl From<[u8; LEN]> for Token {
    #[inline]
    fn from(bytes: [u8; LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Token {
    type Error = core::array::TryFromSliceError;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(slice.try_into()?))
    }
}

impl AsRef<[u8]> for Token {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl EncoderValue for Token {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.0)
    }
}

decoder_value!(
    impl<'a> Token {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (bytes, buffer) = buffer.decode_slice(LEN)?;
            let token = Token::try_from(bytes.as_less_safe_slice()).expect("slice len checked");
            Ok((token, buffer))
        }
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison() {
        let a = Token::from([1; LEN]);
        let b = Token::from([1; LEN]);
        let c = Token::from([2; LEN]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn codec_round_trip() {
        use fjord_codec::DecoderBuffer;

        let token = Token::from(*b"0123456789abcdef");
        let bytes = token.encode_to_vec();
        let (decoded, _) = DecoderBuffer::new(&bytes).decode::<Token>().unwrap();
        assert_eq!(decoded, token);
    }
}
