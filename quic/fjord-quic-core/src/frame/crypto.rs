// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.  It can be sent in all packet types except 0-RTT.

pub const TAG: Tag = 0x06;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crypto<'a> {
    /// Byte offset of this chunk in the handshake stream
    pub offset: VarInt,
    pub data: &'a [u8],
}

impl<'a> Crypto<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Crypto<'a> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (offset, buffer) = buffer.decode()?;
            let (data, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let data = data.freeze_if_needed().into_less_safe_slice();

            Ok((Crypto { offset, data }, buffer))
        }
    }
);

impl<'a> EncoderValue for Crypto<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.offset);
        buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip() {
        let frame = Crypto {
            offset: VarInt::from_u16(300),
            data: b"client hello",
        };

        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(tag, TAG);
        let (decoded, remaining) = buffer.decode_parameterized::<Crypto>(tag).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }
}
