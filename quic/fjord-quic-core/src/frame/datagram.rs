// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9221#section-4
//# DATAGRAM frames are used to transmit application data in an
//# unreliable manner.  The Type field in the DATAGRAM frame takes the
//# form 0b0011000X (or the values 0x30 and 0x31).

pub const TAG: Tag = 0x30;
pub const TAG_W_LEN: Tag = 0x31;

const LEN_BIT: Tag = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Datagram<'a> {
    /// When true the frame extends to the end of the packet and omits its
    /// length field
    pub is_last_frame: bool,

    pub data: &'a [u8],
}

impl<'a> Datagram<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.is_last_frame {
            TAG
        } else {
            TAG_W_LEN
        }
    }
}

decoder_parameterized_value!(
    impl<'a> Datagram<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let is_last_frame = tag & LEN_BIT != LEN_BIT;

            let (data, buffer) = if is_last_frame {
                let len = buffer.len();
                buffer.decode_slice(len)?
            } else {
                buffer.decode_slice_with_len_prefix::<VarInt>()?
            };
            let data = data.freeze_if_needed().into_less_safe_slice();

            Ok((
                Datagram {
                    is_last_frame,
                    data,
                },
                buffer,
            ))
        }
    }
);

impl<'a> EncoderValue for Datagram<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        if self.is_last_frame {
            buffer.encode(&self.data);
        } else {
            buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip() {
        for is_last_frame in [false, true] {
            let frame = Datagram {
                is_last_frame,
                data: b"unreliable",
            };

            let mut storage = [0u8; 32];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(&frame);
            let len = encoder.len();

            let buffer = DecoderBuffer::new(&storage[..len]);
            let (tag, buffer) = buffer.decode::<u8>().unwrap();
            let (decoded, remaining) = buffer.decode_parameterized::<Datagram>(tag).unwrap();
            assert!(remaining.is_empty());
            assert_eq!(decoded, frame);
        }
    }
}
