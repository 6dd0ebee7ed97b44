// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.  The
//# CONNECTION_CLOSE frame with a type of 0x1c is used to signal errors
//# at only the QUIC layer, or the absence of errors (with the NO_ERROR
//# code).  The CONNECTION_CLOSE frame with a type of 0x1d is used to
//# signal an error with the application that uses QUIC.

pub const TRANSPORT_TAG: Tag = 0x1c;
pub const APPLICATION_TAG: Tag = 0x1d;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,

    /// The type of the frame that triggered the error.
    /// `None` for application closes (type 0x1d).
    pub frame_type: Option<VarInt>,

    /// Human-readable reason, not necessarily UTF-8
    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TRANSPORT_TAG
        } else {
            APPLICATION_TAG
        }
    }

    #[inline]
    pub fn is_application_close(&self) -> bool {
        self.frame_type.is_none()
    }
}

decoder_parameterized_value!(
    impl<'a> ConnectionClose<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode()?;

            let (frame_type, buffer) = if tag == TRANSPORT_TAG {
                let (frame_type, buffer) = buffer.decode::<VarInt>()?;
                (Some(frame_type), buffer)
            } else {
                (None, buffer)
            };

            let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let reason = reason.freeze_if_needed().into_less_safe_slice();

            let frame = ConnectionClose {
                error_code,
                frame_type,
                reason,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a> EncoderValue for ConnectionClose<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            buffer.encode(&frame_type);
        }
        buffer.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(frame: ConnectionClose) {
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        let (decoded, remaining) = buffer.decode_parameterized::<ConnectionClose>(tag).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn transport_close() {
        round_trip(ConnectionClose {
            error_code: VarInt::from_u8(0x0a),
            frame_type: Some(VarInt::from_u8(0x06)),
            reason: b"crypto frame in 0-rtt",
        });
    }

    #[test]
    fn application_close() {
        round_trip(ConnectionClose {
            error_code: VarInt::from_u16(404),
            frame_type: None,
            reason: b"",
        });
    }
}
