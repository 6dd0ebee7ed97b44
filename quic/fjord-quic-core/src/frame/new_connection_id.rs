// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection, frame::Tag, stateless_reset, varint::VarInt};
use fjord_codec::{decoder_invariant, decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

pub const TAG: Tag = 0x18;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewConnectionId<'a> {
    /// The sequence number assigned to the connection ID by the sender
    pub sequence_number: VarInt,

    /// The sequence number below which all connection IDs are retired
    pub retire_prior_to: VarInt,

    /// The new connection ID, 1 to 20 bytes
    pub connection_id: &'a [u8],

    /// Token for stateless resets addressed to this connection ID
    pub stateless_reset_token: &'a [u8; stateless_reset::LEN],
}

impl<'a> NewConnectionId<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> NewConnectionId<'a> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
            let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# The value in the Retire Prior To field MUST be less than or
            //# equal to the value in the Sequence Number field.  Receiving a
            //# value in the Retire Prior To field that is greater than that in
            //# the Sequence Number field MUST be treated as a connection error
            //# of type FRAME_ENCODING_ERROR.
            decoder_invariant!(
                retire_prior_to <= sequence_number,
                "retire_prior_to must not exceed the sequence number"
            );

            let (connection_id, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
            let connection_id = connection_id.freeze_if_needed().into_less_safe_slice();

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# Values less than 1 and greater than 20 are invalid and MUST be
            //# treated as a connection error of type FRAME_ENCODING_ERROR.
            decoder_invariant!(
                (1..=connection::id::MAX_LEN).contains(&connection_id.len()),
                "invalid connection id length"
            );

            let (token, buffer) = buffer.decode_slice(stateless_reset::LEN)?;
            let stateless_reset_token = token
                .freeze_if_needed()
                .into_less_safe_slice()
                .try_into()
                .expect("slice len checked");

            let frame = NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a> EncoderValue for NewConnectionId<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.sequence_number);
        buffer.encode(&self.retire_prior_to);
        buffer.encode_with_len_prefix::<u8, _>(&self.connection_id);
        buffer.write_slice(self.stateless_reset_token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip() {
        let token = [7u8; stateless_reset::LEN];
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(3),
            retire_prior_to: VarInt::from_u8(1),
            connection_id: &[1, 2, 3, 4],
            stateless_reset_token: &token,
        };

        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        let (decoded, remaining) = buffer.decode_parameterized::<NewConnectionId>(tag).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn invalid_retire_prior_to() {
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::from_u8(3),
            connection_id: &[1, 2, 3, 4],
            stateless_reset_token: &[0u8; stateless_reset::LEN],
        };

        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        assert!(buffer.decode_parameterized::<NewConnectionId>(tag).is_err());
    }
}
