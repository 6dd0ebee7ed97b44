// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.  PADDING frames
//# can be used to increase the size of a packet.

pub const TAG: Tag = 0x00;

/// A run of padding bytes. Consecutive PADDING frames decode as a single
/// value so handlers see one frame per run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
    /// Total number of padding bytes, including every tag byte in the run
    pub length: usize,
}

impl Padding {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Padding {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            // the tag byte is itself a padding byte
            let mut length = 1;
            let mut buffer = buffer;

            while matches!(buffer.peek_byte(0), Ok(0)) {
                buffer = buffer.skip(1)?;
                length += 1;
            }

            Ok((Padding { length }, buffer))
        }
    }
);

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_repeated(self.length, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_codec::DecoderBuffer;

    #[test]
    fn runs_coalesce() {
        let bytes = [0u8, 0, 0, 0, 1];
        // the frame dispatcher consumes the tag before the parameterized decode
        let buffer = DecoderBuffer::new(&bytes[1..]);
        let (padding, remaining) = buffer.decode_parameterized::<Padding>(TAG).unwrap();
        assert_eq!(padding.length, 4);
        assert_eq!(remaining.len(), 1);
    }
}
