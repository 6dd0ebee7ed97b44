// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{path_challenge::DATA_LEN, Tag};
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
//# A PATH_RESPONSE frame (type=0x1b) is sent in response to a
//# PATH_CHALLENGE frame.

pub const TAG: Tag = 0x1b;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathResponse {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
    //# Data:  This 8-byte field contains arbitrary data.
    //#
    //# A PATH_RESPONSE frame MUST contain the data that was sent in the
    //# corresponding PATH_CHALLENGE frame.
    pub data: [u8; DATA_LEN],
}

impl PathResponse {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> PathResponse {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (slice, buffer) = buffer.decode_slice(DATA_LEN)?;
            let mut data = [0u8; DATA_LEN];
            data.copy_from_slice(slice.as_less_safe_slice());
            Ok((PathResponse { data }, buffer))
        }
    }
);

impl EncoderValue for PathResponse {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.write_slice(&self.data);
    }
}
