// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

pub const TAG: Tag = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: VarInt,

    /// Application-defined reason the stream was reset
    pub application_error_code: VarInt,

    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
    //# Final Size:  A variable-length integer indicating the final size of
    //#    the stream by the RESET_STREAM sender, in units of bytes; see
    //#    Section 4.5.
    pub final_size: VarInt,
}

impl ResetStream {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

simple_frame_codec!(
    ResetStream {
        stream_id,
        application_error_code,
        final_size
    },
    TAG
);
