// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use core::mem::size_of;
use fjord_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).

pub const TAG: Tag = 0x08;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The OFF bit (0x04) in the frame type is set to indicate that there
//#    is an Offset field present.
const OFF_BIT: Tag = 0x04;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The LEN bit (0x02) in the frame type is set to indicate that there
//#    is a Length field present.
const LEN_BIT: Tag = 0x02;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The FIN bit (0x01) indicates that the frame marks the end of the
//#    stream.
const FIN_BIT: Tag = 0x01;

/// Returned when a frame cannot fit into the remaining packet capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stream<'a> {
    pub stream_id: VarInt,

    /// Byte offset of `data` within the stream
    pub offset: VarInt,

    /// When true the frame extends to the end of the packet and omits its
    /// length field
    pub is_last_frame: bool,

    /// When true the frame carries the final bytes of the stream
    pub is_fin: bool,

    pub data: &'a [u8],
}

impl<'a> Stream<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = TAG;

        if self.offset != 0u64 {
            tag |= OFF_BIT;
        }

        if !self.is_last_frame {
            tag |= LEN_BIT;
        }

        if self.is_fin {
            tag |= FIN_BIT;
        }

        tag
    }

    /// The stream offset one past the last byte in this frame
    #[inline]
    pub fn end_offset(&self) -> Option<VarInt> {
        self.offset.checked_add_usize(self.data.len())
    }

    /// Trims `data` so the frame fits into `capacity` bytes.
    ///
    /// Updates `is_last_frame` when the data fills the packet exactly.
    /// Returns the number of data bytes that fit.
    pub fn try_fit(&mut self, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = size_of::<Tag>();
        fixed_len += self.stream_id.encoding_len();
        if self.offset != 0u64 {
            fixed_len += self.offset.encoding_len();
        }

        let remaining = capacity.checked_sub(fixed_len).ok_or(FitError)?;
        let data_len = self.data.len().min(remaining);

        // filling the capacity exactly lets us omit the length field
        if data_len == remaining {
            self.is_last_frame = true;
            self.data = &self.data[..data_len];
            return Ok(data_len);
        }

        self.is_last_frame = false;
        let len_prefix = VarInt::try_from(data_len).map_err(|_| FitError)?.encoding_len();
        let data_len = remaining.checked_sub(len_prefix).ok_or(FitError)?.min(data_len);
        self.data = &self.data[..data_len];

        Ok(data_len)
    }
}

decoder_parameterized_value!(
    impl<'a> Stream<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let has_offset = tag & OFF_BIT == OFF_BIT;
            let is_last_frame = tag & LEN_BIT != LEN_BIT;
            let is_fin = tag & FIN_BIT == FIN_BIT;

            let (stream_id, buffer) = buffer.decode()?;

            let (offset, buffer) = if has_offset {
                buffer.decode()?
            } else {
                (VarInt::ZERO, buffer)
            };

            let (data, buffer) = if is_last_frame {
                let len = buffer.len();
                buffer.decode_slice(len)?
            } else {
                buffer.decode_slice_with_len_prefix::<VarInt>()?
            };
            let data = data.freeze_if_needed().into_less_safe_slice();

            let frame = Stream {
                stream_id,
                offset,
                is_last_frame,
                is_fin,
                data,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a> EncoderValue for Stream<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);

        if self.offset != 0u64 {
            buffer.encode(&self.offset);
        }

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
    use bolero::check;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(frame: Stream) {
        let mut storage = [0u8; 1500];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        let (decoded, remaining) = buffer.decode_parameterized::<Stream>(tag).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn codec_variants() {
        for offset in [0u32, 1000] {
            for is_fin in [false, true] {
                for is_last_frame in [false, true] {
                    round_trip(Stream {
                        stream_id: VarInt::from_u8(4),
                        offset: VarInt::from_u32(offset),
                        is_last_frame,
                        is_fin,
                        data: b"stream payload",
                    });
                }
            }
        }
    }

    #[test]
    fn try_fit_never_exceeds_capacity() {
        let data = [0u8; 2048];
        check!()
            .with_type::<(u8, u16, u16)>()
            .for_each(|&(stream_id, offset, capacity)| {
                let capacity = capacity as usize % 1500;
                let mut frame = Stream {
                    stream_id: VarInt::from_u8(stream_id),
                    offset: VarInt::from_u16(offset),
                    is_last_frame: false,
                    is_fin: false,
                    data: &data,
                };

                if let Ok(len) = frame.try_fit(capacity) {
                    assert_eq!(frame.data.len(), len);
                    assert!(frame.encoding_size() <= capacity);
                    if frame.is_last_frame {
                        assert_eq!(frame.encoding_size(), capacity);
                    }
                } else {
                    // nothing reasonable fits
                    assert!(capacity < 32);
                }
            });
    }
}
