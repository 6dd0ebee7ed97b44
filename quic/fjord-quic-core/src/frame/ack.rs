// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use core::{convert::TryInto, ops::RangeInclusive, time::Duration};
use fjord_codec::{
    decoder_parameterized_value, decoder_value, DecoderBuffer, DecoderError, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.  If
//# the frame type is 0x03, ACK frames also contain the cumulative count
//# of QUIC packets with associated ECN marks received on the connection
//# up until this point.

pub const TAG: Tag = 0x02;
pub const TAG_W_ECN: Tag = 0x03;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Frame {
//#   Type (i) = 0x02..0x03,
//#   Largest Acknowledged (i),
//#   ACK Delay (i),
//#   ACK Range Count (i),
//#   First ACK Range (i),
//#   ACK Range (..) ...,
//#   [ECN Counts (..)],
//# }

#[derive(Clone, PartialEq, Eq)]
pub struct Ack<A> {
    /// Acknowledgment delay in units of `2^ack_delay_exponent` microseconds
    pub ack_delay: VarInt,

    /// Alternating acknowledged/gap ranges in descending packet number order
    pub ack_ranges: A,

    /// ECN counts, present when the tag is 0x03
    pub ecn_counts: Option<EcnCounts>,
}

impl<A> Ack<A> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.ecn_counts.is_some() {
            TAG_W_ECN
        } else {
            TAG
        }
    }
}

impl<A: AckRanges> Ack<A> {
    #[inline]
    pub fn largest_acknowledged(&self) -> VarInt {
        self.ack_ranges.largest_acknowledged()
    }

    /// The peer-reported delay, scaled by its `ack_delay_exponent`
    #[inline]
    pub fn ack_delay(&self, exponent: u8) -> Duration {
        debug_assert!(exponent <= 20);
        Duration::from_micros(self.ack_delay.as_u64() << exponent)
    }

    #[inline]
    pub fn ack_ranges(&self) -> A::Iter {
        self.ack_ranges.ack_ranges()
    }
}

impl<A: core::fmt::Debug> core::fmt::Debug for Ack<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Ack")
            .field("ack_delay", &self.ack_delay)
            .field("ack_ranges", &self.ack_ranges)
            .field("ecn_counts", &self.ecn_counts)
            .finish()
    }
}

decoder_parameterized_value!(
    impl<'a> Ack<AckRangesDecoder<'a>> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (largest_acknowledged, buffer) = buffer.decode()?;
            let (ack_delay, buffer) = buffer.decode()?;
            let (ack_ranges, buffer) = buffer.decode_parameterized(largest_acknowledged)?;

            let (ecn_counts, buffer) = if tag == TAG_W_ECN {
                let (ecn_counts, buffer) = buffer.decode()?;
                (Some(ecn_counts), buffer)
            } else {
                (None, buffer)
            };

            let frame = Ack {
                ack_delay,
                ack_ranges,
                ecn_counts,
            };

            Ok((frame, buffer))
        }
    }
);

impl<A: AckRanges> EncoderValue for Ack<A> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());

        let mut iter = self.ack_ranges.ack_ranges();

        let first_range = iter.next().expect("at least one ack range is required");
        let (mut smallest, largest_acknowledged) = first_range.into_inner();

        let ack_range_count: VarInt = iter
            .len()
            .try_into()
            .expect("ack range count cannot exceed VarInt::MAX");

        buffer.encode(&largest_acknowledged);
        buffer.encode(&self.ack_delay);
        buffer.encode(&ack_range_count);
        buffer.encode(&(largest_acknowledged - smallest));

        for range in iter {
            let (start, end) = range.into_inner();
            debug_assert!(end < smallest, "ranges must be descending and disjoint");

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# Gap:  A variable-length integer indicating the number of contiguous
            //#    unacknowledged packets preceding the packet number one lower than
            //#    the smallest in the preceding ACK Range.
            let gap = smallest - end - VarInt::from_u8(2);
            buffer.encode(&gap);
            buffer.encode(&(end - start));
            smallest = start;
        }

        if let Some(ecn_counts) = self.ecn_counts.as_ref() {
            buffer.encode(ecn_counts);
        }
    }
}

/// A provider of acknowledged ranges, iterated largest-first
pub trait AckRanges {
    type Iter: Iterator<Item = RangeInclusive<VarInt>> + ExactSizeIterator;

    fn ack_ranges(&self) -> Self::Iter;

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        *self
            .ack_ranges()
            .next()
            .expect("at least one ack range is required")
            .end()
    }
}

const ACK_RANGE_DECODING_ERROR: DecoderError =
    DecoderError::InvariantViolation("invalid ACK ranges");

/// Lazily-decoded ACK ranges.
///
/// The full pass over the gap/length pairs happens once at decode time to
/// validate that no range descends below zero; iteration afterwards cannot
/// fail.
#[derive(Clone, Copy)]
pub struct AckRangesDecoder<'a> {
    largest_acknowledged: VarInt,
    ack_range_count: VarInt,
    range_buffer: DecoderBuffer<'a>,
}

impl<'a> AckRanges for AckRangesDecoder<'a> {
    type Iter = AckRangesIter<'a>;

    #[inline]
    fn ack_ranges(&self) -> Self::Iter {
        AckRangesIter {
            largest_acknowledged: self.largest_acknowledged,
            ack_range_count: self.ack_range_count,
            range_buffer: self.range_buffer,
        }
    }

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        self.largest_acknowledged
    }
}

impl<'a> PartialEq for AckRangesDecoder<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.ack_ranges().eq(other.ack_ranges())
    }
}

impl<'a> Eq for AckRangesDecoder<'a> {}

impl<'a> core::fmt::Debug for AckRangesDecoder<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_list().entries(self.ack_ranges()).finish()
    }
}

decoder_parameterized_value!(
    impl<'a> AckRangesDecoder<'a> {
        fn decode(largest_acknowledged: VarInt, buffer: Buffer) -> Result<AckRangesDecoder<'a>> {
            let (ack_range_count, buffer) = buffer.decode::<VarInt>()?;

            // the total includes the first ack range
            let ack_range_count = ack_range_count
                .checked_add(VarInt::from_u8(1))
                .ok_or(ACK_RANGE_DECODING_ERROR)?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# If any computed packet number is negative, an endpoint MUST
            //# generate a connection error of type FRAME_ENCODING_ERROR.
            let consumed = {
                let peek = buffer.peek();
                let total = peek.len();
                let mut iter = AckRangesIter {
                    ack_range_count,
                    range_buffer: peek,
                    largest_acknowledged,
                };
                for _ in 0..ack_range_count.as_u64() {
                    iter.next().ok_or(ACK_RANGE_DECODING_ERROR)?;
                }
                total - iter.range_buffer.len()
            };

            let (range_buffer, remaining) = buffer.decode_slice(consumed)?;

            let ack_ranges = AckRangesDecoder {
                largest_acknowledged,
                ack_range_count,
                range_buffer: range_buffer.freeze_if_needed(),
            };

            Ok((ack_ranges, remaining))
        }
    }
);

/// Iterator over decoded ACK ranges, in descending packet number order
#[derive(Clone)]
pub struct AckRangesIter<'a> {
    largest_acknowledged: VarInt,
    ack_range_count: VarInt,
    range_buffer: DecoderBuffer<'a>,
}

impl<'a> Iterator for AckRangesIter<'a> {
    type Item = RangeInclusive<VarInt>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ack_range_count = self.ack_range_count.checked_sub(VarInt::from_u8(1))?;

        let largest = self.largest_acknowledged;
        let (length, buffer) = self.range_buffer.decode::<VarInt>().ok()?;
        let start = largest.checked_sub(length)?;

        // prepare the next gap if one follows
        self.range_buffer = if self.ack_range_count > 0u64 {
            let (gap, buffer) = buffer.decode::<VarInt>().ok()?;
            self.largest_acknowledged = start
                .checked_sub(gap)?
                .checked_sub(VarInt::from_u8(2))?;
            buffer
        } else {
            buffer
        };

        Some(start..=largest)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.ack_range_count.as_u64() as usize;
        (count, Some(count))
    }
}

impl<'a> ExactSizeIterator for AckRangesIter<'a> {}

impl<'a> core::fmt::Debug for AckRangesIter<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
//# ECN Counts {
//#   ECT0 Count (i),
//#   ECT1 Count (i),
//#   ECN-CE Count (i),
//# }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect_0_count: VarInt,
    pub ect_1_count: VarInt,
    pub ce_count: VarInt,
}

decoder_value!(
    impl<'a> EcnCounts {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (ect_0_count, buffer) = buffer.decode()?;
            let (ect_1_count, buffer) = buffer.decode()?;
            let (ce_count, buffer) = buffer.decode()?;
            Ok((
                EcnCounts {
                    ect_0_count,
                    ect_1_count,
                    ce_count,
                },
                buffer,
            ))
        }
    }
);

impl EncoderValue for EcnCounts {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.ect_0_count);
        encoder.encode(&self.ect_1_count);
        encoder.encode(&self.ce_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::Ranges;
    use fjord_codec::{DecoderBuffer, EncoderBuffer};

    fn encode_decode(ranges: &Ranges, ack_delay: u64) -> Vec<(u64, u64)> {
        let frame = Ack {
            ack_delay: VarInt::new(ack_delay).unwrap(),
            ack_ranges: ranges.clone(),
            ecn_counts: None,
        };

        let mut storage = [0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<u8>().unwrap();
        let (decoded, remaining) = buffer
            .decode_parameterized::<Ack<AckRangesDecoder>>(tag)
            .unwrap();
        assert!(remaining.is_empty());

        decoded
            .ack_ranges()
            .map(|r| (r.start().as_u64(), r.end().as_u64()))
            .collect()
    }

    #[test]
    fn round_trip() {
        let mut ranges = Ranges::new(10);
        for pn in [0, 1, 2, 7, 8, 12] {
            ranges.insert(pn);
        }
        assert_eq!(
            encode_decode(&ranges, 100),
            vec![(12, 12), (7, 8), (0, 2)]
        );
    }

    #[test]
    fn single_range() {
        let mut ranges = Ranges::new(10);
        ranges.insert(42);
        assert_eq!(encode_decode(&ranges, 0), vec![(42, 42)]);
    }

    #[test]
    fn underflowing_ranges_are_rejected() {
        // largest = 1, first range = 0, one extra (gap, len) pair which
        // descends below zero
        let bytes = [
            0x01, // largest acknowledged
            0x00, // ack delay
            0x01, // ack range count
            0x00, // first ack range
            0x05, // gap (underflows)
            0x00, // range length
        ];
        let buffer = DecoderBuffer::new(&bytes);
        assert!(buffer
            .decode_parameterized::<Ack<AckRangesDecoder>>(TAG)
            .is_err());
    }

    #[test]
    fn ack_delay_scaling() {
        let mut ranges = Ranges::new(10);
        ranges.insert(0);
        let frame = Ack {
            ack_delay: VarInt::from_u8(100),
            ack_ranges: ranges,
            ecn_counts: None,
        };
        assert_eq!(frame.ack_delay(3), Duration::from_micros(800));
    }
}
