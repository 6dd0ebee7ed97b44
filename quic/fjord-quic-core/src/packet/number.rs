// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet numbers: full values, truncated wire encodings, and the
//! receive-side duplicate window.

use crate::varint::{VarInt, MAX_VARINT_VALUE};
use fjord_codec::{DecoderBuffer, DecoderBufferResult, Encoder};

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# Packet numbers are divided into three spaces in QUIC:
//#
//# Initial space:  All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# Handshake space:  All Handshake packets (Section 17.2.4) are in this
//#    space.
//#
//# Application data space:  All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) packets are in this space.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    #[inline]
    pub fn is_initial(self) -> bool {
        self == PacketNumberSpace::Initial
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        self == PacketNumberSpace::Handshake
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        self == PacketNumberSpace::ApplicationData
    }
}

/// A full 62-bit packet number
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketNumber(u64);

impl PacketNumber {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(value: VarInt) -> Self {
        Self(value.as_u64())
    }

    /// Builds a packet number from a raw value the caller already bounded
    #[inline]
    pub fn from_u64(value: u64) -> Self {
        debug_assert!(value <= MAX_VARINT_VALUE);
        Self(value)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Option<Self> {
        let next = self.0 + 1;
        if next > MAX_VARINT_VALUE {
            None
        } else {
            Some(Self(next))
        }
    }

    /// Truncates the packet number for the wire, relative to the largest
    /// acknowledged packet number.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# The sender MUST use a packet number size able to represent more than
    //# twice as large a range as the difference between the largest
    //# acknowledged packet and the packet number being sent.
    #[inline]
    pub fn truncate(self, largest_acked: Option<PacketNumber>) -> TruncatedPacketNumber {
        let num_unacked = match largest_acked {
            Some(largest) => {
                debug_assert!(largest.0 <= self.0);
                self.0 - largest.0
            }
            None => self.0 + 1,
        };

        let len = match num_unacked {
            0..=0x7f => 1,
            0x80..=0x7fff => 2,
            0x8000..=0x7f_ffff => 3,
            _ => 4,
        };

        TruncatedPacketNumber {
            value: (self.0 & (u32::MAX as u64 >> (32 - len * 8) as u32)) as u32,
            len,
        }
    }
}

/// A packet number as it appears on the wire: 1 to 4 low-order bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    value: u32,
    len: u8,
}

impl TruncatedPacketNumber {
    #[inline]
    pub fn new(value: u32, len: u8) -> Self {
        debug_assert!((1..=4).contains(&len));
        Self { value, len }
    }

    /// Number of bytes on the wire
    #[inline]
    pub fn bytesize(self) -> usize {
        self.len as usize
    }

    /// The value for the low two bits of the packet's first byte
    #[inline]
    pub fn packet_tag_bits(self) -> u8 {
        self.len - 1
    }

    #[inline]
    pub fn into_u64(self) -> u64 {
        self.value as u64
    }

    /// Recovers the full packet number given the largest successfully
    /// processed packet number in the same space.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //# candidate_pn = (expected_pn & ~pn_mask) | truncated_pn
    //# if candidate_pn <= expected_pn - pn_hwin and
    //#    candidate_pn < (1 << 62) - pn_win:
    //#    return candidate_pn + pn_win
    //# if candidate_pn > expected_pn + pn_hwin and
    //#    candidate_pn >= pn_win:
    //#    return candidate_pn - pn_win
    //# return candidate_pn
    pub fn expand(self, largest: Option<PacketNumber>) -> PacketNumber {
        let truncated = self.value as u64;
        let bits = self.len as u64 * 8;

        let expected = match largest {
            Some(largest) => largest.0 + 1,
            None => return PacketNumber(truncated),
        };

        let win = 1u64 << bits;
        let hwin = win / 2;
        let mask = win - 1;
        let candidate = (expected & !mask) | truncated;

        if expected >= hwin && candidate <= expected - hwin && candidate < (1u64 << 62) - win {
            PacketNumber(candidate + win)
        } else if candidate > expected + hwin && candidate >= win {
            PacketNumber(candidate - win)
        } else {
            PacketNumber(candidate)
        }
    }

    #[inline]
    pub fn encode<E: Encoder>(self, encoder: &mut E) {
        let bytes = self.value.to_be_bytes();
        encoder.write_slice(&bytes[4 - self.len as usize..]);
    }

    /// Decodes `len` bytes from the start of `buffer`
    #[inline]
    pub fn decode(buffer: DecoderBuffer<'_>, len: u8) -> DecoderBufferResult<'_, Self> {
        debug_assert!((1..=4).contains(&len));
        let (slice, buffer) = buffer.decode_slice(len as usize)?;
        let mut value = 0u32;
        for byte in slice.as_less_safe_slice() {
            value = value << 8 | *byte as u32;
        }
        Ok((Self { value, len }, buffer))
    }
}

/// Outcome of offering a received packet number to the duplicate filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlidingWindowError {
    Duplicate,
    TooOld,
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-21.4
//# Duplicate suppression keeps state proportional to the reordering
//# window; anything older than the window is treated as a potential
//# replay and dropped.

/// Window size, in packets, over which exact duplicate detection operates
pub const WINDOW_LEN: u64 = 1 << 14;

const WORD_BITS: u64 = u64::BITS as u64;
const WINDOW_WORDS: usize = (WINDOW_LEN / WORD_BITS) as usize;

/// Tracks received packet numbers in a fixed window below the largest seen.
///
/// Packet numbers inside the window are looked up exactly; anything below
/// the window is rejected as too old.
#[derive(Clone, Debug)]
pub struct SlidingWindow {
    largest: Option<u64>,
    words: [u64; WINDOW_WORDS],
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self {
            largest: None,
            words: [0; WINDOW_WORDS],
        }
    }
}

impl SlidingWindow {
    /// Records `packet_number` as received, or reports why it cannot be.
    pub fn insert(&mut self, packet_number: u64) -> Result<(), SlidingWindowError> {
        let largest = match self.largest {
            None => {
                self.largest = Some(packet_number);
                self.set(packet_number);
                return Ok(());
            }
            Some(largest) => largest,
        };

        if packet_number > largest {
            // slide the window forward, clearing the words the new range
            // passes over
            let delta = packet_number - largest;
            if delta >= WINDOW_LEN {
                self.words = [0; WINDOW_WORDS];
            } else {
                for pn in largest + 1..=packet_number {
                    self.clear(pn);
                }
            }
            self.largest = Some(packet_number);
            self.set(packet_number);
            return Ok(());
        }

        if largest - packet_number >= WINDOW_LEN {
            return Err(SlidingWindowError::TooOld);
        }

        if self.get(packet_number) {
            Err(SlidingWindowError::Duplicate)
        } else {
            self.set(packet_number);
            Ok(())
        }
    }

    #[inline]
    fn index(packet_number: u64) -> (usize, u64) {
        let bit = packet_number % WINDOW_LEN;
        ((bit / WORD_BITS) as usize, bit % WORD_BITS)
    }

    #[inline]
    fn set(&mut self, packet_number: u64) {
        let (word, bit) = Self::index(packet_number);
        self.words[word] |= 1 << bit;
    }

    #[inline]
    fn clear(&mut self, packet_number: u64) {
        let (word, bit) = Self::index(packet_number);
        self.words[word] &= !(1 << bit);
    }

    #[inline]
    fn get(&self, packet_number: u64) -> bool {
        let (word, bit) = Self::index(packet_number);
        self.words[word] & (1 << bit) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn truncate_expand_round_trip() {
        check!()
            .with_type::<(u64, u64)>()
            .for_each(|&(largest, pn)| {
                let largest = largest & MAX_VARINT_VALUE;
                let pn = pn & MAX_VARINT_VALUE;
                let (largest, pn) = (largest.min(pn), largest.max(pn));

                let largest = PacketNumber::new(VarInt::new(largest).unwrap());
                let pn = PacketNumber::new(VarInt::new(pn).unwrap());

                let truncated = pn.truncate(Some(largest));
                assert_eq!(truncated.expand(Some(largest)), pn);
            });
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //= type=test
    //# For example, if the highest successfully authenticated packet had a
    //# packet number of 0xa82f30ea, then a packet containing a 16-bit value
    //# of 0x9b32 would be decoded as 0xa82f9b32.
    #[test]
    fn rfc_expansion_example() {
        let largest = PacketNumber(0xa82f30ea);
        let truncated = TruncatedPacketNumber::new(0x9b32, 2);
        assert_eq!(truncated.expand(Some(largest)).as_u64(), 0xa82f9b32);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //= type=test
    //# For example, if an endpoint has received an acknowledgment for packet
    //# 0xabe8b3 and is sending a packet with a number of 0xac5c02, there are
    //# 29,519 (0x734f) outstanding packet numbers.  In order to represent at
    //# least twice this range (59,038 packets, or 0xe69e), 16 bits are
    //# required.
    #[test]
    fn rfc_truncation_example() {
        let largest = PacketNumber(0x00ab_e8b3);
        let pn = PacketNumber(0x00ac_5c02);
        assert_eq!(pn.truncate(Some(largest)).bytesize(), 2);
    }

    #[test]
    fn truncated_codec() {
        let truncated = TruncatedPacketNumber::new(0x0001_0203, 4);
        let bytes = {
            let mut storage = [0u8; 4];
            let mut encoder = fjord_codec::EncoderBuffer::new(&mut storage);
            truncated.encode(&mut encoder);
            storage
        };
        assert_eq!(bytes, [0x00, 0x01, 0x02, 0x03]);

        let (decoded, _) = TruncatedPacketNumber::decode(DecoderBuffer::new(&bytes), 4).unwrap();
        assert_eq!(decoded, truncated);
    }

    #[test]
    fn sliding_window() {
        let mut window = SlidingWindow::default();
        assert_eq!(window.insert(5), Ok(()));
        assert_eq!(window.insert(5), Err(SlidingWindowError::Duplicate));
        assert_eq!(window.insert(3), Ok(()));
        assert_eq!(window.insert(100), Ok(()));
        assert_eq!(window.insert(100), Err(SlidingWindowError::Duplicate));
        assert_eq!(window.insert(3), Err(SlidingWindowError::Duplicate));

        // push 3 out of the window
        assert_eq!(window.insert(WINDOW_LEN + 3), Ok(()));
        assert_eq!(window.insert(3), Err(SlidingWindowError::TooOld));

        // 4 is still inside the window and was never received
        assert_eq!(window.insert(4), Ok(()));
    }

    #[test]
    fn sliding_window_large_jump() {
        let mut window = SlidingWindow::default();
        assert_eq!(window.insert(0), Ok(()));
        assert_eq!(window.insert(10 * WINDOW_LEN), Ok(()));
        assert_eq!(window.insert(0), Err(SlidingWindowError::TooOld));
        assert_eq!(window.insert(10 * WINDOW_LEN - 1), Ok(()));
    }
}
