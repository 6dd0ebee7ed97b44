// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Receive-side acknowledgment state for one packet number space

use core::time::Duration;
use fjord_quic_core::{
    ack::Ranges,
    connection::limits::DEFAULT_MAX_ACK_DELAY,
    frame,
    packet::number::{SlidingWindow, SlidingWindowError},
    time::Timestamp,
    varint::VarInt,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.2
//# A receiver SHOULD send an ACK frame after receiving at least two
//# ack-eliciting packets.
const ACK_ELICITING_THRESHOLD: u8 = 2;

const RANGES_LIMIT: usize = 10;

#[derive(Debug)]
pub struct AckManager {
    window: SlidingWindow,
    ranges: Ranges,
    /// Largest packet number processed, for truncated PN expansion
    largest_received: Option<u64>,
    /// Receive time of the oldest ack-eliciting packet awaiting an ACK
    earliest_eliciting: Option<Timestamp>,
    eliciting_since_ack: u8,
    /// ACKs in Initial and Handshake are never intentionally delayed
    immediate: bool,
    /// The local commitment carried in max_ack_delay
    max_ack_delay: Duration,
    /// 2^exponent scaling applied to encoded delays
    ack_delay_exponent: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The packet is new and must be processed
    New,
    /// A duplicate or too-old packet to drop silently
    Drop,
}

impl AckManager {
    pub fn new(immediate: bool, ack_delay_exponent: u8) -> Self {
        Self {
            window: SlidingWindow::default(),
            ranges: Ranges::new(RANGES_LIMIT),
            largest_received: None,
            earliest_eliciting: None,
            eliciting_since_ack: 0,
            immediate,
            max_ack_delay: DEFAULT_MAX_ACK_DELAY,
            ack_delay_exponent,
        }
    }

    #[inline]
    pub fn largest_received(&self) -> Option<u64> {
        self.largest_received
    }

    /// Consults the duplicate filter for a successfully decrypted packet.
    ///
    /// Duplicates and packets older than the tracking window are
    /// reported as [`Outcome::Drop`] and must not be processed further.
    pub fn on_packet_number(&mut self, packet_number: u64) -> Outcome {
        match self.window.insert(packet_number) {
            Err(SlidingWindowError::Duplicate) | Err(SlidingWindowError::TooOld) => Outcome::Drop,
            Ok(()) => {
                self.largest_received = Some(
                    self.largest_received
                        .map_or(packet_number, |largest| largest.max(packet_number)),
                );
                Outcome::New
            }
        }
    }

    /// Records a fully processed packet for acknowledgment generation.
    /// Whether it was ack-eliciting is only known once its frames have
    /// been walked.
    pub fn on_packet_processed(&mut self, packet_number: u64, ack_eliciting: bool, now: Timestamp) {
        self.ranges.insert(packet_number);

        if ack_eliciting {
            self.earliest_eliciting.get_or_insert(now);
            self.eliciting_since_ack = self.eliciting_since_ack.saturating_add(1);
        }
    }

    /// Convenience for the common decrypt-then-process path
    pub fn on_packet_received(
        &mut self,
        packet_number: u64,
        ack_eliciting: bool,
        now: Timestamp,
    ) -> Outcome {
        match self.on_packet_number(packet_number) {
            Outcome::Drop => Outcome::Drop,
            Outcome::New => {
                self.on_packet_processed(packet_number, ack_eliciting, now);
                Outcome::New
            }
        }
    }

    /// When an ACK must leave, if one is owed at all
    pub fn ack_deadline(&self) -> Option<Timestamp> {
        let earliest = self.earliest_eliciting?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
        //# An endpoint MUST acknowledge all ack-eliciting Initial and
        //# Handshake packets immediately
        if self.immediate || self.eliciting_since_ack >= ACK_ELICITING_THRESHOLD {
            return Some(earliest);
        }

        Some(earliest + self.max_ack_delay)
    }

    pub fn should_transmit(&self, now: Timestamp) -> bool {
        self.ack_deadline()
            .map_or(false, |deadline| now.has_elapsed(deadline))
            && !self.ranges.is_empty()
    }

    /// True if an ACK may ride along in a packet being assembled anyway
    pub fn can_piggyback(&self) -> bool {
        self.earliest_eliciting.is_some() && !self.ranges.is_empty()
    }

    /// True if there is anything to acknowledge at all
    pub fn has_ranges(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Builds the ACK frame and resets the transmission state.
    ///
    /// Returns the frame and the largest acknowledged packet number, which
    /// the caller attaches to the sent-packet record so the acknowledged
    /// ranges can be pruned once the peer sees them.
    pub fn transmit(&mut self, now: Timestamp) -> Option<(frame::Ack<Ranges>, u64)> {
        let largest = self.ranges.max_value()?;

        let delay = self
            .earliest_eliciting
            .map(|earliest| now.saturating_duration_since(earliest))
            .unwrap_or_default();
        let delay = (delay.as_micros() as u64) >> self.ack_delay_exponent;

        let frame = frame::Ack {
            ack_delay: VarInt::new(delay).unwrap_or(VarInt::MAX),
            ack_ranges: self.ranges.clone(),
            ecn_counts: None,
        };

        self.earliest_eliciting = None;
        self.eliciting_since_ack = 0;

        Some((frame, largest))
    }

    /// The peer acknowledged a packet of ours whose ACK frame covered
    /// packets up to `largest_acked_in_frame`; stop re-acknowledging them.
    pub fn on_ack_frame_acked(&mut self, largest_acked_in_frame: u64) {
        self.ranges.remove_le(largest_acked_in_frame);
    }

    /// An ACK-bearing packet of ours was lost; make sure a fresh ACK goes
    /// out promptly.
    pub fn on_ack_frame_lost(&mut self, now: Timestamp) {
        if !self.ranges.is_empty() && self.earliest_eliciting.is_none() {
            self.earliest_eliciting = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut manager = AckManager::new(false, 3);
        assert_eq!(manager.on_packet_received(3, true, now(1)), Outcome::New);
        assert_eq!(manager.on_packet_received(3, true, now(2)), Outcome::Drop);
        assert_eq!(manager.largest_received(), Some(3));
    }

    #[test]
    fn application_acks_are_delayed() {
        let mut manager = AckManager::new(false, 3);
        manager.on_packet_received(0, true, now(10));

        let deadline = manager.ack_deadline().unwrap();
        assert_eq!(deadline, now(10) + DEFAULT_MAX_ACK_DELAY);
        assert!(!manager.should_transmit(now(11)));
        assert!(manager.should_transmit(deadline));
    }

    #[test]
    fn second_eliciting_packet_forces_immediate_ack() {
        let mut manager = AckManager::new(false, 3);
        manager.on_packet_received(0, true, now(10));
        manager.on_packet_received(1, true, now(11));
        assert!(manager.should_transmit(now(11)));
    }

    #[test]
    fn handshake_spaces_ack_immediately() {
        let mut manager = AckManager::new(true, 3);
        manager.on_packet_received(0, true, now(10));
        assert!(manager.should_transmit(now(10)));
    }

    #[test]
    fn non_eliciting_packets_do_not_force_acks() {
        let mut manager = AckManager::new(false, 3);
        manager.on_packet_received(0, false, now(10));
        assert_eq!(manager.ack_deadline(), None);
        // but they are still acknowledged opportunistically
        assert!(manager.can_piggyback() || manager.transmit(now(10)).is_some());
    }

    #[test]
    fn transmit_encodes_delay_and_prunes_on_ack() {
        let mut manager = AckManager::new(false, 3);
        manager.on_packet_received(0, true, now(10));
        manager.on_packet_received(1, true, now(11));
        manager.on_packet_received(5, true, now(12));

        let (frame, largest) = manager.transmit(now(18)).unwrap();
        assert_eq!(largest, 5);
        // 8ms scaled down by 2^3
        assert_eq!(frame.ack_delay.as_u64(), 1000);

        manager.on_ack_frame_acked(largest);
        assert!(manager.transmit(now(20)).is_none());

        // duplicates of pruned packets are still detected
        assert_eq!(manager.on_packet_received(5, true, now(21)), Outcome::Drop);
    }
}
