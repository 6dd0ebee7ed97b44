// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Send-side loss recovery for one packet number space.
//!
//! The RTT estimator, congestion controller, and PTO backoff are shared
//! across spaces and owned by the connection; each manager owns only its
//! space's sent-packet history and timers.

use crate::sync::PacketWaiter;
use core::time::Duration;
use fjord_quic_core::{
    packet::number::PacketNumberSpace,
    recovery::{CongestionController, RttEstimator, K_PACKET_THRESHOLD, MAX_PTO_PROBES},
    time::Timestamp,
    transport,
    varint::VarInt,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Everything remembered about an unacknowledged sent packet
#[derive(Debug)]
pub struct SentPacket {
    pub time_sent: Timestamp,
    pub sent_bytes: u16,
    pub ack_eliciting: bool,
    pub in_flight: bool,
    pub is_mtu_probe: bool,
    /// Largest packet number covered by an ACK frame in this packet
    pub largest_ack_emitted: Option<u64>,
    /// Weak handles to the frame producers riding in this packet
    pub waiters: SmallVec<[PacketWaiter; 2]>,
}

/// What an ACK frame did to this space
#[derive(Debug, Default)]
pub struct AckOutcome {
    /// At least one newly acknowledged packet was ack-eliciting
    pub newly_acked_eliciting: bool,
    /// The largest packet number this frame newly acknowledged
    pub largest_newly_acked: Option<u64>,
    /// The largest `largest_ack_emitted` among newly acknowledged
    /// packets, for pruning the receive-side ACK ranges
    pub acked_ack_threshold: Option<u64>,
    /// A lost packet carried an ACK frame; the ACK needs re-arming
    pub lost_ack_frames: bool,
}

#[derive(Debug)]
pub struct Manager {
    space: PacketNumberSpace,
    sent: BTreeMap<u64, SentPacket>,
    highest_sent: Option<u64>,
    largest_acked: Option<u64>,
    loss_time: Option<Timestamp>,
    time_of_last_eliciting: Option<Timestamp>,
    eliciting_in_flight: usize,
    probes_pending: u8,
}

impl Manager {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            sent: BTreeMap::new(),
            highest_sent: None,
            largest_acked: None,
            loss_time: None,
            time_of_last_eliciting: None,
            eliciting_in_flight: 0,
            probes_pending: 0,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn largest_acked(&self) -> Option<u64> {
        self.largest_acked
    }

    #[inline]
    pub fn has_eliciting_in_flight(&self) -> bool {
        self.eliciting_in_flight > 0
    }

    /// Sum of `sent_bytes` over all in-flight records, for invariant
    /// checking in tests
    pub fn bytes_in_flight(&self) -> u64 {
        self.sent
            .values()
            .filter(|p| p.in_flight)
            .map(|p| p.sent_bytes as u64)
            .sum()
    }

    pub fn on_packet_sent<Cc: CongestionController>(
        &mut self,
        packet_number: u64,
        packet: SentPacket,
        cc: &mut Cc,
    ) {
        debug_assert!(self.highest_sent.map_or(true, |h| packet_number > h));
        self.highest_sent = Some(packet_number);

        if packet.in_flight {
            cc.on_packet_sent(packet.sent_bytes as usize);
            if packet.ack_eliciting {
                self.time_of_last_eliciting = Some(packet.time_sent);
                self.eliciting_in_flight += 1;
            }
        }

        self.sent.insert(packet_number, packet);
    }

    /// Processes one ACK frame's ranges against this space's history.
    ///
    /// `ranges` iterates descending, as decoded off the wire.
    pub fn on_ack_received<Cc, I>(
        &mut self,
        ranges: I,
        ack_delay: Duration,
        now: Timestamp,
        rtt: &mut RttEstimator,
        cc: &mut Cc,
        is_handshake_confirmed: bool,
    ) -> Result<AckOutcome, transport::Error>
    where
        Cc: CongestionController,
        I: Iterator<Item = core::ops::RangeInclusive<VarInt>>,
    {
        let mut outcome = AckOutcome::default();
        let mut frame_largest: Option<u64> = None;
        let mut largest_newly_acked: Option<(u64, Timestamp, bool)> = None;

        for range in ranges {
            let (start, end) = (range.start().as_u64(), range.end().as_u64());
            frame_largest = Some(frame_largest.map_or(end, |l| l.max(end)));

            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
            //# An endpoint SHOULD treat receipt of an acknowledgment for a
            //# packet it did not send as a connection error of type
            //# PROTOCOL_VIOLATION
            if self.highest_sent.map_or(true, |highest| end > highest) {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("acknowledgment for a packet that was never sent"));
            }

            let acked: SmallVec<[u64; 8]> =
                self.sent.range(start..=end).map(|(pn, _)| *pn).collect();

            for pn in acked {
                let packet = self.sent.remove(&pn).expect("pn was just listed");

                if packet.in_flight {
                    cc.on_ack(packet.sent_bytes as usize, packet.time_sent, now);
                    if packet.ack_eliciting {
                        self.eliciting_in_flight -= 1;
                    }
                }
                if packet.ack_eliciting {
                    outcome.newly_acked_eliciting = true;
                }
                if let Some(threshold) = packet.largest_ack_emitted {
                    outcome.acked_ack_threshold = Some(
                        outcome
                            .acked_ack_threshold
                            .map_or(threshold, |t| t.max(threshold)),
                    );
                }
                for waiter in &packet.waiters {
                    waiter.mark_acked();
                }

                if largest_newly_acked.map_or(true, |(l, _, _)| pn > l) {
                    largest_newly_acked = Some((pn, packet.time_sent, packet.ack_eliciting));
                }
            }
        }

        if let (Some((pn, time_sent, eliciting)), Some(frame_largest)) =
            (largest_newly_acked, frame_largest)
        {
            outcome.largest_newly_acked = Some(pn);
            self.largest_acked = Some(self.largest_acked.map_or(frame_largest, |l| l.max(frame_largest)));

            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
            //# An endpoint generates an RTT sample on receiving an ACK frame
            //# that meets the following two conditions:
            //#
            //# *  the largest acknowledged packet number is newly acknowledged
            //#
            //# *  at least one of the newly acknowledged packets was ack-
            //#    eliciting.
            if pn == frame_largest && eliciting {
                let sample = now.saturating_duration_since(time_sent);
                rtt.update(sample, ack_delay, now, self.space, is_handshake_confirmed);
            }
        }

        outcome.lost_ack_frames = self.detect_lost(now, rtt, cc);
        Ok(outcome)
    }

    /// Declares packets lost by time and packet thresholds, returning
    /// whether any of them carried an ACK frame.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
    //# A packet is declared lost if it meets all of the following
    //# conditions:
    //#
    //# *  The packet is unacknowledged, in flight, and was sent prior to an
    //#    acknowledged packet.
    //#
    //# *  The packet was sent kPacketThreshold packets before an
    //#    acknowledged packet (Section 6.1.1), or it was sent long enough in
    //#    the past (Section 6.1.2).
    pub fn detect_lost<Cc: CongestionController>(
        &mut self,
        now: Timestamp,
        rtt: &RttEstimator,
        cc: &mut Cc,
    ) -> bool {
        let Some(largest_acked) = self.largest_acked else {
            return false;
        };

        let delay = rtt.loss_time_threshold();
        self.loss_time = None;

        let mut lost: SmallVec<[u64; 8]> = SmallVec::new();
        for (&pn, packet) in self.sent.iter() {
            if pn > largest_acked {
                break;
            }
            let lost_by_reordering = largest_acked - pn >= K_PACKET_THRESHOLD;
            let loss_deadline = packet.time_sent + delay;
            if lost_by_reordering || now.has_elapsed(loss_deadline) {
                lost.push(pn);
            } else {
                self.loss_time = Some(
                    self.loss_time
                        .map_or(loss_deadline, |t| t.min(loss_deadline)),
                );
            }
        }

        let mut lost_ack_frames = false;
        let mut oldest_lost: Option<Timestamp> = None;
        let mut newest_lost: Option<Timestamp> = None;

        for pn in lost {
            let packet = self.sent.remove(&pn).expect("pn was just listed");
            tracing::debug!(space = ?self.space, packet_number = pn, "packet lost");

            if packet.largest_ack_emitted.is_some() {
                lost_ack_frames = true;
            }
            for waiter in &packet.waiters {
                waiter.mark_lost();
            }
            if packet.in_flight {
                cc.on_packet_lost(
                    packet.sent_bytes as usize,
                    packet.time_sent,
                    packet.is_mtu_probe,
                    now,
                );
                if packet.ack_eliciting {
                    self.eliciting_in_flight -= 1;
                    oldest_lost = Some(oldest_lost.map_or(packet.time_sent, |t| t.min(packet.time_sent)));
                    newest_lost = Some(newest_lost.map_or(packet.time_sent, |t| t.max(packet.time_sent)));
                }
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# A sender establishes persistent congestion after the receipt of
        //# an acknowledgment if two packets that are ack-eliciting are
        //# declared lost, and:
        //# ...
        //# *  the duration between the send times of these two packets
        //#    exceeds the persistent congestion duration
        if let (Some(oldest), Some(newest), Some(first_sample)) =
            (oldest_lost, newest_lost, rtt.first_rtt_sample())
        {
            let span = newest.saturating_duration_since(oldest);
            let survivors_in_span = self.sent.values().any(|p| {
                p.ack_eliciting && p.time_sent >= oldest && p.time_sent <= newest
            });
            if oldest >= first_sample
                && span >= rtt.persistent_congestion_duration()
                && !survivors_in_span
            {
                cc.on_persistent_congestion();
            }
        }

        lost_ack_frames
    }

    /// The deadline of the time-threshold loss timer, if armed
    #[inline]
    pub fn loss_time(&self) -> Option<Timestamp> {
        self.loss_time
    }

    /// The PTO deadline for this space, if ack-eliciting packets are
    /// outstanding
    pub fn pto_deadline(&self, rtt: &RttEstimator, pto_backoff: u32) -> Option<Timestamp> {
        if self.eliciting_in_flight == 0 {
            return None;
        }
        let last = self.time_of_last_eliciting?;
        Some(last + rtt.pto_period(pto_backoff, self.space))
    }

    /// Arms probe transmission after a PTO fired for this space
    pub fn on_pto(&mut self) {
        self.probes_pending = MAX_PTO_PROBES;
    }

    /// Takes one pending probe, if armed
    pub fn take_probe(&mut self) -> bool {
        if self.probes_pending > 0 {
            self.probes_pending -= 1;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn probes_pending(&self) -> bool {
        self.probes_pending > 0
    }

    /// Discards the space's entire history, crediting the congestion
    /// controller. Outstanding waiters observe neither ack nor loss.
    pub fn discard<Cc: CongestionController>(&mut self, cc: &mut Cc) {
        for (_, packet) in core::mem::take(&mut self.sent) {
            if packet.in_flight {
                cc.on_packet_discarded(packet.sent_bytes as usize);
            }
        }
        self.eliciting_in_flight = 0;
        self.loss_time = None;
        self.time_of_last_eliciting = None;
        self.probes_pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AckOutcome as TokenOutcome, AckToken};
    use fjord_quic_core::recovery::NewReno;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn packet(time: Timestamp, eliciting: bool) -> SentPacket {
        SentPacket {
            time_sent: time,
            sent_bytes: 1200,
            ack_eliciting: eliciting,
            in_flight: true,
            is_mtu_probe: false,
            largest_ack_emitted: None,
            waiters: SmallVec::new(),
        }
    }

    fn ranges(list: &[(u64, u64)]) -> impl Iterator<Item = core::ops::RangeInclusive<VarInt>> + '_ {
        list.iter().map(|&(start, end)| {
            VarInt::new(start).unwrap()..=VarInt::new(end).unwrap()
        })
    }

    #[test]
    fn ack_removes_and_samples_rtt() {
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        let mut rtt = RttEstimator::default();
        let mut cc = NewReno::new(1200);

        manager.on_packet_sent(0, packet(now(0), true), &mut cc);
        manager.on_packet_sent(1, packet(now(1), true), &mut cc);
        assert_eq!(manager.bytes_in_flight(), 2400);
        assert_eq!(cc.bytes_in_flight(), 2400);

        let outcome = manager
            .on_ack_received(
                ranges(&[(0, 1)]),
                Duration::ZERO,
                now(101),
                &mut rtt,
                &mut cc,
                false,
            )
            .unwrap();

        assert!(outcome.newly_acked_eliciting);
        assert_eq!(manager.bytes_in_flight(), 0);
        assert_eq!(cc.bytes_in_flight(), 0);
        // sample = 101 - 1
        assert_eq!(rtt.latest_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn ack_of_unsent_packet_is_a_protocol_violation() {
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        let mut rtt = RttEstimator::default();
        let mut cc = NewReno::new(1200);

        manager.on_packet_sent(0, packet(now(0), true), &mut cc);
        let result = manager.on_ack_received(
            ranges(&[(0, 5)]),
            Duration::ZERO,
            now(10),
            &mut rtt,
            &mut cc,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn packet_threshold_loss() {
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        let mut rtt = RttEstimator::default();
        let mut cc = NewReno::new(1200);

        let token = AckToken::new();
        let mut lost_packet = packet(now(0), true);
        lost_packet.waiters.push(token.waiter());

        manager.on_packet_sent(0, lost_packet, &mut cc);
        for pn in 1..=3 {
            manager.on_packet_sent(pn, packet(now(pn), true), &mut cc);
        }

        // acking packet 3 leaves packet 0 three behind: lost
        manager
            .on_ack_received(
                ranges(&[(3, 3)]),
                Duration::ZERO,
                now(50),
                &mut rtt,
                &mut cc,
                false,
            )
            .unwrap();

        assert_eq!(token.outcome(), TokenOutcome::Lost);
        // packets 1 and 2 are within the threshold and not past the time
        // threshold, so a loss timer is armed
        assert!(manager.loss_time().is_some());
    }

    #[test]
    fn time_threshold_loss() {
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        let mut rtt = RttEstimator::default();
        let mut cc = NewReno::new(1200);

        manager.on_packet_sent(0, packet(now(0), true), &mut cc);
        manager.on_packet_sent(1, packet(now(1000), true), &mut cc);

        manager
            .on_ack_received(
                ranges(&[(1, 1)]),
                Duration::ZERO,
                now(1100),
                &mut rtt,
                &mut cc,
                false,
            )
            .unwrap();

        // packet 0 was sent far longer than 9/8 rtt ago
        assert_eq!(manager.bytes_in_flight(), 0);
    }

    #[test]
    fn pto_deadline_follows_last_eliciting_send() {
        let mut manager = Manager::new(PacketNumberSpace::Handshake);
        let rtt = RttEstimator::default();
        let mut cc = NewReno::new(1200);

        assert_eq!(manager.pto_deadline(&rtt, 1), None);

        manager.on_packet_sent(0, packet(now(10), true), &mut cc);
        let deadline = manager.pto_deadline(&rtt, 1).unwrap();
        assert_eq!(deadline, now(10) + rtt.pto_period(1, PacketNumberSpace::Handshake));

        manager.on_pto();
        assert!(manager.take_probe());
        assert!(manager.take_probe());
        assert!(!manager.take_probe());
    }

    #[test]
    fn discard_credits_the_controller() {
        let mut manager = Manager::new(PacketNumberSpace::Initial);
        let mut cc = NewReno::new(1200);

        manager.on_packet_sent(0, packet(now(0), true), &mut cc);
        manager.on_packet_sent(1, packet(now(1), true), &mut cc);
        assert_eq!(cc.bytes_in_flight(), 2400);

        manager.discard(&mut cc);
        assert_eq!(cc.bytes_in_flight(), 0);
        assert!(!manager.has_eliciting_in_flight());
        assert_eq!(manager.pto_deadline(&RttEstimator::default(), 1), None);
    }
}
