// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;

/// A pluggable congestion controller.
///
/// The recovery manager reports sends, acknowledgments, losses, and
/// discards; the controller answers with a window.
pub trait CongestionController: 'static + core::fmt::Debug + Send {
    fn congestion_window(&self) -> u64;

    fn bytes_in_flight(&self) -> u64;

    #[inline]
    fn available_congestion_window(&self) -> u64 {
        self.congestion_window().saturating_sub(self.bytes_in_flight())
    }

    /// An in-flight packet of `bytes` was transmitted
    fn on_packet_sent(&mut self, bytes: usize);

    /// An in-flight packet was newly acknowledged
    fn on_ack(&mut self, bytes: usize, sent_time: Timestamp, now: Timestamp);

    /// An in-flight packet was declared lost. MTU probe losses carry
    /// `is_mtu_probe` and do not shrink the window.
    fn on_packet_lost(&mut self, bytes: usize, sent_time: Timestamp, is_mtu_probe: bool, now: Timestamp);

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
    //# When persistent congestion is declared, the sender's congestion
    //# window MUST be reduced to the minimum congestion window
    //# (kMinimumWindow)
    fn on_persistent_congestion(&mut self);

    /// An in-flight packet was discarded with its packet number space,
    /// neither acknowledged nor lost
    fn on_packet_discarded(&mut self, bytes: usize);
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion window of ten times the
//# maximum datagram size (max_datagram_size), while limiting the window
//# to the larger of 14,720 bytes or twice the maximum datagram size.
fn initial_window(max_datagram_size: u16) -> u64 {
    let mss = max_datagram_size as u64;
    (10 * mss).min((14_720u64).max(2 * mss))
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The RECOMMENDED value is 2 * max_datagram_size.
fn minimum_window(max_datagram_size: u16) -> u64 {
    2 * max_datagram_size as u64
}

/// The default NewReno-family controller of RFC 9002 §7
#[derive(Clone, Debug)]
pub struct NewReno {
    congestion_window: u64,
    slow_start_threshold: u64,
    bytes_in_flight: u64,
    recovery_start_time: Option<Timestamp>,
    max_datagram_size: u16,
}

impl NewReno {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            congestion_window: initial_window(max_datagram_size),
            slow_start_threshold: u64::MAX,
            bytes_in_flight: 0,
            recovery_start_time: None,
            max_datagram_size,
        }
    }

    #[inline]
    pub fn is_in_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //# A recovery period ends and the sender enters congestion avoidance
    //# when a packet sent during the recovery period is acknowledged.
    #[inline]
    fn is_in_recovery(&self, sent_time: Timestamp) -> bool {
        self.recovery_start_time
            .map_or(false, |recovery_start| sent_time <= recovery_start)
    }
}

impl CongestionController for NewReno {
    #[inline]
    fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    #[inline]
    fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    fn on_packet_sent(&mut self, bytes: usize) {
        self.bytes_in_flight += bytes as u64;
    }

    fn on_ack(&mut self, bytes: usize, sent_time: Timestamp, _now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u64);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# While in congestion recovery, the congestion window remains
        //# unchanged irrespective of new losses or increases in the ECN-CE
        //# counter.
        if self.is_in_recovery(sent_time) {
            return;
        }

        if self.is_in_slow_start() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
            //# While a sender is in slow start, the congestion window
            //# increases by the number of bytes acknowledged
            self.congestion_window += bytes as u64;
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9002#appendix-B.5
            //# AIMD approach that increases the congestion window by one
            //# maximum datagram size for each congestion window that is
            //# acknowledged
            self.congestion_window +=
                self.max_datagram_size as u64 * bytes as u64 / self.congestion_window;
        }
    }

    fn on_packet_lost(
        &mut self,
        bytes: usize,
        sent_time: Timestamp,
        is_mtu_probe: bool,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u64);

        // the loss of an MTU probe is expected and says nothing about
        // congestion
        if is_mtu_probe {
            return;
        }

        if self.is_in_recovery(sent_time) {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# On entering a recovery period, a sender MUST set the slow start
        //# threshold to half the value of the congestion window when loss is
        //# detected.
        self.recovery_start_time = Some(now);
        self.slow_start_threshold = self.congestion_window / 2;
        self.congestion_window = self
            .slow_start_threshold
            .max(minimum_window(self.max_datagram_size));
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = minimum_window(self.max_datagram_size);
        self.recovery_start_time = None;
    }

    fn on_packet_discarded(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    const MSS: u16 = 1200;

    #[test]
    fn initial_window_bounds() {
        assert_eq!(initial_window(1200), 12_000);
        assert_eq!(initial_window(9000), 18_000);
    }

    #[test]
    fn slow_start_grows_by_acked_bytes() {
        let mut cc = NewReno::new(MSS);
        let initial = cc.congestion_window();

        cc.on_packet_sent(1000);
        assert_eq!(cc.bytes_in_flight(), 1000);

        cc.on_ack(1000, now(1), now(2));
        assert_eq!(cc.congestion_window(), initial + 1000);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn loss_halves_window_once_per_round() {
        let mut cc = NewReno::new(MSS);
        let initial = cc.congestion_window();

        cc.on_packet_sent(1000);
        cc.on_packet_sent(1000);
        cc.on_packet_lost(1000, now(1), false, now(10));
        assert_eq!(cc.congestion_window(), initial / 2);

        // second loss from the same send round stays in the same recovery
        cc.on_packet_lost(1000, now(2), false, now(11));
        assert_eq!(cc.congestion_window(), initial / 2);
        assert!(!cc.is_in_slow_start());
    }

    #[test]
    fn recovery_suppresses_growth() {
        let mut cc = NewReno::new(MSS);
        cc.on_packet_sent(1000);
        cc.on_packet_lost(500, now(5), false, now(10));
        let window = cc.congestion_window();

        // acknowledgment of a pre-recovery packet changes nothing
        cc.on_ack(500, now(9), now(12));
        assert_eq!(cc.congestion_window(), window);

        // acknowledgment of a post-recovery packet resumes growth
        cc.on_packet_sent(800);
        cc.on_ack(800, now(11), now(13));
        assert!(cc.congestion_window() > window);
    }

    #[test]
    fn mtu_probe_loss_is_ignored() {
        let mut cc = NewReno::new(MSS);
        let initial = cc.congestion_window();
        cc.on_packet_sent(1400);
        cc.on_packet_lost(1400, now(1), true, now(2));
        assert_eq!(cc.congestion_window(), initial);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn persistent_congestion_collapses_window() {
        let mut cc = NewReno::new(MSS);
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), 2 * MSS as u64);
        assert!(cc.is_in_slow_start());
    }

    #[test]
    fn window_is_never_negative() {
        let mut cc = NewReno::new(MSS);
        // discard more than was recorded
        cc.on_packet_discarded(10_000);
        assert_eq!(cc.bytes_in_flight(), 0);
    }
}
