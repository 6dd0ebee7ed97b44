// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{recovery::RttEstimator, time::Timestamp};
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# A perfectly paced sender spreads packets exactly evenly over time.
//# For a window-based congestion controller, such as the one in this
//# document, that rate can be computed by averaging the congestion
//# window over the RTT:
//#
//# rate = N * congestion_window / smoothed_rtt

/// The default pacing gain N/D. RFC 9002 recommends using a value a
/// little over 1 so short-term variations do not hold back transmission.
pub const DEFAULT_GAIN: (u64, u64) = (5, 4);

/// How far ahead of steady-state rate the bucket may fill
const BURST_INTERVAL: Duration = Duration::from_millis(2);

/// The minimum burst allowance, in packets
const MIN_BURST_PACKETS: u64 = 10;

/// A token-bucket pacer spreading transmissions over the RTT.
///
/// Tokens replenish at `gain * cwnd / smoothed_rtt` bytes per second and
/// cap at a small burst allowance, so an idle connection can immediately
/// send a handful of packets but sustained sending follows the rate.
#[derive(Clone, Debug)]
pub struct Pacer {
    budget: u64,
    last_update: Option<Timestamp>,
    gain: (u64, u64),
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

impl Pacer {
    pub fn new(gain: (u64, u64)) -> Self {
        debug_assert!(gain.0 > 0 && gain.1 > 0);
        Self {
            budget: 0,
            last_update: None,
            gain,
        }
    }

    /// Bytes per second at the current window and RTT estimate
    fn rate(&self, rtt: &RttEstimator, congestion_window: u64) -> u64 {
        let smoothed = rtt.smoothed_rtt().as_micros().max(1) as u64;
        (self.gain.0 * congestion_window)
            .saturating_mul(1_000_000)
            .checked_div(self.gain.1 * smoothed)
            .unwrap_or(u64::MAX)
            .max(1)
    }

    fn burst_capacity(&self, rate: u64, max_datagram_size: u16) -> u64 {
        let burst = rate * BURST_INTERVAL.as_micros() as u64 / 1_000_000;
        burst.max(MIN_BURST_PACKETS * max_datagram_size as u64)
    }

    fn budget_at(
        &self,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_window: u64,
        max_datagram_size: u16,
    ) -> u64 {
        let rate = self.rate(rtt, congestion_window);
        let capacity = self.burst_capacity(rate, max_datagram_size);
        match self.last_update {
            // a sender that has never sent may burst immediately
            None => capacity,
            Some(last_update) => {
                let elapsed = now.saturating_duration_since(last_update);
                let refill = rate.saturating_mul(elapsed.as_micros() as u64) / 1_000_000;
                self.budget.saturating_add(refill).min(capacity)
            }
        }
    }

    /// Records a transmission of `bytes` at `now`
    pub fn on_packet_sent(
        &mut self,
        now: Timestamp,
        bytes: usize,
        rtt: &RttEstimator,
        congestion_window: u64,
        max_datagram_size: u16,
    ) {
        self.budget = self
            .budget_at(now, rtt, congestion_window, max_datagram_size)
            .saturating_sub(bytes as u64);
        self.last_update = Some(now);
    }

    /// When the next packet may depart. `None` means immediately.
    pub fn next_transmission_time(
        &self,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_window: u64,
        max_datagram_size: u16,
    ) -> Option<Timestamp> {
        let budget = self.budget_at(now, rtt, congestion_window, max_datagram_size);
        let needed = (max_datagram_size as u64).saturating_sub(budget);
        if needed == 0 {
            return None;
        }

        let rate = self.rate(rtt, congestion_window);
        let delay_micros = (needed.saturating_mul(1_000_000) / rate).max(1);
        Some(now + Duration::from_micros(delay_micros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::number::PacketNumberSpace;

    const MSS: u16 = 1200;

    fn now(micros: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_micros(micros))
    }

    fn rtt_of(millis: u64) -> RttEstimator {
        let mut rtt = RttEstimator::default();
        rtt.update(
            Duration::from_millis(millis),
            Duration::ZERO,
            now(1),
            PacketNumberSpace::ApplicationData,
            false,
        );
        rtt
    }

    #[test]
    fn initial_burst_is_allowed() {
        let pacer = Pacer::default();
        let rtt = rtt_of(100);
        assert_eq!(pacer.next_transmission_time(now(10), &rtt, 12_000, MSS), None);
    }

    #[test]
    fn sustained_sending_is_delayed() {
        let mut pacer = Pacer::default();
        let rtt = rtt_of(100);
        let cwnd = 12_000u64;

        // drain the burst allowance
        let mut time = now(10);
        while pacer.next_transmission_time(time, &rtt, cwnd, MSS).is_none() {
            pacer.on_packet_sent(time, MSS as usize, &rtt, cwnd, MSS);
        }

        let next = pacer
            .next_transmission_time(time, &rtt, cwnd, MSS)
            .expect("pacer should throttle after the burst");
        assert!(next > time);

        // once the departure time arrives the budget has replenished
        time = next;
        assert_eq!(pacer.next_transmission_time(time, &rtt, cwnd, MSS), None);
    }

    #[test]
    fn rate_follows_gain() {
        let pacer = Pacer::new((5, 4));
        let rtt = rtt_of(100);
        // 5/4 * 12000 bytes per 100ms = 150_000 bytes/s
        assert_eq!(pacer.rate(&rtt, 12_000), 150_000);

        let unity = Pacer::new((1, 1));
        assert_eq!(unity.rate(&rtt, 12_000), 120_000);
    }
}
