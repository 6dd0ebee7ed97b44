// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumberSpace,
    recovery::{DEFAULT_INITIAL_RTT, K_GRANULARITY},
    time::Timestamp,
};
use core::{
    cmp::{max, min},
    time::Duration,
};

/// The lowest RTT value the estimator tracks
pub const MIN_RTT: Duration = Duration::from_micros(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    latest_rtt: Duration,
    min_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    /// The peer's max_ack_delay transport parameter, applied once the
    /// handshake is confirmed
    max_ack_delay: Duration,
    first_rtt_sample: Option<Timestamp>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
    //# smoothed_rtt and rttvar are initialized as follows, where kInitialRtt
    //# contains the initial RTT value:
    //#
    //# smoothed_rtt = kInitialRtt
    //# rttvar = kInitialRtt / 2
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_rtt = initial_rtt.max(MIN_RTT);
        Self {
            latest_rtt: initial_rtt,
            min_rtt: initial_rtt,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            max_ack_delay: Duration::ZERO,
            first_rtt_sample: None,
        }
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    /// Applies the peer's `max_ack_delay` transport parameter
    pub fn on_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.max_ack_delay = max_ack_delay;
    }

    /// Incorporates a new RTT sample.
    ///
    /// The sample must come from an acknowledgment whose largest
    /// acknowledged packet was newly acknowledged and ack-eliciting.
    pub fn update(
        &mut self,
        rtt_sample: Duration,
        mut ack_delay: Duration,
        now: Timestamp,
        space: PacketNumberSpace,
        is_handshake_confirmed: bool,
    ) {
        self.latest_rtt = rtt_sample.max(MIN_RTT);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the latest_rtt on the first RTT sample.
        if self.first_rtt_sample.is_none() {
            self.first_rtt_sample = Some(now);
            self.min_rtt = self.latest_rtt;
            self.smoothed_rtt = self.latest_rtt;
            self.rttvar = self.latest_rtt / 2;
            return;
        }

        self.min_rtt = min(self.min_rtt, self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MAY ignore the acknowledgment delay for Initial packets, since
        //#    these acknowledgments are not delayed by the peer (Section
        //#    13.2.1 of [QUIC-TRANSPORT]);
        if space.is_initial() {
            ack_delay = Duration::ZERO;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST use the lesser of the acknowledgment delay and the peer's
        //#    max_ack_delay after the handshake is confirmed;
        if is_handshake_confirmed {
            ack_delay = min(ack_delay, self.max_ack_delay);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        let mut adjusted_rtt = self.latest_rtt;
        if self.min_rtt + ack_delay <= self.latest_rtt {
            adjusted_rtt -= ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        let rttvar_sample = if self.smoothed_rtt > adjusted_rtt {
            self.smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - self.smoothed_rtt
        };
        self.rttvar = (3 * self.rttvar + rttvar_sample) / 4;
        self.smoothed_rtt = (7 * self.smoothed_rtt + adjusted_rtt) / 8;
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    pub fn pto_period(&self, pto_backoff: u32, space: PacketNumberSpace) -> Duration {
        let mut period = self.smoothed_rtt;
        period += max(4 * self.rttvar, K_GRANULARITY);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number
        //# spaces, the max_ack_delay in the PTO period computation is set to
        //# 0, since the peer is expected to not delay these packets
        //# intentionally; see Section 13.2.1 of [QUIC-TRANSPORT].
        if space.is_application_data() {
            period += self.max_ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# Even when there are ack-eliciting packets in flight in multiple
        //# packet number spaces, the exponential increase in PTO occurs
        //# across all spaces to prevent excess load on the network.
        period * pto_backoff
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
    //# The time threshold is:
    //#
    //# max(kTimeThreshold * max(smoothed_rtt, latest_rtt), kGranularity)
    //#
    //# ...The RECOMMENDED time threshold (kTimeThreshold), expressed as an
    //# RTT multiplier, is 9/8.
    pub fn loss_time_threshold(&self) -> Duration {
        max(
            max(self.smoothed_rtt, self.latest_rtt) * 9 / 8,
            K_GRANULARITY,
        )
    }

    /// The span of lost packets required for persistent congestion
    ///
    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
    //# (smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay) *
    //# kPersistentCongestionThreshold
    pub fn persistent_congestion_duration(&self) -> Duration {
        (self.smoothed_rtt + max(4 * self.rttvar, K_GRANULARITY) + self.max_ack_delay)
            * crate::recovery::K_PERSISTENT_CONGESTION_THRESHOLD
    }
}
