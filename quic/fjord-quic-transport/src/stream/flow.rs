// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flow control limiters, used at stream and connection scope

use fjord_quic_core::{transport, varint::VarInt};

/// Tracks how much the peer allows us to send.
///
/// Limits only ever increase; a MAX_DATA or MAX_STREAM_DATA below the
/// current limit is ignored.
#[derive(Clone, Copy, Debug)]
pub struct TxLimiter {
    sent: VarInt,
    limit: VarInt,
    /// The limit value at which we last reported being blocked, so each
    /// limit is reported at most once
    blocked_reported: Option<VarInt>,
}

impl TxLimiter {
    pub fn new(limit: VarInt) -> Self {
        Self {
            sent: VarInt::ZERO,
            limit,
            blocked_reported: None,
        }
    }

    #[inline]
    pub fn sent(&self) -> VarInt {
        self.sent
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    /// Bytes that may still be sent under the current limit
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit.as_u64() - self.sent.as_u64()
    }

    /// Consumes `bytes` of credit; the caller must have checked
    /// [`available`](Self::available)
    pub fn on_data_sent(&mut self, bytes: usize) {
        debug_assert!(bytes as u64 <= self.available());
        self.sent = self.sent.saturating_add(
            VarInt::try_from(bytes).unwrap_or(VarInt::MAX),
        );
    }

    /// Applies a MAX_DATA / MAX_STREAM_DATA announcement
    pub fn on_limit(&mut self, limit: VarInt) {
        if limit > self.limit {
            self.limit = limit;
            self.blocked_reported = None;
        }
    }

    /// The limit to carry in a BLOCKED frame, if the producer is stopped
    /// exactly at the limit and that fact has not been reported yet
    pub fn blocked_signal(&mut self, has_pending_data: bool) -> Option<VarInt> {
        if !has_pending_data || self.available() > 0 {
            return None;
        }
        if self.blocked_reported == Some(self.limit) {
            return None;
        }
        self.blocked_reported = Some(self.limit);
        Some(self.limit)
    }
}

/// Tracks how much we allow the peer to send, and issues window updates.
#[derive(Clone, Copy, Debug)]
pub struct RxLimiter {
    /// Highest received offset (stream scope) or cumulative received
    /// bytes (connection scope)
    received: VarInt,
    /// Bytes handed to the application
    consumed: VarInt,
    limit: VarInt,
    window: VarInt,
    pending_update: bool,
}

impl RxLimiter {
    pub fn new(window: VarInt) -> Self {
        Self {
            received: VarInt::ZERO,
            consumed: VarInt::ZERO,
            limit: window,
            window,
            pending_update: false,
        }
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    #[inline]
    pub fn received(&self) -> VarInt {
        self.received
    }

    /// Accounts for newly received data up to `total`; errors if the peer
    /// exceeded the advertised limit
    pub fn on_data_received(&mut self, total: VarInt) -> Result<(), transport::Error> {
        if total > self.limit {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
            //# A receiver MUST close the connection with an error of type
            //# FLOW_CONTROL_ERROR if the sender violates the advertised
            //# connection or stream data limits
            return Err(transport::Error::FLOW_CONTROL_ERROR);
        }
        self.received = self.received.max(total);
        Ok(())
    }

    /// Accounts for `delta` additional received bytes (connection scope,
    /// where offsets from different streams accumulate)
    pub fn on_data_received_delta(&mut self, delta: u64) -> Result<(), transport::Error> {
        let total = self
            .received
            .checked_add(VarInt::new(delta).map_err(|_| transport::Error::FLOW_CONTROL_ERROR)?)
            .ok_or(transport::Error::FLOW_CONTROL_ERROR)?;
        self.on_data_received(total)
    }

    /// Releases credit after the application consumed `bytes`
    pub fn on_data_consumed(&mut self, bytes: usize) {
        self.consumed = self
            .consumed
            .saturating_add(VarInt::try_from(bytes).unwrap_or(VarInt::MAX));

        // announce a new window once half of the current one is consumed
        let next_limit = self.consumed.saturating_add(self.window);
        if next_limit.as_u64() >= self.limit.as_u64() + self.window.as_u64() / 2 {
            self.limit = next_limit;
            self.pending_update = true;
        }
    }

    /// True if a window update is waiting to be announced
    #[inline]
    pub fn has_update(&self) -> bool {
        self.pending_update
    }

    /// The limit to announce in a MAX_DATA / MAX_STREAM_DATA frame, if an
    /// update is due
    pub fn take_update(&mut self) -> Option<VarInt> {
        if self.pending_update {
            self.pending_update = false;
            Some(self.limit)
        } else {
            None
        }
    }

    /// Re-arms the announcement, e.g. when the frame carrying it was lost
    pub fn retransmit_update(&mut self) {
        self.pending_update = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_limit_is_enforced_and_raised() {
        let mut tx = TxLimiter::new(VarInt::from_u8(100));
        assert_eq!(tx.available(), 100);
        tx.on_data_sent(100);
        assert_eq!(tx.available(), 0);

        // blocked exactly at the limit, reported once
        assert_eq!(tx.blocked_signal(true), Some(VarInt::from_u8(100)));
        assert_eq!(tx.blocked_signal(true), None);

        // a lower "update" is ignored
        tx.on_limit(VarInt::from_u8(50));
        assert_eq!(tx.available(), 0);

        tx.on_limit(VarInt::from_u16(250));
        assert_eq!(tx.available(), 150);
        // not blocked anymore
        assert_eq!(tx.blocked_signal(true), None);
    }

    #[test]
    fn blocked_needs_pending_data() {
        let mut tx = TxLimiter::new(VarInt::ZERO);
        assert_eq!(tx.blocked_signal(false), None);
        assert_eq!(tx.blocked_signal(true), Some(VarInt::ZERO));
    }

    #[test]
    fn rx_violation_is_detected() {
        let mut rx = RxLimiter::new(VarInt::from_u8(100));
        assert!(rx.on_data_received(VarInt::from_u8(100)).is_ok());
        assert!(rx.on_data_received(VarInt::from_u8(101)).is_err());
    }

    #[test]
    fn rx_window_updates_after_consumption() {
        let mut rx = RxLimiter::new(VarInt::from_u8(100));
        rx.on_data_received(VarInt::from_u8(100)).unwrap();
        assert_eq!(rx.take_update(), None);

        rx.on_data_consumed(80);
        let update = rx.take_update().expect("an update is due");
        assert_eq!(update, VarInt::from_u8(180));
        assert_eq!(rx.take_update(), None);

        // the peer can now send up to the new limit
        assert!(rx.on_data_received(VarInt::from_u8(180)).is_ok());
    }
}
