// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The closer: terminal connection states and CONNECTION_CLOSE emission

use core::time::Duration;
use fjord_quic_core::{connection, time::Timestamp};

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
//# The closing and draining connection states exist to ensure that
//# connections close cleanly and that delayed or reordered packets are
//# properly discarded.  These states SHOULD persist for at least three
//# times the current PTO interval

/// How many inbound packets may elicit one CONNECTION_CLOSE re-emission
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.1
//# An endpoint SHOULD limit the rate at which it generates packets in the
//# closing state.
const RESPONSE_PACKET_INTERVAL: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    /// A local error is being advertised to the peer
    Closing,
    /// The peer closed (or reset); nothing is sent anymore
    Draining,
    /// State may be released
    Drained,
}

#[derive(Debug)]
pub struct Closer {
    state: State,
    /// The first error wins and is what the host observes
    error: Option<connection::Error>,
    /// When the closing/draining period ends
    timeout: Option<Timestamp>,
    /// A CONNECTION_CLOSE (re)transmission is owed
    transmit_pending: bool,
    packets_since_response: u8,
}

impl Closer {
    pub fn new() -> Self {
        Self {
            state: State::Open,
            error: None,
            timeout: None,
            transmit_pending: false,
            packets_since_response: 0,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        matches!(self.state, State::Draining | State::Drained)
    }

    #[inline]
    pub fn is_drained(&self) -> bool {
        self.state == State::Drained
    }

    #[inline]
    pub fn error(&self) -> Option<&connection::Error> {
        self.error.as_ref()
    }

    /// Enters the closing state with a locally-originated error.
    /// Later errors do not displace the first.
    pub fn close(&mut self, error: connection::Error, now: Timestamp, pto: Duration) {
        if !self.is_open() {
            return;
        }
        tracing::debug!(?error, "closing connection");
        self.error = Some(error);
        self.timeout = Some(now + pto * 3);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# An endpoint that receives any frame after the idle timeout
        //# silently discards connection state
        let silent = matches!(
            error,
            connection::Error::IdleTimeout | connection::Error::HandshakeTimeout
        );
        if silent {
            self.state = State::Drained;
            self.timeout = None;
        } else {
            self.state = State::Closing;
            self.transmit_pending = error.close_frame().is_some();
        }
    }

    /// The peer closed the connection (CONNECTION_CLOSE or stateless
    /// reset): enter draining and never send again
    pub fn drain(&mut self, error: connection::Error, now: Timestamp, pto: Duration) {
        if self.is_draining() {
            return;
        }
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.state = State::Draining;
        self.transmit_pending = false;
        self.timeout = Some(now + pto * 3);
    }

    /// A packet arrived while closing; decide whether to answer with
    /// another CONNECTION_CLOSE
    pub fn on_packet_received(&mut self) {
        if self.state != State::Closing {
            return;
        }
        self.packets_since_response += 1;
        if self.packets_since_response >= RESPONSE_PACKET_INTERVAL {
            self.packets_since_response = 0;
            self.transmit_pending = true;
        }
    }

    /// Takes the pending CONNECTION_CLOSE transmission flag
    pub fn take_transmission(&mut self) -> Option<connection::Error> {
        if self.state == State::Closing && self.transmit_pending {
            self.transmit_pending = false;
            self.error
        } else {
            None
        }
    }

    /// Advances terminal timers; returns true once state may be released
    pub fn on_timeout(&mut self, now: Timestamp) -> bool {
        if let Some(timeout) = self.timeout {
            if now.has_elapsed(timeout) {
                self.state = State::Drained;
                self.timeout = None;
            }
        }
        self.is_drained()
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.timeout
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_quic_core::{endpoint, varint::VarInt};

    fn now(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    const PTO: Duration = Duration::from_millis(100);

    #[test]
    fn first_error_wins() {
        let mut closer = Closer::new();
        let first = connection::Error::Transport {
            code: VarInt::from_u8(7),
            frame_type: None,
            reason: "first",
            initiator: endpoint::Location::Local,
        };
        closer.close(first, now(0), PTO);
        closer.close(connection::Error::IdleTimeout, now(1), PTO);
        assert_eq!(closer.error(), Some(&first));
    }

    #[test]
    fn closing_emits_then_rate_limits() {
        let mut closer = Closer::new();
        closer.close(
            connection::Error::Closed {
                initiator: endpoint::Location::Local,
            },
            now(0),
            PTO,
        );
        assert!(closer.take_transmission().is_some());
        assert!(closer.take_transmission().is_none());

        // a burst of inbound packets triggers one re-emission
        closer.on_packet_received();
        closer.on_packet_received();
        assert!(closer.take_transmission().is_none());
        closer.on_packet_received();
        assert!(closer.take_transmission().is_some());
    }

    #[test]
    fn close_timeout_drains() {
        let mut closer = Closer::new();
        closer.close(
            connection::Error::Closed {
                initiator: endpoint::Location::Local,
            },
            now(0),
            PTO,
        );
        assert!(!closer.on_timeout(now(299)));
        assert!(closer.on_timeout(now(300)));
        assert!(closer.is_drained());
    }

    #[test]
    fn idle_timeout_is_silent() {
        let mut closer = Closer::new();
        closer.close(connection::Error::IdleTimeout, now(0), PTO);
        assert!(closer.is_drained());
        assert!(closer.take_transmission().is_none());
    }

    #[test]
    fn draining_never_transmits() {
        let mut closer = Closer::new();
        closer.drain(connection::Error::StatelessReset, now(0), PTO);
        closer.on_packet_received();
        closer.on_packet_received();
        closer.on_packet_received();
        assert!(closer.take_transmission().is_none());
        assert!(closer.on_timeout(now(300)));
    }
}
