// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host-configured resource limits for a connection.
//!
//! These feed the advertised transport parameters and bound every queue
//! the connection allocates, so memory exhaustion surfaces as a connection
//! error rather than unbounded growth.

use crate::varint::VarInt;
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# If this value is absent, a default of 25 milliseconds is assumed.
pub const DEFAULT_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# If this value is absent, a default value of 3 is assumed (indicating a
//# multiplier of 8).
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;

const DEFAULT_STREAM_DATA_WINDOW: u32 = 256 * 1024;
const DEFAULT_DATA_WINDOW: u32 = 1024 * 1024;
const DEFAULT_CRYPTO_BUFFER: usize = 64 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Idle timeout advertised to the peer; zero disables the timeout
    pub max_idle_timeout: Duration,

    /// Optional keep-alive: when set, a PING is scheduled this long before
    /// the effective idle deadline
    pub keep_alive_period: Option<Duration>,

    /// Connection-level receive window
    pub initial_max_data: VarInt,

    /// Stream-level receive window for bidirectional streams the local
    /// endpoint opens
    pub initial_max_stream_data_bidi_local: VarInt,

    /// Stream-level receive window for bidirectional streams the peer opens
    pub initial_max_stream_data_bidi_remote: VarInt,

    /// Stream-level receive window for unidirectional streams the peer opens
    pub initial_max_stream_data_uni: VarInt,

    /// Number of bidirectional streams the peer may open
    pub initial_max_streams_bidi: VarInt,

    /// Number of unidirectional streams the peer may open
    pub initial_max_streams_uni: VarInt,

    /// Peer connection IDs the local endpoint is willing to store
    pub active_connection_id_limit: VarInt,

    /// Largest DATAGRAM frame the local endpoint accepts; zero disables
    /// the extension
    pub max_datagram_frame_size: VarInt,

    /// Bound on buffered CRYPTO bytes awaiting in-order delivery to TLS
    pub max_crypto_buffer: usize,

    /// Initial RTT estimate used before the first sample
    pub initial_rtt: Duration,

    /// Pacer rate multiplier, as a numerator/denominator pair
    pub pacing_gain: (u64, u64),
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            keep_alive_period: None,
            initial_max_data: VarInt::from_u32(DEFAULT_DATA_WINDOW),
            initial_max_stream_data_bidi_local: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW),
            initial_max_stream_data_uni: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW),
            initial_max_streams_bidi: VarInt::from_u8(100),
            initial_max_streams_uni: VarInt::from_u8(100),
            active_connection_id_limit: VarInt::from_u8(3),
            max_datagram_frame_size: VarInt::ZERO,
            max_crypto_buffer: DEFAULT_CRYPTO_BUFFER,
            initial_rtt: crate::recovery::DEFAULT_INITIAL_RTT,
            pacing_gain: crate::recovery::pacing::DEFAULT_GAIN,
        }
    }
}

impl Limits {
    /// The idle timeout value carried in transport parameters, in
    /// milliseconds
    #[inline]
    pub fn max_idle_timeout_ms(&self) -> VarInt {
        VarInt::new(self.max_idle_timeout.as_millis() as u64).unwrap_or(VarInt::MAX)
    }
}
