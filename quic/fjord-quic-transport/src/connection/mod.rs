// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection driver: orchestrates spaces, streams, recovery, paths,
//! connection IDs, and the TLS engine behind three entry points:
//! [`parse_udp_payload`](Connection::parse_udp_payload),
//! [`create_udp_payload`](Connection::create_udp_payload), and
//! [`earliest_deadline`](Connection::earliest_deadline).

pub mod cid;
pub mod close;
mod recv;
mod transmit;

use crate::{
    datagram::Datagrams,
    path,
    space::{ApplicationSpace, Space},
    stream::{self, PeerStreamLimits, StreamError},
    sync::AckToken,
};
use bytes::Bytes;
use self::close::Closer;
use fjord_quic_core::{
    connection::{self, ConnectionId, Limits},
    crypto::tls::{self, CipherSuite, Level},
    endpoint,
    packet::number::PacketNumberSpace,
    random,
    recovery::{NewReno, Pacer, RttEstimator},
    stateless_reset,
    stream::{StreamId, StreamType},
    time::{Clock, Timestamp},
    transport::{
        self,
        parameters::{TransportParameters, ZeroRttParameters},
    },
    varint::VarInt,
};
use fjord_quic_crypto::{OneRttKey, PacketProtectionKeys};

pub use crate::stream::OpenReason;

/// A session blob persisted between connections: the NEW_TOKEN value and
/// the transport parameters a client may assume for 0-RTT
#[derive(Clone, Debug)]
pub struct StoredSession {
    pub token: Bytes,
    pub parameters: ZeroRttParameters,
}

/// Host-provided persistence for session resumption
pub trait SessionStore: Send {
    fn load(&mut self) -> Option<StoredSession>;
    fn save(&mut self, session: StoredSession);
}

/// Everything the host supplies to build a connection
pub struct Config<Tls> {
    pub endpoint: endpoint::Type,
    pub limits: Limits,
    pub tls: Tls,
    pub clock: Box<dyn Clock + Send>,
    pub random: Box<dyn random::Generator + Send>,
    /// Client: an address validation token from a previous connection.
    /// Falls back to the session store when unset.
    pub token: Option<Bytes>,
    /// Server: a NEW_TOKEN value to hand to the client after the
    /// handshake. Token minting and validation are host concerns.
    pub new_token: Option<Bytes>,
    pub session_store: Option<Box<dyn SessionStore + Send>>,
    /// Server: the client's original destination connection ID when the
    /// connection was accepted after a Retry, recovered from the
    /// validated token
    pub original_dcid: Option<ConnectionId>,
    /// Server: the source connection ID carried on the Retry whose token
    /// validated this connection
    pub retry_scid: Option<ConnectionId>,
}

/// The result of one `create_udp_payload` call
#[derive(Debug)]
pub struct Transmission {
    /// Bytes written into the host's buffer; zero means nothing to send
    pub len: usize,
    /// The path to send on
    pub path: path::Id,
    /// When false the connection is destroyed and the host must stop
    /// calling
    pub keep_alive: bool,
}

/// Errors surfaced by the host-facing API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiError {
    Connection(connection::Error),
    Stream(StreamError),
    /// A key update is not permitted yet: the handshake is unconfirmed,
    /// or no packet of the current key phase has been acknowledged
    KeyUpdateNotPermitted,
}

impl From<StreamError> for ApiError {
    fn from(error: StreamError) -> Self {
        ApiError::Stream(error)
    }
}

impl From<connection::Error> for ApiError {
    fn from(error: connection::Error) -> Self {
        ApiError::Connection(error)
    }
}

#[derive(Debug, Default)]
pub(crate) struct HandshakeState {
    tls_started: bool,
    pub complete: bool,
    pub confirmed: bool,
    /// Server: HANDSHAKE_DONE owed to the client
    pub done_pending: bool,
    pub done_in_flight: Option<AckToken>,
    /// Client adopted the server's source connection ID
    remote_cid_adopted: bool,
    handshake_packet_sent: bool,
    handshake_packet_received: bool,
    peer_params_applied: bool,
}

pub struct Connection<Tls: tls::Session> {
    pub(crate) local: endpoint::Type,
    pub(crate) limits: Limits,
    clock: Box<dyn Clock + Send>,
    pub(crate) random: Box<dyn random::Generator + Send>,
    pub(crate) tls: Tls,

    pub(crate) initial: Option<Box<Space>>,
    pub(crate) handshake: Option<Box<Space>>,
    pub(crate) application: ApplicationSpace,

    pub(crate) rtt: RttEstimator,
    pub(crate) cc: NewReno,
    pub(crate) pacer: Pacer,
    /// Multiplier applied to PTO periods; doubles per consecutive PTO
    pub(crate) pto_backoff: u32,

    pub(crate) streams: stream::Manager,
    pub(crate) datagrams: Datagrams,
    pub(crate) cids: cid::Registry,
    pub(crate) paths: path::Manager,
    pub(crate) closer: Closer,

    pub(crate) handshake_state: HandshakeState,
    pub(crate) peer_params: Option<TransportParameters>,

    /// The DCID of the client's very first Initial, which keys the
    /// Initial secrets and is echoed by the server's
    /// original_destination_connection_id parameter
    pub(crate) original_dcid: ConnectionId,
    pub(crate) retry_scid: Option<ConnectionId>,
    /// Token attached to outgoing Initial packets
    pub(crate) initial_token: Option<Bytes>,
    /// Server: NEW_TOKEN to deliver once the handshake confirms
    new_token: Option<Bytes>,
    pub(crate) new_token_in_flight: Option<AckToken>,
    session_store: Option<Box<dyn SessionStore + Send>>,

    /// Effective idle timeout (the min of both endpoints' nonzero values)
    pub(crate) idle_timeout: Option<core::time::Duration>,
    pub(crate) idle_deadline: Option<Timestamp>,
    pub(crate) last_activity: Option<Timestamp>,
    /// A keep-alive PING is owed
    pub(crate) ping_pending: bool,
}

impl<Tls: tls::Session> Connection<Tls> {
    pub fn new(mut config: Config<Tls>) -> Result<Self, connection::Error> {
        let mut local_cid_bytes = [0u8; cid::LOCAL_ID_LEN];
        config
            .random
            .fill(random::Usage::ConnectionId, &mut local_cid_bytes);
        let local_cid = ConnectionId::try_from_bytes(&local_cid_bytes)
            .expect("fixed length is valid");

        let mut reset_token = [0u8; stateless_reset::LEN];
        config
            .random
            .fill(random::Usage::StatelessReset, &mut reset_token);

        let ack_delay_exponent = fjord_quic_core::connection::limits::DEFAULT_ACK_DELAY_EXPONENT;
        let crypto_capacity = config.limits.max_crypto_buffer;

        let mut connection = Self {
            local: config.endpoint,
            limits: config.limits,
            clock: config.clock,
            random: config.random,
            tls: config.tls,
            initial: Some(Box::new(Space::new(
                PacketNumberSpace::Initial,
                crypto_capacity,
                ack_delay_exponent,
            ))),
            handshake: Some(Box::new(Space::new(
                PacketNumberSpace::Handshake,
                crypto_capacity,
                ack_delay_exponent,
            ))),
            application: ApplicationSpace::new(crypto_capacity, ack_delay_exponent),
            rtt: RttEstimator::new(config.limits.initial_rtt),
            cc: NewReno::new(fjord_quic_core::path::MINIMUM_MTU),
            pacer: Pacer::new(config.limits.pacing_gain),
            pto_backoff: 1,
            streams: stream::Manager::new(config.endpoint, &config.limits),
            datagrams: Datagrams::new(config.limits.max_datagram_frame_size),
            cids: cid::Registry::new(
                local_cid,
                stateless_reset::Token::from(reset_token),
                config.limits.active_connection_id_limit,
            ),
            paths: path::Manager::new(config.endpoint.is_client()),
            closer: Closer::new(),
            handshake_state: HandshakeState::default(),
            peer_params: None,
            original_dcid: ConnectionId::EMPTY,
            retry_scid: None,
            initial_token: config.token,
            new_token: config.new_token,
            new_token_in_flight: None,
            session_store: config.session_store,
            idle_timeout: None,
            idle_deadline: None,
            last_activity: None,
            ping_pending: false,
        };

        if connection.limits.max_idle_timeout > core::time::Duration::ZERO {
            connection.idle_timeout = Some(connection.limits.max_idle_timeout);
        }

        if connection.local.is_server() {
            // a connection accepted after a Retry learns the original DCID
            // and the Retry SCID from the host's token validation
            if let Some(odcid) = config.original_dcid {
                connection.original_dcid = odcid;
            }
            connection.retry_scid = config.retry_scid;
        }

        if connection.local.is_client() {
            let mut dcid_bytes = [0u8; cid::LOCAL_ID_LEN];
            connection
                .random
                .fill(random::Usage::ConnectionId, &mut dcid_bytes);
            let original_dcid =
                ConnectionId::try_from_bytes(&dcid_bytes).expect("fixed length is valid");
            connection.original_dcid = original_dcid;
            connection.cids.set_remote_initial(original_dcid);
            connection.install_initial_keys(&original_dcid)?;

            if connection.initial_token.is_none() {
                if let Some(store) = connection.session_store.as_mut() {
                    if let Some(session) = store.load() {
                        connection.initial_token = Some(session.token);
                        connection.apply_remembered(session.parameters);
                    }
                }
            }

            connection.install_local_parameters()?;
        }

        let now = connection.clock.now();
        connection.refresh_idle(now);

        Ok(connection)
    }

    // ===== host-facing API =====

    /// The error the connection terminated with, once it has
    pub fn error(&self) -> Option<&connection::Error> {
        self.closer.error()
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_state.complete
    }

    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake_state.confirmed
    }

    /// Asks for the connection to be closed with an application error
    pub fn request_close(&mut self, code: VarInt) {
        let now = self.clock.now();
        let pto = self.pto_period();
        self.closer.close(
            connection::Error::Application {
                code,
                initiator: endpoint::Location::Local,
            },
            now,
            pto,
        );
    }

    /// Initiates a 1-RTT key update; subsequent packets carry the flipped
    /// key-phase bit and the next epoch's keys.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6
    //# An endpoint MUST NOT initiate a key update prior to having
    //# confirmed the handshake (Section 4.1.2).
    //
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# An endpoint MUST NOT initiate a subsequent key update unless it
    //# has received an acknowledgment for a packet that was sent
    //# protected with keys from the current key phase.
    pub fn request_key_update(&mut self) -> Result<(), ApiError> {
        self.ensure_open()?;
        if !self.handshake_state.confirmed || !self.application.acked_in_tx_phase {
            return Err(ApiError::KeyUpdateNotPermitted);
        }
        self.promote_send_keys()
    }

    /// Flips the send keys without the update rate limits, so tests can
    /// exercise how a peer treats an endpoint that ignores them
    #[cfg(any(test, feature = "testing"))]
    pub fn force_key_update(&mut self) -> Result<(), ApiError> {
        self.promote_send_keys()
    }

    fn promote_send_keys(&mut self) -> Result<(), ApiError> {
        let app = &mut self.application;
        let Some(tx) = app.one_rtt_tx.as_mut() else {
            return Err(ApiError::KeyUpdateNotPermitted);
        };
        tx.promote().map_err(|_| {
            ApiError::Connection(connection::Error::Internal {
                reason: "key rotation failed",
            })
        })?;
        app.tx_phase = !app.tx_phase;
        app.tx_phase_start_pn = None;
        app.acked_in_tx_phase = false;
        tracing::debug!(phase = app.tx_phase, "key update initiated");
        Ok(())
    }

    /// The key-phase bit carried on outbound 1-RTT packets
    pub fn key_phase(&self) -> bool {
        self.application.tx_phase
    }

    /// Number of completed 1-RTT key updates in the send direction
    pub fn key_generation(&self) -> u64 {
        self.application
            .one_rtt_tx
            .as_ref()
            .map_or(0, |key| key.generation())
    }

    pub fn open_stream(&mut self, stream_type: StreamType) -> Result<StreamId, ApiError> {
        self.ensure_open()?;
        Ok(self.streams.open(stream_type)?)
    }

    pub fn accept_stream(&mut self) -> Option<(StreamId, OpenReason)> {
        self.streams.accept()
    }

    pub fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, ApiError> {
        self.ensure_open()?;
        Ok(self.streams.write(id, data)?)
    }

    pub fn stream_finish(&mut self, id: StreamId) -> Result<(), ApiError> {
        self.ensure_open()?;
        Ok(self.streams.finish(id)?)
    }

    pub fn stream_reset(&mut self, id: StreamId, code: VarInt) -> Result<(), ApiError> {
        self.ensure_open()?;
        Ok(self.streams.reset(id, code)?)
    }

    pub fn stream_read(&mut self, id: StreamId, out: &mut [u8]) -> Result<(usize, bool), ApiError> {
        self.ensure_open()?;
        Ok(self.streams.read(id, out)?)
    }

    pub fn stream_stop_sending(&mut self, id: StreamId, code: VarInt) -> Result<(), ApiError> {
        self.ensure_open()?;
        Ok(self.streams.stop_sending(id, code)?)
    }

    pub fn datagram_send(&mut self, data: Bytes) -> Result<(), ApiError> {
        self.ensure_open()?;
        self.datagrams
            .send(data)
            .map_err(|_| ApiError::Stream(StreamError::InvalidState))
    }

    pub fn datagram_recv(&mut self) -> Option<Bytes> {
        self.datagrams.recv()
    }

    /// When the driver next needs to run in the absence of inbound
    /// datagrams
    pub fn earliest_deadline(&self) -> Option<Timestamp> {
        let mut deadline: Option<Timestamp> = None;
        let mut fold = |candidate: Option<Timestamp>| {
            deadline = match (deadline, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        };

        fold(self.closer.deadline());
        if self.closer.is_open() {
            fold(self.idle_deadline);
            if let Some(space) = self.initial.as_ref() {
                fold(space.earliest_deadline());
                fold(space.recovery.pto_deadline(&self.rtt, self.pto_backoff));
            }
            if let Some(space) = self.handshake.as_ref() {
                fold(space.earliest_deadline());
                fold(space.recovery.pto_deadline(&self.rtt, self.pto_backoff));
            }
            fold(self.application.space.earliest_deadline());
            fold(
                self.application
                    .space
                    .recovery
                    .pto_deadline(&self.rtt, self.pto_backoff),
            );
            fold(self.paths.earliest_deadline());
            if let Some(keep_alive) = self.limits.keep_alive_period {
                fold(self.last_activity.map(|t| t + keep_alive));
            }
        }

        deadline
    }

    // ===== shared internals =====

    fn ensure_open(&self) -> Result<(), connection::Error> {
        if self.closer.is_open() {
            Ok(())
        } else {
            Err(self
                .closer
                .error()
                .copied()
                .unwrap_or(connection::Error::Internal {
                    reason: "connection closed without an error",
                }))
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The PTO period used for close and path-validation deadlines
    pub(crate) fn pto_period(&self) -> core::time::Duration {
        self.rtt
            .pto_period(self.pto_backoff, PacketNumberSpace::ApplicationData)
    }

    pub(crate) fn install_initial_keys(
        &mut self,
        dcid: &ConnectionId,
    ) -> Result<(), connection::Error> {
        let keys = fjord_quic_crypto::initial::initial_keys(dcid.as_bytes(), self.local)
            .map_err(|_| connection::Error::Internal {
                reason: "initial key derivation failed",
            })?;
        if let Some(space) = self.initial.as_mut() {
            space.install_key_pair(keys);
        }
        Ok(())
    }

    /// Builds and installs our transport parameters into the TLS engine
    pub(crate) fn install_local_parameters(&mut self) -> Result<(), connection::Error> {
        let params = self.local_parameters();
        let encoded = fjord_codec::EncoderValue::encode_to_vec(&params);
        self.tls
            .set_transport_parameters(&encoded)
            .map_err(connection::Error::from)
    }

    fn local_parameters(&self) -> TransportParameters {
        let mut params = TransportParameters {
            max_idle_timeout: self.limits.max_idle_timeout_ms(),
            initial_max_data: self.limits.initial_max_data,
            initial_max_stream_data_bidi_local: self.limits.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: self.limits.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: self.limits.initial_max_stream_data_uni,
            initial_max_streams_bidi: self.limits.initial_max_streams_bidi,
            initial_max_streams_uni: self.limits.initial_max_streams_uni,
            active_connection_id_limit: self.limits.active_connection_id_limit,
            max_datagram_frame_size: self.limits.max_datagram_frame_size,
            initial_source_connection_id: Some(*self.cids.local_id()),
            ..TransportParameters::default()
        };

        if self.local.is_server() {
            params.original_destination_connection_id = Some(self.original_dcid);
            params.stateless_reset_token = Some(self.local_reset_token());
            params.retry_source_connection_id = self.retry_scid;
        }

        params
    }

    fn local_reset_token(&self) -> stateless_reset::Token {
        // sequence 0's token; issued at construction
        // (the registry keeps it alongside the ID)
        self.cids.local_token()
    }

    /// Applies remembered 0-RTT parameters before the real ones arrive
    fn apply_remembered(&mut self, remembered: ZeroRttParameters) {
        self.streams.on_peer_limits(PeerStreamLimits {
            max_stream_data_bidi_local: remembered.initial_max_stream_data_bidi_local,
            max_stream_data_bidi_remote: remembered.initial_max_stream_data_bidi_remote,
            max_stream_data_uni: remembered.initial_max_stream_data_uni,
            max_streams_bidi: remembered.initial_max_streams_bidi,
            max_streams_uni: remembered.initial_max_streams_uni,
            max_data: remembered.initial_max_data,
        });
        self.datagrams
            .on_peer_limit(remembered.max_datagram_frame_size);
        self.cids.on_peer_limit(remembered.active_connection_id_limit);
    }

    /// Validates and applies the peer's transport parameters
    pub(crate) fn apply_peer_parameters(
        &mut self,
        params: TransportParameters,
        peer_initial_scid: Option<&ConnectionId>,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
        //# An endpoint MUST treat the absence of the
        //# initial_source_connection_id transport parameter from either
        //# endpoint or the absence of the
        //# original_destination_connection_id transport parameter from the
        //# server as a connection error of type TRANSPORT_PARAMETER_ERROR.
        let scid = params
            .initial_source_connection_id
            .ok_or(transport::Error::TRANSPORT_PARAMETER_ERROR
                .with_reason("missing initial_source_connection_id"))?;
        if let Some(expected) = peer_initial_scid {
            if scid != *expected {
                return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                    .with_reason("initial_source_connection_id does not match the handshake"));
            }
        }

        if self.local.is_client() {
            let odcid = params.original_destination_connection_id.ok_or(
                transport::Error::TRANSPORT_PARAMETER_ERROR
                    .with_reason("missing original_destination_connection_id"),
            )?;
            if odcid != self.original_dcid {
                return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                    .with_reason("original_destination_connection_id mismatch"));
            }

            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
            //# An endpoint MUST treat the following as a connection error of
            //# type TRANSPORT_PARAMETER_ERROR or PROTOCOL_VIOLATION:
            //# ...
            //# *  absence of the retry_source_connection_id transport
            //#    parameter from the server after receiving a Retry packet
            match (self.retry_scid, params.retry_source_connection_id) {
                (Some(expected), Some(actual)) if expected == actual => {}
                (None, None) => {}
                _ => {
                    return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("retry_source_connection_id mismatch"));
                }
            }

            if let Some(token) = params.stateless_reset_token {
                self.cids.set_remote_initial_token(token);
            }
        }

        // negotiate the effective idle timeout: the min of both nonzero
        // commitments
        let peer_idle = params.max_idle_timeout.as_u64();
        if peer_idle > 0 {
            let peer_idle = core::time::Duration::from_millis(peer_idle);
            self.idle_timeout = Some(match self.idle_timeout {
                Some(local) => local.min(peer_idle),
                None => peer_idle,
            });
        }

        self.rtt.on_max_ack_delay(core::time::Duration::from_millis(
            params.max_ack_delay.as_u64(),
        ));

        self.streams.on_peer_limits(PeerStreamLimits {
            max_stream_data_bidi_local: params.initial_max_stream_data_bidi_local,
            max_stream_data_bidi_remote: params.initial_max_stream_data_bidi_remote,
            max_stream_data_uni: params.initial_max_stream_data_uni,
            max_streams_bidi: params.initial_max_streams_bidi,
            max_streams_uni: params.initial_max_streams_uni,
            max_data: params.initial_max_data,
        });
        self.datagrams.on_peer_limit(params.max_datagram_frame_size);
        self.cids.on_peer_limit(params.active_connection_id_limit);

        self.peer_params = Some(params);
        Ok(())
    }

    /// Feeds buffered CRYPTO data to TLS and lets it make progress
    pub(crate) fn drive_tls(&mut self) -> Result<(), transport::Error> {
        if !self.handshake_state.tls_started && self.local.is_client() {
            self.handshake_state.tls_started = true;
        }

        loop {
            let mut provided = false;

            if let Some(space) = self.initial.as_mut() {
                while let Some(chunk) = space.crypto.take_rx() {
                    self.tls.provide_data(Level::Initial, &chunk)?;
                    provided = true;
                }
            }
            if let Some(space) = self.handshake.as_mut() {
                while let Some(chunk) = space.crypto.take_rx() {
                    self.tls.provide_data(Level::Handshake, &chunk)?;
                    provided = true;
                }
            }
            while let Some(chunk) = self.application.space.crypto.take_rx() {
                self.tls.provide_data(Level::Application, &chunk)?;
                provided = true;
            }

            let mut context = TlsContext {
                local: self.local,
                initial: &mut self.initial,
                handshake: &mut self.handshake,
                application: &mut self.application,
                state: &mut self.handshake_state,
            };
            self.tls.progress(&mut context)?;

            if !provided {
                break;
            }
        }

        // adopt the peer's parameters once TLS surfaces them
        if !self.handshake_state.peer_params_applied {
            if let Some(raw) = self.tls.peer_transport_parameters() {
                let params = TransportParameters::decode(
                    fjord_codec::DecoderBuffer::new(&raw),
                    self.local.peer_type(),
                )?;
                let expected_scid = self.cids.active_remote_id();
                self.apply_peer_parameters(params, Some(&expected_scid))?;
                self.handshake_state.peer_params_applied = true;
            }
        }

        self.after_tls_progress();
        Ok(())
    }

    /// State transitions that follow TLS progress
    fn after_tls_progress(&mut self) {
        if self.handshake_state.complete && self.local.is_server() {
            //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
            //# the TLS handshake is considered confirmed at the
            //# server when the handshake completes.
            if !self.handshake_state.confirmed {
                self.handshake_state.confirmed = true;
                self.handshake_state.done_pending = true;
            }
        }

        if self.handshake_state.confirmed {
            self.on_handshake_confirmed();
        }
    }

    pub(crate) fn on_handshake_confirmed(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
        //# An endpoint MUST discard its Handshake keys when the TLS
        //# handshake is confirmed
        if let Some(mut space) = self.handshake.take() {
            space.recovery.discard(&mut self.cc);
            tracing::debug!("handshake space discarded");
        }
        // 0-RTT keys have no further use either
        self.application.zero_rtt_tx = None;
        self.application.zero_rtt_rx = None;

        // stock the peer with spare connection IDs
        self.cids.issue_local_ids(self.random.as_mut());
    }

    /// Client-side Initial discard; the server's happens on first
    /// Handshake receipt
    pub(crate) fn maybe_discard_initial(&mut self) {
        let handshake_keys_ready = self
            .handshake
            .as_ref()
            .map_or(false, |space| space.tx_key.is_some() && space.rx_key.is_some());
        if !handshake_keys_ready {
            return;
        }

        let drop_now = match self.local {
            endpoint::Type::Client => self.handshake_state.handshake_packet_sent,
            endpoint::Type::Server => self.handshake_state.handshake_packet_received,
        };

        if drop_now {
            if let Some(mut space) = self.initial.take() {
                space.recovery.discard(&mut self.cc);
                tracing::debug!("initial space discarded");
            }
        }
    }

    /// Restarts the idle timer after activity
    pub(crate) fn refresh_idle(&mut self, now: Timestamp) {
        self.last_activity = Some(now);
        self.idle_deadline = self.idle_timeout.map(|timeout| now + timeout);
    }

    /// Reclaims ack/loss outcomes into every frame producer
    pub(crate) fn sweep(&mut self) {
        if let Some(space) = self.initial.as_mut() {
            space.crypto.sweep();
        }
        if let Some(space) = self.handshake.as_mut() {
            space.crypto.sweep();
        }
        self.application.space.crypto.sweep();
        self.streams.sweep();
        self.cids.sweep();

        if let Some(token) = self.handshake_state.done_in_flight.as_ref() {
            match token.outcome() {
                crate::sync::AckOutcome::Acked => {
                    self.handshake_state.done_in_flight = None;
                }
                crate::sync::AckOutcome::Lost => {
                    self.handshake_state.done_in_flight = None;
                    self.handshake_state.done_pending = true;
                }
                crate::sync::AckOutcome::Pending => {}
            }
        }

        if let Some(token) = self.new_token_in_flight.as_ref() {
            match token.outcome() {
                crate::sync::AckOutcome::Acked => {
                    self.new_token_in_flight = None;
                    self.new_token = None;
                }
                crate::sync::AckOutcome::Lost => self.new_token_in_flight = None,
                crate::sync::AckOutcome::Pending => {}
            }
        }
    }

    /// Server: the NEW_TOKEN value still owed to the peer
    pub(crate) fn pending_new_token(&self) -> Option<&Bytes> {
        if self.local.is_server()
            && self.handshake_state.confirmed
            && self.new_token_in_flight.is_none()
        {
            self.new_token.as_ref()
        } else {
            None
        }
    }

    /// Client: persist a received NEW_TOKEN with the 0-RTT parameter
    /// subset
    pub(crate) fn store_session(&mut self, token: &[u8]) {
        let Some(params) = self.peer_params.as_ref() else {
            return;
        };
        let session = StoredSession {
            token: Bytes::copy_from_slice(token),
            parameters: params.zero_rtt_snapshot(),
        };
        if let Some(store) = self.session_store.as_mut() {
            store.save(session);
        }
    }
}

/// The bridge the TLS engine calls back into
struct TlsContext<'a> {
    local: endpoint::Type,
    initial: &'a mut Option<Box<Space>>,
    handshake: &'a mut Option<Box<Space>>,
    application: &'a mut ApplicationSpace,
    state: &'a mut HandshakeState,
}

fn derivation_failure() -> transport::Error {
    transport::Error::INTERNAL_ERROR.with_reason("key derivation failed")
}

impl tls::Context for TlsContext<'_> {
    fn on_read_secret(
        &mut self,
        level: Level,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), transport::Error> {
        match level {
            Level::Initial => Err(derivation_failure()),
            Level::EarlyData => {
                // only servers read 0-RTT data
                if self.local.is_server() {
                    self.application.zero_rtt_rx = Some(
                        PacketProtectionKeys::from_secret(suite, secret)
                            .map_err(|_| derivation_failure())?,
                    );
                }
                Ok(())
            }
            Level::Handshake => {
                if let Some(space) = self.handshake.as_mut() {
                    space.rx_key = Some(
                        PacketProtectionKeys::from_secret(suite, secret)
                            .map_err(|_| derivation_failure())?,
                    );
                }
                Ok(())
            }
            Level::Application => {
                self.application.one_rtt_rx =
                    Some(OneRttKey::new(suite, secret).map_err(|_| derivation_failure())?);
                Ok(())
            }
        }
    }

    fn on_write_secret(
        &mut self,
        level: Level,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), transport::Error> {
        match level {
            Level::Initial => Err(derivation_failure()),
            Level::EarlyData => {
                // only clients write 0-RTT data
                if self.local.is_client() {
                    self.application.zero_rtt_tx = Some(
                        PacketProtectionKeys::from_secret(suite, secret)
                            .map_err(|_| derivation_failure())?,
                    );
                }
                Ok(())
            }
            Level::Handshake => {
                if let Some(space) = self.handshake.as_mut() {
                    space.tx_key = Some(
                        PacketProtectionKeys::from_secret(suite, secret)
                            .map_err(|_| derivation_failure())?,
                    );
                }
                Ok(())
            }
            Level::Application => {
                self.application.one_rtt_tx =
                    Some(OneRttKey::new(suite, secret).map_err(|_| derivation_failure())?);
                Ok(())
            }
        }
    }

    fn on_handshake_data(&mut self, level: Level, data: &[u8]) -> Result<(), transport::Error> {
        match level {
            Level::Initial => {
                if let Some(space) = self.initial.as_mut() {
                    space.crypto.push_tx(data);
                }
                Ok(())
            }
            Level::Handshake => {
                if let Some(space) = self.handshake.as_mut() {
                    space.crypto.push_tx(data);
                }
                Ok(())
            }
            Level::Application => {
                self.application.space.crypto.push_tx(data);
                Ok(())
            }
            Level::EarlyData => Err(transport::Error::INTERNAL_ERROR
                .with_reason("handshake data cannot be sent in 0-RTT")),
        }
    }

    fn on_alert(&mut self, code: u8) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
        //# A TLS alert is converted into a QUIC connection error.
        Err(transport::Error::crypto_error(code))
    }

    fn on_handshake_complete(&mut self) -> Result<(), transport::Error> {
        self.state.complete = true;
        Ok(())
    }
}
