// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The inbound half of the driver: datagram parsing, decryption, and
//! frame dispatch

use super::Connection;
use crate::path;
use fjord_quic_core::{
    connection::{self, ConnectionId},
    crypto::{self, tls},
    endpoint, frame,
    packet::{self, number::PacketNumber, ProtectedPacket},
    stateless_reset,
    time::Timestamp,
    transport,
};
use fjord_quic_crypto::PacketProtectionKeys;

/// What became of one coalesced packet
enum PacketOutcome {
    /// Processed; carried at least one ack-eliciting frame when true
    Processed { ack_eliciting: bool, non_probing: bool },
    /// Dropped without prejudice (undecryptable, duplicate, no keys yet)
    Dropped(&'static str),
}

impl<Tls: tls::Session> Connection<Tls> {
    /// Drives one inbound UDP datagram through the connection.
    ///
    /// Decryption failures drop the offending packet and keep going;
    /// protocol violations latch the closer and surface as an error.
    pub fn parse_udp_payload(
        &mut self,
        datagram: &mut [u8],
        path_id: path::Id,
    ) -> Result<(), connection::Error> {
        let now = self.now();

        if self.closer.is_drained() {
            return Err(self.current_error());
        }
        if !self.closer.is_open() {
            self.closer.on_packet_received();
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.1
        //# An endpoint detects a potential stateless reset using the trailing
        //# 16 bytes of the UDP datagram.
        if datagram.len() >= stateless_reset::MIN_PACKET_LEN {
            let tail: stateless_reset::Token = stateless_reset::Token::try_from(
                &datagram[datagram.len() - stateless_reset::LEN..],
            )
            .expect("length checked");
            if self.cids.reset_tokens().any(|token| *token == tail) {
                tracing::debug!("stateless reset received");
                let pto = self.pto_period();
                self.closer
                    .drain(connection::Error::StatelessReset, now, pto);
                return Ok(());
            }
        }

        let pto3 = self.pto_period() * 3;
        self.paths.on_datagram_received(
            path_id,
            datagram.len(),
            now,
            pto3,
            self.random.as_mut(),
        );

        let local_cid_len = self.cids.local_id().len();
        let mut remaining: &mut [u8] = datagram;
        let mut processed_any = false;

        while !remaining.is_empty() && self.closer.is_open() {
            let (packet, rest) = match ProtectedPacket::parse(remaining, local_cid_len) {
                Ok(parsed) => parsed,
                // an unparseable packet ends the datagram
                Err(_) => break,
            };
            remaining = rest;

            match self.on_packet(packet, path_id, now) {
                Ok(PacketOutcome::Processed {
                    ack_eliciting: _,
                    non_probing,
                }) => {
                    processed_any = true;
                    if non_probing {
                        self.paths.on_non_probing_packet(path_id);
                    }

                    // keys installed by this packet's CRYPTO data may be
                    // needed to open the next coalesced packet
                    if let Err(error) = self.drive_tls() {
                        let pto = self.pto_period();
                        self.closer.close(error.into(), now, pto);
                        return Err(self.current_error());
                    }
                }
                Ok(PacketOutcome::Dropped(reason)) => {
                    tracing::debug!(reason, "packet dropped");
                }
                Err(error) => {
                    let pto = self.pto_period();
                    self.closer.close(error.into(), now, pto);
                    return Err(self.current_error());
                }
            }
        }

        if processed_any {
            self.refresh_idle(now);
        }

        Ok(())
    }

    pub(crate) fn current_error(&self) -> connection::Error {
        self.closer
            .error()
            .copied()
            .unwrap_or(connection::Error::Internal {
                reason: "connection closed without an error",
            })
    }

    fn on_packet(
        &mut self,
        packet: ProtectedPacket,
        path_id: path::Id,
        now: Timestamp,
    ) -> Result<PacketOutcome, transport::Error> {
        match packet.ty() {
            packet::Type::VersionNegotiation => {
                self.on_version_negotiation(&packet, now);
                Ok(PacketOutcome::Dropped("version negotiation"))
            }
            packet::Type::Retry => self.on_retry(packet, now),
            ty => {
                if ty.is_long_header() && packet.version() != packet::VERSION {
                    return Ok(PacketOutcome::Dropped("unsupported version"));
                }
                self.on_protected_packet(packet, path_id, now)
            }
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
    //# A client that supports only this version of QUIC MUST abandon the
    //# current connection attempt if it receives a Version Negotiation
    //# packet, with the following two exceptions.
    fn on_version_negotiation(&mut self, packet: &ProtectedPacket, now: Timestamp) {
        if self.local.is_server() || self.handshake_state.remote_cid_adopted {
            // only meaningful before the server committed to our version
            return;
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
        //# A client MUST discard a Version Negotiation packet that lists the
        //# QUIC version selected by the client.
        if packet.supported_versions().any(|v| v == packet::VERSION) {
            return;
        }
        let pto = self.pto_period();
        self.closer
            .close(connection::Error::UnsupportedVersion, now, pto);
    }

    fn on_retry(
        &mut self,
        packet: ProtectedPacket,
        now: Timestamp,
    ) -> Result<PacketOutcome, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
        //# A client MUST accept and process at most one Retry packet for
        //# each connection attempt.  After the client has received and
        //# processed an Initial or Retry packet from the server, it MUST
        //# discard any subsequent Retry packets that it receives.
        if self.local.is_server()
            || self.retry_scid.is_some()
            || self.handshake_state.remote_cid_adopted
        {
            return Ok(PacketOutcome::Dropped("unexpected retry"));
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
        //# A client MUST discard a Retry packet with a zero-length Retry
        //# Token field.
        if packet.token().is_empty() {
            return Ok(PacketOutcome::Dropped("retry without a token"));
        }

        let Some(tag) = packet.retry_tag() else {
            return Ok(PacketOutcome::Dropped("retry without a tag"));
        };
        let body_len = packet.len() - tag.len();
        let pseudo = fjord_quic_core::crypto::retry::pseudo_packet(
            self.original_dcid.as_bytes(),
            &packet.as_bytes()[..body_len],
        );
        if fjord_quic_crypto::retry::validate_tag(&pseudo, tag).is_err() {
            //= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
            //# Clients MUST discard Retry packets that have a Retry Integrity
            //# Tag that cannot be validated
            return Ok(PacketOutcome::Dropped("retry integrity tag mismatch"));
        }

        let Some(scid) = ConnectionId::try_from_bytes(packet.source_connection_id()) else {
            return Ok(PacketOutcome::Dropped("invalid retry scid"));
        };

        tracing::debug!("retry accepted, rekeying initial space");
        self.retry_scid = Some(scid);
        self.initial_token = Some(bytes::Bytes::copy_from_slice(packet.token()));
        self.cids.set_remote_initial(scid);

        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
        //# The secret used for Initial packets changes when a server sends a
        //# Retry packet to use the connection ID value selected by the
        //# server
        self.install_initial_keys(&scid)
            .map_err(|_| transport::Error::INTERNAL_ERROR.with_reason("initial rekey failed"))?;

        // everything sent so far must be offered again under the new keys
        if let Some(space) = self.initial.as_mut() {
            space.crypto.retransmit_all();
            space.recovery.discard(&mut self.cc);
        }
        let _ = now;

        Ok(PacketOutcome::Processed {
            ack_eliciting: false,
            non_probing: false,
        })
    }

    fn on_protected_packet(
        &mut self,
        packet: ProtectedPacket,
        path_id: path::Id,
        now: Timestamp,
    ) -> Result<PacketOutcome, transport::Error> {
        let ty = packet.ty();

        // a server derives its Initial keys from the DCID of the first
        // Initial it processes; after a host-issued Retry that DCID is the
        // Retry's SCID rather than the client's original choice
        let needs_initial_keys = self
            .initial
            .as_ref()
            .map_or(false, |space| space.rx_key.is_none());
        if self.local.is_server() && ty == packet::Type::Initial && needs_initial_keys {
            let Some(dcid) = ConnectionId::try_from_bytes(packet.destination_connection_id())
            else {
                return Ok(PacketOutcome::Dropped("invalid initial dcid"));
            };
            let Some(scid) = ConnectionId::try_from_bytes(packet.source_connection_id()) else {
                return Ok(PacketOutcome::Dropped("invalid initial scid"));
            };

            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
            //# When an Initial packet is sent by a client that has not
            //# previously received an Initial or Retry packet from the
            //# server, the client populates the Destination Connection ID
            //# field with an unpredictable value.  This Destination
            //# Connection ID MUST be at least 8 bytes in length.
            if dcid.len() < 8 {
                return Ok(PacketOutcome::Dropped("initial dcid too short"));
            }

            if self.original_dcid.is_empty() {
                self.original_dcid = dcid;
            }
            self.cids.set_remote_initial(scid);
            self.install_initial_keys(&dcid).map_err(|_| {
                transport::Error::INTERNAL_ERROR.with_reason("initial key derivation failed")
            })?;
            self.install_local_parameters().map_err(|_| {
                transport::Error::INTERNAL_ERROR.with_reason("transport parameter installation failed")
            })?;
        }

        let packet_dcid = ConnectionId::try_from_bytes(packet.destination_connection_id())
            .unwrap_or(ConnectionId::EMPTY);
        let packet_scid = ConnectionId::try_from_bytes(packet.source_connection_id());

        // open the packet with the keys of its space
        let opened = match ty {
            packet::Type::Initial | packet::Type::Handshake => {
                self.open_with_space_keys(packet, ty)
            }
            packet::Type::ZeroRtt => self.open_zero_rtt(packet),
            packet::Type::OneRtt => self.open_one_rtt(packet),
            _ => unreachable!("handled above"),
        };

        let Some((payload_start, payload_len, pn, first_byte, bytes)) = opened? else {
            return Ok(PacketOutcome::Dropped("undecryptable packet"));
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
        //# An endpoint MUST treat receipt of a packet that has a non-zero
        //# value for these bits after removing both packet and header
        //# protection as a connection error of type PROTOCOL_VIOLATION.
        let reserved_mask = if ty.is_long_header() {
            packet::LONG_RESERVED_MASK
        } else {
            packet::SHORT_RESERVED_MASK
        };
        if first_byte & reserved_mask != 0 {
            return Err(transport::Error::PROTOCOL_VIOLATION.with_reason("reserved bits set"));
        }

        // duplicate suppression
        let duplicate = {
            let space_ack = match ty {
                packet::Type::Initial => &mut self.initial.as_mut().expect("opened").ack,
                packet::Type::Handshake => &mut self.handshake.as_mut().expect("opened").ack,
                _ => &mut self.application.space.ack,
            };
            matches!(space_ack.on_packet_number(pn), crate::ack::Outcome::Drop)
        };
        if duplicate {
            return Ok(PacketOutcome::Dropped("duplicate packet"));
        }

        // a client switches its destination ID to the SCID of the first
        // Initial response
        if self.local.is_client()
            && ty == packet::Type::Initial
            && !self.handshake_state.remote_cid_adopted
        {
            if let Some(scid) = packet_scid {
                self.cids.set_remote_initial(scid);
                self.handshake_state.remote_cid_adopted = true;
            }
        }

        if ty == packet::Type::Handshake {
            self.handshake_state.handshake_packet_received = true;
            //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
            //# Once an endpoint has successfully processed a Handshake packet
            //# from the peer, it can consider the peer address to have been
            //# validated.
            if let Some(path) = self.paths.get_mut(path_id) {
                path.on_validated();
            }
            self.maybe_discard_initial();
        }

        // walk the frames in wire order
        let mut ack_eliciting = false;
        let mut non_probing = false;
        let payload_range = payload_start..payload_start + payload_len;
        let result = self.process_frames(
            ty,
            &bytes[payload_range],
            &packet_dcid,
            path_id,
            pn,
            now,
            &mut ack_eliciting,
            &mut non_probing,
        );
        result?;

        // record for acknowledgment generation
        let space_ack = match ty {
            packet::Type::Initial => self.initial.as_mut().map(|s| &mut s.ack),
            packet::Type::Handshake => self.handshake.as_mut().map(|s| &mut s.ack),
            _ => Some(&mut self.application.space.ack),
        };
        if let Some(space_ack) = space_ack {
            space_ack.on_packet_processed(pn, ack_eliciting, now);
        }

        if ty == packet::Type::OneRtt && ack_eliciting {
            self.application.eliciting_in_phase = true;
        }

        Ok(PacketOutcome::Processed {
            ack_eliciting,
            non_probing,
        })
    }

    /// Opens an Initial or Handshake packet in place.
    ///
    /// Returns `Ok(None)` when the packet must be dropped silently.
    #[allow(clippy::type_complexity)]
    fn open_with_space_keys<'a>(
        &mut self,
        packet: ProtectedPacket<'a>,
        ty: packet::Type,
    ) -> Result<Option<(usize, usize, u64, u8, &'a mut [u8])>, transport::Error> {
        let space = match ty {
            packet::Type::Initial => self.initial.as_mut(),
            _ => self.handshake.as_mut(),
        };
        let Some(space) = space else {
            return Ok(None);
        };
        let Some(keys) = space.rx_key.as_ref() else {
            return Ok(None);
        };
        let largest = space.ack.largest_received().map(PacketNumber::from_u64);

        let (bytes, header_len) = packet.into_parts();
        Ok(open_in_place(keys, bytes, header_len, largest))
    }

    fn open_zero_rtt<'a>(
        &mut self,
        packet: ProtectedPacket<'a>,
    ) -> Result<Option<(usize, usize, u64, u8, &'a mut [u8])>, transport::Error> {
        if self.local.is_client() {
            return Ok(None);
        }
        let Some(keys) = self.application.zero_rtt_rx.as_ref() else {
            return Ok(None);
        };
        let largest = self
            .application
            .space
            .ack
            .largest_received()
            .map(PacketNumber::from_u64);

        let (bytes, header_len) = packet.into_parts();
        Ok(open_in_place(keys, bytes, header_len, largest))
    }

    /// Opens a 1-RTT packet, handling the key-phase machine
    fn open_one_rtt<'a>(
        &mut self,
        packet: ProtectedPacket<'a>,
    ) -> Result<Option<(usize, usize, u64, u8, &'a mut [u8])>, transport::Error> {
        let app = &mut self.application;
        let Some(rx) = app.one_rtt_rx.as_mut() else {
            return Ok(None);
        };
        let largest = app.space.ack.largest_received().map(PacketNumber::from_u64);

        let (bytes, header_len) = packet.into_parts();

        let Ok(truncated) = crypto::remove_header_protection(rx.header_key(), bytes, header_len)
        else {
            return Ok(None);
        };
        let pn = truncated.expand(largest).as_u64();
        let first_byte = bytes[0];
        let protected_len = header_len + truncated.bytesize();

        let phase = first_byte & packet::SHORT_KEY_PHASE_BIT != 0;

        if phase == app.rx_phase {
            let Ok(payload) =
                crypto::decrypt_in_place(rx.current(), pn, &mut *bytes, protected_len)
            else {
                return Ok(None);
            };
            let payload_len = payload.len();
            app.rx_phase_start = Some(app.rx_phase_start.map_or(pn, |start| start.min(pn)));
            return Ok(Some((protected_len, payload_len, pn, first_byte, bytes)));
        }

        // opposite phase: either a straggler from the previous epoch or
        // the start of a peer-initiated key update
        if app.rx_phase_start.map_or(false, |start| pn < start) {
            let Some(previous) = rx.previous() else {
                return Ok(None);
            };
            let Ok(payload) = crypto::decrypt_in_place(previous, pn, &mut *bytes, protected_len)
            else {
                return Ok(None);
            };
            let payload_len = payload.len();
            return Ok(Some((protected_len, payload_len, pn, first_byte, bytes)));
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.2
        //# An endpoint detects a key update when processing a packet with a
        //# key phase that differs from the value used to protect the last
        //# packet it sent.  To process this packet, the endpoint uses the
        //# next packet protection keys.
        let Ok(payload) = crypto::decrypt_in_place(rx.next(), pn, &mut *bytes, protected_len)
        else {
            return Ok(None);
        };
        let payload_len = payload.len();

        // a flip we did not start ourselves is a peer-initiated update;
        // a flip matching our transmit phase completes one of ours
        let peer_initiated = app.tx_phase != phase;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
        //# An endpoint MUST NOT initiate a subsequent key update unless it
        //# has received an acknowledgment for a packet that was sent
        //# protected with keys from the current key phase.
        if peer_initiated && !app.eliciting_in_phase && app.rx_phase_start.is_some() {
            return Err(transport::Error::KEY_UPDATE_ERROR
                .with_reason("key update initiated without traffic in the current phase"));
        }

        rx.promote()
            .map_err(|_| transport::Error::INTERNAL_ERROR.with_reason("key rotation failed"))?;
        if peer_initiated {
            if let Some(tx) = app.one_rtt_tx.as_mut() {
                tx.promote().map_err(|_| {
                    transport::Error::INTERNAL_ERROR.with_reason("key rotation failed")
                })?;
            }
            app.tx_phase = phase;
            app.tx_phase_start_pn = None;
            app.acked_in_tx_phase = false;
        }
        app.rx_phase = phase;
        app.rx_phase_start = Some(pn);
        app.eliciting_in_phase = false;
        tracing::debug!(phase, peer_initiated, "key update completed");

        Ok(Some((protected_len, payload_len, pn, first_byte, bytes)))
    }

    /// Dispatches every frame of a decrypted payload in wire order
    #[allow(clippy::too_many_arguments)]
    fn process_frames(
        &mut self,
        ty: packet::Type,
        payload: &[u8],
        packet_dcid: &ConnectionId,
        path_id: path::Id,
        pn: u64,
        now: Timestamp,
        ack_eliciting: &mut bool,
        non_probing: &mut bool,
    ) -> Result<(), transport::Error> {
        let _ = pn;
        let buffer = fjord_codec::DecoderBuffer::new(payload);

        if buffer.is_empty() {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
            //# An endpoint MUST treat receipt of a packet containing no
            //# frames as a connection error of type PROTOCOL_VIOLATION.
            return Err(transport::Error::PROTOCOL_VIOLATION.with_reason("packet with no frames"));
        }

        for result in frame::FrameIter::new(buffer) {
            let frame = result.map_err(|error| {
                transport::Error::FRAME_ENCODING_ERROR.with_reason(error.into())
            })?;

            frame.validate_placement(ty, self.local.peer_type())?;
            *ack_eliciting |= frame.is_ack_eliciting();
            *non_probing |= !matches!(
                frame,
                frame::Frame::Padding(_)
                    | frame::Frame::PathChallenge(_)
                    | frame::Frame::PathResponse(_)
                    | frame::Frame::NewConnectionId(_)
            );

            self.handle_frame(ty, frame, packet_dcid, path_id, now)?;

            if !self.closer.is_open() {
                break;
            }
        }

        Ok(())
    }

    fn handle_frame(
        &mut self,
        ty: packet::Type,
        frame: frame::Frame,
        packet_dcid: &ConnectionId,
        path_id: path::Id,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        match frame {
            frame::Frame::Padding(_) | frame::Frame::Ping(_) => Ok(()),

            frame::Frame::Ack(ack) => self.on_ack_frame(ty, &ack, now),

            frame::Frame::Crypto(crypto_frame) => {
                let space = match ty {
                    packet::Type::Initial => self.initial.as_mut().map(|s| &mut s.crypto),
                    packet::Type::Handshake => self.handshake.as_mut().map(|s| &mut s.crypto),
                    _ => Some(&mut self.application.space.crypto),
                };
                if let Some(space) = space {
                    space.on_data_received(crypto_frame.offset, crypto_frame.data)?;
                }
                Ok(())
            }

            frame::Frame::NewToken(new_token) => {
                self.store_session(new_token.token);
                Ok(())
            }

            frame::Frame::Stream(stream) => self.streams.on_stream_frame(&stream),
            frame::Frame::ResetStream(reset) => self.streams.on_reset_stream(&reset),
            frame::Frame::StopSending(stop) => self.streams.on_stop_sending(&stop),
            frame::Frame::MaxData(max_data) => {
                self.streams.on_max_data(&max_data);
                Ok(())
            }
            frame::Frame::MaxStreamData(max_stream_data) => {
                self.streams.on_max_stream_data(&max_stream_data)
            }
            frame::Frame::MaxStreams(max_streams) => {
                self.streams.on_max_streams(&max_streams);
                Ok(())
            }
            frame::Frame::DataBlocked(blocked) => {
                self.streams.on_data_blocked(&blocked);
                Ok(())
            }
            frame::Frame::StreamDataBlocked(blocked) => {
                self.streams.on_stream_data_blocked(&blocked);
                Ok(())
            }
            frame::Frame::StreamsBlocked(blocked) => {
                self.streams.on_streams_blocked(&blocked);
                Ok(())
            }

            frame::Frame::NewConnectionId(new_cid) => self.cids.on_new_connection_id(&new_cid),
            frame::Frame::RetireConnectionId(retire) => self
                .cids
                .on_retire_connection_id(&retire, packet_dcid.as_bytes()),

            frame::Frame::PathChallenge(challenge) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.2
                //# On receiving a PATH_CHALLENGE frame, an endpoint MUST
                //# respond by echoing the data contained in the
                //# PATH_CHALLENGE frame in a PATH_RESPONSE frame.
                if let Some(path) = self.paths.get_mut(path_id) {
                    path.response = Some(challenge.data);
                }
                Ok(())
            }
            frame::Frame::PathResponse(response) => {
                self.paths.on_path_response(&response.data);
                Ok(())
            }

            frame::Frame::ConnectionClose(close) => {
                let initiator = endpoint::Location::Remote;
                let error = if close.is_application_close() {
                    connection::Error::Application {
                        code: close.error_code,
                        initiator,
                    }
                } else if close.error_code == transport::Error::NO_ERROR.code {
                    connection::Error::Closed { initiator }
                } else {
                    connection::Error::Transport {
                        code: close.error_code,
                        frame_type: close.frame_type,
                        reason: "closed by peer",
                        initiator,
                    }
                };
                let pto = self.pto_period();
                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.2
                //# The draining state is entered once an endpoint receives a
                //# CONNECTION_CLOSE frame, which indicates that its peer is
                //# closing or draining.
                self.closer.drain(error, now, pto);
                Ok(())
            }

            frame::Frame::HandshakeDone(_) => {
                //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
                //# At the client, the handshake is considered confirmed when a
                //# HANDSHAKE_DONE frame is received.
                if !self.handshake_state.confirmed {
                    self.handshake_state.confirmed = true;
                    self.on_handshake_confirmed();
                }
                Ok(())
            }

            frame::Frame::Datagram(datagram) => self.datagrams.on_frame(datagram.data),
        }
    }

    fn on_ack_frame(
        &mut self,
        ty: packet::Type,
        ack: &frame::Ack<frame::ack::AckRangesDecoder>,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        use fjord_quic_core::frame::ack::AckRanges as _;

        let exponent = self
            .peer_params
            .as_ref()
            .map(|p| p.ack_delay_exponent)
            .unwrap_or(fjord_quic_core::connection::limits::DEFAULT_ACK_DELAY_EXPONENT);
        let ack_delay = ack.ack_delay(exponent.min(20));

        let confirmed = self.handshake_state.confirmed;
        let (recovery, ack_manager) = match ty {
            packet::Type::Initial => match self.initial.as_mut() {
                Some(space) => (&mut space.recovery, &mut space.ack),
                None => return Ok(()),
            },
            packet::Type::Handshake => match self.handshake.as_mut() {
                Some(space) => (&mut space.recovery, &mut space.ack),
                None => return Ok(()),
            },
            _ => (
                &mut self.application.space.recovery,
                &mut self.application.space.ack,
            ),
        };

        let outcome = recovery.on_ack_received(
            ack.ack_ranges.ack_ranges(),
            ack_delay,
            now,
            &mut self.rtt,
            &mut self.cc,
            confirmed,
        )?;

        if let Some(threshold) = outcome.acked_ack_threshold {
            ack_manager.on_ack_frame_acked(threshold);
        }
        if outcome.lost_ack_frames {
            ack_manager.on_ack_frame_lost(now);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When an acknowledgment is received that newly acknowledges
        //# packets, loss detection is restarted and the PTO backoff is
        //# reset
        if outcome.newly_acked_eliciting && self.paths.active().is_validated() {
            self.pto_backoff = 1;
        }

        // an acknowledgment for a packet sent in the current key phase
        // permits initiating the next key update
        if ty == packet::Type::OneRtt && outcome.newly_acked_eliciting {
            if let Some(pn) = outcome.largest_newly_acked {
                if self
                    .application
                    .tx_phase_start_pn
                    .map_or(false, |start| pn >= start)
                {
                    self.application.acked_in_tx_phase = true;
                }
            }
        }

        Ok(())
    }
}

/// Unprotects and decrypts a simple-keyed packet in place
fn open_in_place<'a>(
    keys: &PacketProtectionKeys,
    bytes: &'a mut [u8],
    header_len: usize,
    largest: Option<PacketNumber>,
) -> Option<(usize, usize, u64, u8, &'a mut [u8])> {
    let truncated = crypto::remove_header_protection(&keys.header, bytes, header_len).ok()?;
    let pn = truncated.expand(largest).as_u64();
    let first_byte = bytes[0];
    let protected_len = header_len + truncated.bytesize();
    let payload = crypto::decrypt_in_place(&keys.packet, pn, &mut *bytes, protected_len).ok()?;
    let payload_len = payload.len();
    Some((protected_len, payload_len, pn, first_byte, bytes))
}
