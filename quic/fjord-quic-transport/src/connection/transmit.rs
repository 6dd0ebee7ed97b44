// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The outbound half of the driver: timer service and datagram assembly

use super::{Connection, Transmission};
use crate::{
    connection::cid::CidFrame,
    recovery::SentPacket,
    stream::Waiters,
};
use fjord_codec::{Encoder, EncoderBuffer, EncoderValue};
use fjord_quic_core::{
    connection,
    crypto::{self, tls},
    frame,
    packet::{self, number::PacketNumber},
    path::MINIMUM_MTU,
    recovery::CongestionController as _,
    time::Timestamp,
    varint::VarInt,
};
use smallvec::SmallVec;

/// Below this there is no room for a header plus a sealed frame
const MIN_PACKET_CAPACITY: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum LongType {
    Initial,
    ZeroRtt,
    Handshake,
}

impl LongType {
    fn type_bits(self) -> u8 {
        match self {
            LongType::Initial => 0b00,
            LongType::ZeroRtt => 0b01,
            LongType::Handshake => 0b10,
        }
    }
}

impl<Tls: tls::Session> Connection<Tls> {
    /// Produces the next outbound UDP datagram.
    ///
    /// A `len` of zero means there is nothing to send until either a
    /// datagram arrives or [`earliest_deadline`](Self::earliest_deadline)
    /// passes. Once `keep_alive` is false the connection is destroyed.
    pub fn create_udp_payload(&mut self, buffer: &mut [u8]) -> Transmission {
        let now = self.now();
        let path = self.paths.active_id();

        self.sweep();
        self.on_timers(now);

        if self.closer.is_drained() {
            return Transmission {
                len: 0,
                path,
                keep_alive: false,
            };
        }

        if !self.closer.is_open() {
            let len = match self.closer.take_transmission() {
                Some(error) => self.write_close_datagram(buffer, &error),
                None => 0,
            };
            return Transmission {
                len,
                path,
                keep_alive: true,
            };
        }

        // the client's first flight starts the TLS engine
        if !self.handshake_state.complete {
            if let Err(error) = self.drive_tls() {
                let pto = self.pto_period();
                self.closer.close(error.into(), now, pto);
                let len = match self.closer.take_transmission() {
                    Some(error) => self.write_close_datagram(buffer, &error),
                    None => 0,
                };
                return Transmission {
                    len,
                    path,
                    keep_alive: true,
                };
            }
        }

        // a path under validation gets its own padded probe datagram
        if let Some((probe_path, data)) = self.paths.pending_challenge(now) {
            let len = self.write_path_challenge_datagram(buffer, data, now);
            if len > 0 {
                if let Some(path) = self.paths.get_mut(probe_path) {
                    path.on_bytes_transmitted(len);
                }
                return Transmission {
                    len,
                    path: probe_path,
                    keep_alive: true,
                };
            }
        }

        let len = self.assemble(buffer, now);
        if len > 0 {
            self.paths.active().on_bytes_transmitted(len);

            // sending an ack-eliciting packet restarts the idle timer when
            // nothing else is outstanding
            if self.last_activity.is_none() {
                self.refresh_idle(now);
            }
        }

        Transmission {
            len,
            path,
            keep_alive: true,
        }
    }

    fn on_timers(&mut self, now: Timestamp) {
        if self.closer.on_timeout(now) {
            return;
        }
        if !self.closer.is_open() {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# If a max_idle_timeout is specified by either endpoint in its
        //# transport parameters, the connection is silently closed and its
        //# state is discarded when it remains idle for longer than the
        //# minimum of the max_idle_timeout value advertised by both
        //# endpoints.
        if let Some(deadline) = self.idle_deadline {
            if now.has_elapsed(deadline) {
                let pto = self.pto_period();
                self.closer
                    .close(connection::Error::IdleTimeout, now, pto);
                return;
            }
        }

        if let (Some(period), Some(last)) = (self.limits.keep_alive_period, self.last_activity) {
            if now.has_elapsed(last + period) {
                self.ping_pending = true;
                // re-arm for the next period; the idle deadline itself is
                // only pushed out by peer activity
                self.last_activity = Some(now);
            }
        }

        self.paths.on_timeout(now);

        // time-threshold loss detection
        if let Some(space) = self.initial.as_mut() {
            if space.recovery.loss_time().map_or(false, |t| now.has_elapsed(t)) {
                space.recovery.detect_lost(now, &self.rtt, &mut self.cc);
            }
        }
        if let Some(space) = self.handshake.as_mut() {
            if space.recovery.loss_time().map_or(false, |t| now.has_elapsed(t)) {
                space.recovery.detect_lost(now, &self.rtt, &mut self.cc);
            }
        }
        {
            let space = &mut self.application.space;
            if space.recovery.loss_time().map_or(false, |t| now.has_elapsed(t)) {
                space.recovery.detect_lost(now, &self.rtt, &mut self.cc);
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When a PTO timer expires, the PTO backoff MUST be increased,
        //# resulting in the PTO period being set to twice its current value.
        let mut earliest: Option<(Timestamp, u8)> = None;
        let mut consider = |deadline: Option<Timestamp>, which: u8| {
            if let Some(deadline) = deadline {
                if earliest.map_or(true, |(t, _)| deadline < t) {
                    earliest = Some((deadline, which));
                }
            }
        };
        consider(
            self.initial
                .as_ref()
                .and_then(|s| s.recovery.pto_deadline(&self.rtt, self.pto_backoff)),
            0,
        );
        consider(
            self.handshake
                .as_ref()
                .and_then(|s| s.recovery.pto_deadline(&self.rtt, self.pto_backoff)),
            1,
        );
        consider(
            self.application
                .space
                .recovery
                .pto_deadline(&self.rtt, self.pto_backoff),
            2,
        );

        if let Some((deadline, which)) = earliest {
            if now.has_elapsed(deadline) {
                match which {
                    0 => {
                        if let Some(space) = self.initial.as_mut() {
                            space.recovery.on_pto();
                        }
                    }
                    1 => {
                        if let Some(space) = self.handshake.as_mut() {
                            space.recovery.on_pto();
                        }
                    }
                    _ => self.application.space.recovery.on_pto(),
                }
                self.pto_backoff = self.pto_backoff.saturating_mul(2);
                tracing::debug!(backoff = self.pto_backoff, "probe timeout fired");
            }
        }
    }

    /// Builds one coalesced datagram for the active path
    fn assemble(&mut self, buffer: &mut [u8], now: Timestamp) -> usize {
        let allowance = self.paths.active().transmission_allowance();
        let capacity = buffer
            .len()
            .min(MINIMUM_MTU as usize)
            .min(usize::try_from(allowance).unwrap_or(usize::MAX));
        if capacity < MIN_PACKET_CAPACITY {
            return 0;
        }

        let mut offset = 0;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# A client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum datagram
        //# size of 1200 bytes
        offset += self.write_long_packet(
            LongType::Initial,
            &mut buffer[..capacity],
            Some(MINIMUM_MTU as usize),
            now,
        );

        // early data rides in 0-RTT packets until 1-RTT keys exist
        if offset < capacity
            && self.local.is_client()
            && self.application.one_rtt_tx.is_none()
            && self.application.zero_rtt_tx.is_some()
        {
            let end = capacity;
            offset += self.write_zero_rtt_packet(&mut buffer[offset..end], now);
        }

        if offset < capacity {
            let end = capacity;
            offset += self.write_long_packet(
                LongType::Handshake,
                &mut buffer[offset..end],
                None,
                now,
            );
        }

        if offset < capacity {
            let end = capacity;
            offset += self.write_short_packet(&mut buffer[offset..end], now);
        }

        offset
    }

    /// Writes one Initial or Handshake packet; returns the bytes used
    fn write_long_packet(
        &mut self,
        ty: LongType,
        buffer: &mut [u8],
        pad_packet_to: Option<usize>,
        now: Timestamp,
    ) -> usize {
        debug_assert!(ty != LongType::ZeroRtt, "0-RTT has its own writer");
        if buffer.len() < MIN_PACKET_CAPACITY {
            return 0;
        }

        let dcid = self.cids.active_remote_id();
        let scid = *self.cids.local_id();
        let token = match ty {
            LongType::Initial => self.initial_token.clone(),
            _ => None,
        };
        let congestion_ok =
            self.cc.available_congestion_window() >= MINIMUM_MTU as u64;

        let space = match ty {
            LongType::Initial => match self.initial.as_mut() {
                Some(space) => space,
                None => return 0,
            },
            _ => match self.handshake.as_mut() {
                Some(space) => space,
                None => return 0,
            },
        };
        let Some(tx_key) = space.tx_key.as_ref() else {
            return 0;
        };

        let probe = space.recovery.take_probe();
        if probe && !space.crypto.has_tx() {
            // probes carry previously sent handshake data so a fully lost
            // flight recovers without waiting for an acknowledgment
            space.crypto.retransmit_all();
        }
        let has_crypto = space.crypto.has_tx();
        let want_ack = space.ack.should_transmit(now)
            || (space.ack.has_ranges() && (has_crypto || probe));
        if !probe && !want_ack && !(has_crypto && congestion_ok) {
            return 0;
        }

        let largest_acked = space.recovery.largest_acked().map(PacketNumber::from_u64);
        let pn = space.peek_packet_number();
        let truncated = PacketNumber::from_u64(pn).truncate(largest_acked);
        let pn_len = truncated.bytesize();
        let tag_len = crypto::Key::tag_len(&tx_key.packet);

        // header
        let mut header = EncoderBuffer::new(buffer);
        header.encode(&(0xc0u8 | (ty.type_bits() << 4) | (pn_len as u8 - 1)));
        header.encode(&packet::VERSION);
        header.encode(&(dcid.len() as u8));
        header.encode(&dcid);
        header.encode(&(scid.len() as u8));
        header.encode(&scid);
        if ty == LongType::Initial {
            match token.as_deref() {
                Some(token) => {
                    header.encode(&VarInt::try_from(token.len()).unwrap_or(VarInt::ZERO));
                    header.write_slice(token);
                }
                None => header.encode(&VarInt::ZERO),
            }
        }
        let length_pos = header.len();
        header.write_repeated(2, 0); // two-byte varint placeholder
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        if payload_start + tag_len + 16 > buffer.len() {
            return 0;
        }

        // payload
        let mut waiters: Waiters = SmallVec::new();
        let mut ack_eliciting = false;
        let mut largest_ack_emitted = None;
        let payload_end = buffer.len() - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);

        if want_ack {
            if let Some((ack_frame, largest)) = space.ack.transmit(now) {
                if ack_frame.encoding_size_for_encoder(&payload) <= payload.remaining_capacity() {
                    payload.encode(&ack_frame);
                    largest_ack_emitted = Some(largest);
                }
            }
        }

        if congestion_ok {
            loop {
                let overhead = 1 + 8 + 4;
                let Some(max_data) = payload.remaining_capacity().checked_sub(overhead) else {
                    break;
                };
                let Some((offset, data, waiter)) = space.crypto.produce(max_data) else {
                    break;
                };
                let crypto_frame = frame::Crypto {
                    offset: VarInt::new(offset).expect("crypto offsets are bounded"),
                    data: &data[..],
                };
                payload.encode(&crypto_frame);
                waiters.push(waiter);
                ack_eliciting = true;
            }
        }

        if probe && !ack_eliciting {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
            //# When there is no data to send, the sender SHOULD send a PING or
            //# other ack-eliciting frame in a single packet, rearming the PTO
            //# timer.
            payload.encode(&frame::Ping);
            ack_eliciting = true;
        }

        if payload.is_empty() {
            return 0;
        }

        // keep enough ciphertext for the header protection sample
        let min_payload = 4usize.saturating_sub(pn_len);
        if payload.len() < min_payload {
            payload.write_repeated(min_payload - payload.len(), 0);
        }

        let mut in_flight = ack_eliciting;
        if let Some(target) = pad_packet_to {
            let target_payload = target
                .saturating_sub(payload_start + tag_len)
                .min(payload.capacity());
            if payload.len() < target_payload {
                payload.write_repeated(target_payload - payload.len(), 0);
                in_flight = true;
            }
        }

        let payload_len = payload.len();
        let total = payload_start + payload_len + tag_len;

        // backfill the two-byte length varint
        let length_value = (pn_len + payload_len + tag_len) as u16;
        buffer[length_pos] = 0x40 | (length_value >> 8) as u8;
        buffer[length_pos + 1] = length_value as u8;

        if crypto::encrypt_in_place(&tx_key.packet, pn, &mut buffer[..total], payload_start)
            .is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(&tx_key.header, &mut buffer[..total], header_len, pn_len)
            .is_err()
        {
            return 0;
        }

        let allocated = space.next_packet_number();
        debug_assert_eq!(allocated, pn);
        space.recovery.on_packet_sent(
            pn,
            SentPacket {
                time_sent: now,
                sent_bytes: total as u16,
                ack_eliciting,
                in_flight,
                is_mtu_probe: false,
                largest_ack_emitted,
                waiters,
            },
            &mut self.cc,
        );

        if ty == LongType::Handshake {
            self.handshake_state.handshake_packet_sent = true;
            self.maybe_discard_initial();
        }

        self.pacer.on_packet_sent(
            now,
            total,
            &self.rtt,
            self.cc.congestion_window(),
            MINIMUM_MTU,
        );

        tracing::trace!(ty = ty_dbg(ty), pn, total, "packet sent");
        total
    }

    /// Writes one 0-RTT packet carrying early application data
    fn write_zero_rtt_packet(&mut self, buffer: &mut [u8], now: Timestamp) -> usize {
        if buffer.len() < MIN_PACKET_CAPACITY {
            return 0;
        }
        if !self.streams.has_transmission_interest()
            && !self.datagrams.has_transmission_interest()
        {
            return 0;
        }
        if self.cc.available_congestion_window() < MINIMUM_MTU as u64 {
            return 0;
        }

        let dcid = self.cids.active_remote_id();
        let scid = *self.cids.local_id();
        let space = &mut self.application.space;
        let Some(tx_key) = self.application.zero_rtt_tx.as_ref() else {
            return 0;
        };

        let largest_acked = space.recovery.largest_acked().map(PacketNumber::from_u64);
        let pn = space.peek_packet_number();
        let truncated = PacketNumber::from_u64(pn).truncate(largest_acked);
        let pn_len = truncated.bytesize();
        let tag_len = crypto::Key::tag_len(&tx_key.packet);

        let mut header = EncoderBuffer::new(buffer);
        header.encode(&(0xc0u8 | (LongType::ZeroRtt.type_bits() << 4) | (pn_len as u8 - 1)));
        header.encode(&packet::VERSION);
        header.encode(&(dcid.len() as u8));
        header.encode(&dcid);
        header.encode(&(scid.len() as u8));
        header.encode(&scid);
        let length_pos = header.len();
        header.write_repeated(2, 0);
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        if payload_start + tag_len + 16 > buffer.len() {
            return 0;
        }

        let mut waiters: Waiters = SmallVec::new();
        let payload_end = buffer.len() - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);

        let mut wrote = self.streams.on_transmit(&mut payload, &mut waiters);
        while let Some(datagram) = self.datagrams.produce(payload.remaining_capacity()) {
            payload.encode(&frame::Datagram {
                is_last_frame: false,
                data: &datagram[..],
            });
            wrote = true;
        }

        if !wrote || payload.is_empty() {
            return 0;
        }

        let min_payload = 4usize.saturating_sub(pn_len);
        if payload.len() < min_payload {
            payload.write_repeated(min_payload - payload.len(), 0);
        }

        let payload_len = payload.len();
        let total = payload_start + payload_len + tag_len;
        let length_value = (pn_len + payload_len + tag_len) as u16;
        buffer[length_pos] = 0x40 | (length_value >> 8) as u8;
        buffer[length_pos + 1] = length_value as u8;

        let space = &mut self.application.space;
        if crypto::encrypt_in_place(&tx_key.packet, pn, &mut buffer[..total], payload_start)
            .is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(&tx_key.header, &mut buffer[..total], header_len, pn_len)
            .is_err()
        {
            return 0;
        }

        space.next_packet_number();
        space.recovery.on_packet_sent(
            pn,
            SentPacket {
                time_sent: now,
                sent_bytes: total as u16,
                ack_eliciting: true,
                in_flight: true,
                is_mtu_probe: false,
                largest_ack_emitted: None,
                waiters,
            },
            &mut self.cc,
        );
        self.pacer.on_packet_sent(
            now,
            total,
            &self.rtt,
            self.cc.congestion_window(),
            MINIMUM_MTU,
        );

        total
    }

    /// Writes one 1-RTT short-header packet
    fn write_short_packet(&mut self, buffer: &mut [u8], now: Timestamp) -> usize {
        if buffer.len() < MIN_PACKET_CAPACITY {
            return 0;
        }
        if self.application.one_rtt_tx.is_none() {
            return 0;
        }

        let dcid = self.cids.active_remote_id();
        let congestion_ok =
            self.cc.available_congestion_window() >= MINIMUM_MTU as u64;
        let pacer_ready = self
            .pacer
            .next_transmission_time(now, &self.rtt, self.cc.congestion_window(), MINIMUM_MTU)
            .is_none();

        let probe = self.application.space.recovery.take_probe();
        let want_ack = self.application.space.ack.should_transmit(now);
        let keys_phase = self.application.tx_phase;

        let pn = self.application.space.peek_packet_number();
        let largest_acked = self
            .application
            .space
            .recovery
            .largest_acked()
            .map(PacketNumber::from_u64);
        let truncated = PacketNumber::from_u64(pn).truncate(largest_acked);
        let pn_len = truncated.bytesize();
        let tag_len = 16;

        // header: short form, fixed bit, key phase, pn length
        let mut header = EncoderBuffer::new(buffer);
        let mut first = 0x40u8 | (pn_len as u8 - 1);
        if keys_phase {
            first |= packet::SHORT_KEY_PHASE_BIT;
        }
        header.encode(&first);
        header.encode(&dcid);
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        if payload_start + tag_len + 16 > buffer.len() {
            return 0;
        }

        let mut waiters: Waiters = SmallVec::new();
        let mut ack_eliciting = false;
        let mut largest_ack_emitted = None;
        let payload_end = buffer.len() - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);

        // acknowledgments first
        let piggyback = self.application.space.ack.has_ranges()
            && (probe
                || self.handshake_state.done_pending
                || self.streams.has_transmission_interest()
                || self.cids.has_transmission_interest());
        if want_ack || piggyback {
            if let Some((ack_frame, largest)) = self.application.space.ack.transmit(now) {
                if ack_frame.encoding_size_for_encoder(&payload) <= payload.remaining_capacity() {
                    payload.encode(&ack_frame);
                    largest_ack_emitted = Some(largest);
                }
            }
        }

        // post-handshake CRYPTO (session tickets)
        if congestion_ok {
            loop {
                let overhead = 1 + 8 + 4;
                let Some(max_data) = payload.remaining_capacity().checked_sub(overhead) else {
                    break;
                };
                let Some((offset, data, waiter)) =
                    self.application.space.crypto.produce(max_data)
                else {
                    break;
                };
                payload.encode(&frame::Crypto {
                    offset: VarInt::new(offset).expect("crypto offsets are bounded"),
                    data: &data[..],
                });
                waiters.push(waiter);
                ack_eliciting = true;
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
        //# The server uses a HANDSHAKE_DONE frame (type=0x1e) to signal
        //# confirmation of the handshake to the client.
        if self.handshake_state.done_pending && payload.remaining_capacity() >= 1 {
            payload.encode(&frame::HandshakeDone);
            let token = crate::sync::AckToken::new();
            waiters.push(token.waiter());
            self.handshake_state.done_in_flight = Some(token);
            self.handshake_state.done_pending = false;
            ack_eliciting = true;
        }

        if let Some(new_token) = self.pending_new_token().cloned() {
            let new_token_frame = frame::NewToken {
                token: &new_token[..],
            };
            if new_token_frame.encoding_size_for_encoder(&payload) <= payload.remaining_capacity()
            {
                payload.encode(&new_token_frame);
                let token = crate::sync::AckToken::new();
                waiters.push(token.waiter());
                self.new_token_in_flight = Some(token);
                ack_eliciting = true;
            }
        }

        // connection ID maintenance
        while self.cids.has_transmission_interest() && payload.remaining_capacity() >= 48 {
            let Some((cid_frame, waiter)) = self.cids.produce() else {
                break;
            };
            match cid_frame {
                CidFrame::New {
                    sequence,
                    retire_prior_to,
                    id,
                    reset_token,
                } => {
                    payload.encode(&frame::NewConnectionId {
                        sequence_number: VarInt::new(sequence).expect("sequences are bounded"),
                        retire_prior_to: VarInt::new(retire_prior_to)
                            .expect("sequences are bounded"),
                        connection_id: id.as_bytes(),
                        stateless_reset_token: &reset_token.into_inner(),
                    });
                }
                CidFrame::Retire { sequence } => {
                    payload.encode(&frame::RetireConnectionId {
                        sequence_number: VarInt::new(sequence).expect("sequences are bounded"),
                    });
                }
            }
            waiters.push(waiter);
            ack_eliciting = true;
        }

        // path responses for the active path
        if let Some(response) = self.paths.active().response.take() {
            let response_frame = frame::PathResponse { data: response };
            if response_frame.encoding_size_for_encoder(&payload) <= payload.remaining_capacity()
            {
                payload.encode(&response_frame);
                ack_eliciting = true;
            } else {
                self.paths.active().response = Some(response);
            }
        }

        // application data, congestion and pacing permitting
        if congestion_ok && pacer_ready {
            while let Some(datagram) = self.datagrams.produce(payload.remaining_capacity()) {
                payload.encode(&frame::Datagram {
                    is_last_frame: false,
                    data: &datagram[..],
                });
                ack_eliciting = true;
            }
            if self.streams.on_transmit(&mut payload, &mut waiters) {
                ack_eliciting = true;
            }
        }

        if self.ping_pending && payload.remaining_capacity() >= 1 {
            payload.encode(&frame::Ping);
            self.ping_pending = false;
            ack_eliciting = true;
        }
        if probe && !ack_eliciting {
            payload.encode(&frame::Ping);
            ack_eliciting = true;
        }

        if payload.is_empty() {
            return 0;
        }

        let min_payload = 4usize.saturating_sub(pn_len);
        if payload.len() < min_payload {
            payload.write_repeated(min_payload - payload.len(), 0);
        }

        let payload_len = payload.len();
        let total = payload_start + payload_len + tag_len;

        let tx = self
            .application
            .one_rtt_tx
            .as_ref()
            .expect("checked above");
        if crypto::encrypt_in_place(tx.current(), pn, &mut buffer[..total], payload_start).is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(
            tx.header_key(),
            &mut buffer[..total],
            header_len,
            pn_len,
        )
        .is_err()
        {
            return 0;
        }

        self.application.space.next_packet_number();
        self.application.space.recovery.on_packet_sent(
            pn,
            SentPacket {
                time_sent: now,
                sent_bytes: total as u16,
                ack_eliciting,
                in_flight: ack_eliciting,
                is_mtu_probe: false,
                largest_ack_emitted,
                waiters,
            },
            &mut self.cc,
        );
        if self.application.tx_phase_start_pn.is_none() {
            self.application.tx_phase_start_pn = Some(pn);
        }
        self.pacer.on_packet_sent(
            now,
            total,
            &self.rtt,
            self.cc.congestion_window(),
            MINIMUM_MTU,
        );

        tracing::trace!(pn, total, "1-rtt packet sent");
        total
    }

    /// A dedicated padded datagram carrying a PATH_CHALLENGE
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
    //# An endpoint MUST expand datagrams that contain a PATH_CHALLENGE
    //# frame to at least the smallest allowed maximum datagram size of
    //# 1200 bytes
    fn write_path_challenge_datagram(
        &mut self,
        buffer: &mut [u8],
        data: [u8; 8],
        now: Timestamp,
    ) -> usize {
        if self.application.one_rtt_tx.is_none() || buffer.len() < MINIMUM_MTU as usize {
            return 0;
        }

        let dcid = self.cids.active_remote_id();
        let pn = self.application.space.peek_packet_number();
        let largest_acked = self
            .application
            .space
            .recovery
            .largest_acked()
            .map(PacketNumber::from_u64);
        let truncated = PacketNumber::from_u64(pn).truncate(largest_acked);
        let pn_len = truncated.bytesize();
        let tag_len = 16;

        let mut header = EncoderBuffer::new(buffer);
        let mut first = 0x40u8 | (pn_len as u8 - 1);
        if self.application.tx_phase {
            first |= packet::SHORT_KEY_PHASE_BIT;
        }
        header.encode(&first);
        header.encode(&dcid);
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        let total = MINIMUM_MTU as usize;
        let payload_end = total - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);
        payload.encode(&frame::PathChallenge { data });
        payload.write_repeated(payload.remaining_capacity(), 0);
        let payload_len = payload.len();

        let tx = self.application.one_rtt_tx.as_ref().expect("checked above");
        if crypto::encrypt_in_place(tx.current(), pn, &mut buffer[..total], payload_start).is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(
            tx.header_key(),
            &mut buffer[..total],
            header_len,
            pn_len,
        )
        .is_err()
        {
            return 0;
        }

        debug_assert_eq!(payload_start + payload_len + tag_len, total);
        self.application.space.next_packet_number();
        self.application.space.recovery.on_packet_sent(
            pn,
            SentPacket {
                time_sent: now,
                sent_bytes: total as u16,
                ack_eliciting: true,
                in_flight: true,
                is_mtu_probe: false,
                largest_ack_emitted: None,
                waiters: SmallVec::new(),
            },
            &mut self.cc,
        );
        if self.application.tx_phase_start_pn.is_none() {
            self.application.tx_phase_start_pn = Some(pn);
        }

        total
    }

    /// Emits CONNECTION_CLOSE in every space with send keys installed
    fn write_close_datagram(
        &mut self,
        buffer: &mut [u8],
        error: &connection::Error,
    ) -> usize {
        let Some((code, frame_type, reason)) = error.close_frame() else {
            return 0;
        };

        let capacity = buffer.len().min(MINIMUM_MTU as usize);
        let mut offset = 0;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.3
        //# A CONNECTION_CLOSE of type 0x1d MUST be replaced by a
        //# CONNECTION_CLOSE of type 0x1c when sending the frame in Initial
        //# or Handshake packets.  Otherwise, information about the
        //# application state might be revealed.
        let handshake_close = frame::ConnectionClose {
            error_code: if frame_type.is_none() {
                fjord_quic_core::transport::Error::APPLICATION_ERROR.code
            } else {
                code
            },
            frame_type: frame_type.or(Some(VarInt::ZERO)),
            reason: b"",
        };
        let final_close = frame::ConnectionClose {
            error_code: code,
            frame_type,
            reason: reason.as_bytes(),
        };

        offset += self.write_close_long(
            LongType::Initial,
            &mut buffer[..capacity],
            &handshake_close,
        );
        if offset < capacity {
            let end = capacity;
            offset += self.write_close_long(
                LongType::Handshake,
                &mut buffer[offset..end],
                &handshake_close,
            );
        }
        if offset < capacity {
            let end = capacity;
            offset += self.write_close_short(&mut buffer[offset..end], &final_close);
        }

        offset
    }

    fn write_close_long(
        &mut self,
        ty: LongType,
        buffer: &mut [u8],
        close: &frame::ConnectionClose,
    ) -> usize {
        if buffer.len() < MIN_PACKET_CAPACITY {
            return 0;
        }
        let dcid = self.cids.active_remote_id();
        let scid = *self.cids.local_id();

        let space = match ty {
            LongType::Initial => match self.initial.as_mut() {
                Some(space) => space,
                None => return 0,
            },
            _ => match self.handshake.as_mut() {
                Some(space) => space,
                None => return 0,
            },
        };
        let Some(tx_key) = space.tx_key.as_ref() else {
            return 0;
        };

        let pn = space.peek_packet_number();
        let truncated = PacketNumber::from_u64(pn).truncate(None);
        let pn_len = truncated.bytesize();
        let tag_len = crypto::Key::tag_len(&tx_key.packet);

        let mut header = EncoderBuffer::new(buffer);
        header.encode(&(0xc0u8 | (ty.type_bits() << 4) | (pn_len as u8 - 1)));
        header.encode(&packet::VERSION);
        header.encode(&(dcid.len() as u8));
        header.encode(&dcid);
        header.encode(&(scid.len() as u8));
        header.encode(&scid);
        if ty == LongType::Initial {
            header.encode(&VarInt::ZERO);
        }
        let length_pos = header.len();
        header.write_repeated(2, 0);
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        let payload_end = buffer.len() - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);
        if close.encoding_size_for_encoder(&payload) > payload.remaining_capacity() {
            return 0;
        }
        payload.encode(close);
        let min_payload = 4usize.saturating_sub(pn_len);
        if payload.len() < min_payload {
            payload.write_repeated(min_payload - payload.len(), 0);
        }
        let payload_len = payload.len();
        let total = payload_start + payload_len + tag_len;

        let length_value = (pn_len + payload_len + tag_len) as u16;
        buffer[length_pos] = 0x40 | (length_value >> 8) as u8;
        buffer[length_pos + 1] = length_value as u8;

        if crypto::encrypt_in_place(&tx_key.packet, pn, &mut buffer[..total], payload_start)
            .is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(&tx_key.header, &mut buffer[..total], header_len, pn_len)
            .is_err()
        {
            return 0;
        }

        space.next_packet_number();
        total
    }

    fn write_close_short(
        &mut self,
        buffer: &mut [u8],
        close: &frame::ConnectionClose,
    ) -> usize {
        if buffer.len() < MIN_PACKET_CAPACITY {
            return 0;
        }
        let Some(tx) = self.application.one_rtt_tx.as_ref() else {
            return 0;
        };

        let dcid = self.cids.active_remote_id();
        let pn = self.application.space.peek_packet_number();
        let truncated = PacketNumber::from_u64(pn).truncate(None);
        let pn_len = truncated.bytesize();
        let tag_len = 16;

        let mut header = EncoderBuffer::new(buffer);
        let mut first = 0x40u8 | (pn_len as u8 - 1);
        if self.application.tx_phase {
            first |= packet::SHORT_KEY_PHASE_BIT;
        }
        header.encode(&first);
        header.encode(&dcid);
        let header_len = header.len();
        truncated.encode(&mut header);
        let payload_start = header.len();

        let payload_end = buffer.len() - tag_len;
        let mut payload = EncoderBuffer::new(&mut buffer[payload_start..payload_end]);
        if close.encoding_size_for_encoder(&payload) > payload.remaining_capacity() {
            return 0;
        }
        payload.encode(close);
        let min_payload = 4usize.saturating_sub(pn_len);
        if payload.len() < min_payload {
            payload.write_repeated(min_payload - payload.len(), 0);
        }
        let payload_len = payload.len();
        let total = payload_start + payload_len + tag_len;

        if crypto::encrypt_in_place(tx.current(), pn, &mut buffer[..total], payload_start).is_err()
        {
            return 0;
        }
        if crypto::apply_header_protection(
            tx.header_key(),
            &mut buffer[..total],
            header_len,
            pn_len,
        )
        .is_err()
        {
            return 0;
        }

        self.application.space.next_packet_number();
        total
    }
}

fn ty_dbg(ty: LongType) -> &'static str {
    match ty {
        LongType::Initial => "initial",
        LongType::ZeroRtt => "0-rtt",
        LongType::Handshake => "handshake",
    }
}
