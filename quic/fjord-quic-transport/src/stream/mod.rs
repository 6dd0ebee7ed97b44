// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The stream multiplexer: stream lifecycle, two-layer flow control, and
//! frame production for every stream-scoped frame type.

pub mod flow;
pub mod recv;
pub mod send;

use crate::sync::{AckOutcome, AckToken, PacketWaiter};
use fjord_codec::{Encoder, EncoderBuffer, EncoderValue};
use fjord_quic_core::{
    connection::Limits,
    endpoint, frame,
    stream::{StreamId, StreamType},
    transport,
    varint::VarInt,
};
use hashbrown::HashMap;
use self::flow::{RxLimiter, TxLimiter};
use self::recv::RecvStream;
use self::send::SendStream;
use smallvec::SmallVec;
use std::collections::VecDeque;

pub(crate) type Waiters = SmallVec<[PacketWaiter; 2]>;

/// Stream-scoped errors surfaced to the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The stream does not exist or is already closed
    UnknownStream,
    /// The peer or the application reset the stream
    StreamReset(VarInt),
    /// Data was written after `finish`
    SendAfterFinish,
    /// The operation is not valid in the stream's current state
    InvalidState,
    /// The peer's stream limit does not admit another stream of this type
    StreamsExhausted,
    /// The 2^60 stream sequence space is exhausted
    StreamIdExhausted,
    /// The stream cannot be read from / written to by this endpoint
    InvalidDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    StopSending { id: StreamId, code: VarInt },
    MaxData,
    MaxStreamData { id: StreamId },
    MaxStreams { stream_type: StreamType },
    /// STREAMS_BLOCKED, sent once and never retransmitted
    MaxStreamsBlockedMarker(StreamType, u64),
}

#[derive(Debug, Default)]
struct Entry {
    send: Option<SendStream>,
    recv: Option<RecvStream>,
}

/// Local stream issuance for one stream type
#[derive(Debug)]
struct Issuer {
    next_seq: u64,
    /// The peer's MAX_STREAMS for this type, as a count
    peer_limit: u64,
    blocked_reported: Option<u64>,
}

impl Issuer {
    fn new() -> Self {
        Self {
            next_seq: 0,
            peer_limit: 0,
            blocked_reported: None,
        }
    }
}

/// Admission of peer-initiated streams for one stream type
#[derive(Debug)]
struct Acceptor {
    /// Count of streams the peer may open in total
    limit: u64,
    window: u64,
    /// Peer streams fully closed and cleaned up
    closed: u64,
    /// One past the highest sequence opened by the peer
    opened: u64,
    pending_update: bool,
}

impl Acceptor {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            window: limit,
            closed: 0,
            opened: 0,
            pending_update: false,
        }
    }

    fn on_stream_closed(&mut self) {
        self.closed += 1;
        let next = self.closed + self.window;
        if next >= self.limit + self.window / 2 {
            self.limit = next;
            self.pending_update = true;
        }
    }
}

/// The reason a stream sprang into existence, as reported to accept
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenReason {
    /// A frame referenced the stream directly
    RecvFrame,
    /// A higher-numbered stream in the same category was referenced
    HigherOpen,
}

/// Peer-advertised initial limits applied to newly created streams
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerStreamLimits {
    pub max_stream_data_bidi_local: VarInt,
    pub max_stream_data_bidi_remote: VarInt,
    pub max_stream_data_uni: VarInt,
    pub max_streams_bidi: VarInt,
    pub max_streams_uni: VarInt,
    pub max_data: VarInt,
}

fn type_index(stream_type: StreamType) -> usize {
    match stream_type {
        StreamType::Bidirectional => 0,
        StreamType::Unidirectional => 1,
    }
}

pub struct Manager {
    local: endpoint::Type,
    streams: HashMap<StreamId, Entry>,
    issuers: [Issuer; 2],
    acceptors: [Acceptor; 2],
    /// Connection-level send credit granted by the peer
    pub conn_tx: TxLimiter,
    /// Connection-level receive credit granted to the peer
    pub conn_rx: RxLimiter,
    peer_limits: PeerStreamLimits,
    local_limits: Limits,
    pending: VecDeque<Control>,
    in_flight: Vec<(Control, AckToken)>,
    accept_queue: VecDeque<(StreamId, OpenReason)>,
    send_buffer_capacity: usize,
}

impl Manager {
    pub fn new(local: endpoint::Type, limits: &Limits) -> Self {
        Self {
            local,
            streams: HashMap::new(),
            issuers: [Issuer::new(), Issuer::new()],
            acceptors: [
                Acceptor::new(limits.initial_max_streams_bidi.as_u64()),
                Acceptor::new(limits.initial_max_streams_uni.as_u64()),
            ],
            conn_tx: TxLimiter::new(VarInt::ZERO),
            conn_rx: RxLimiter::new(limits.initial_max_data),
            peer_limits: PeerStreamLimits::default(),
            local_limits: *limits,
            pending: VecDeque::new(),
            in_flight: Vec::new(),
            accept_queue: VecDeque::new(),
            send_buffer_capacity: 256 * 1024,
        }
    }

    /// Applies the peer's transport parameters, raising limits on already
    /// existing streams (0-RTT opens them before the handshake finishes)
    pub fn on_peer_limits(&mut self, peer: PeerStreamLimits) {
        self.peer_limits = peer;
        self.conn_tx.on_limit(peer.max_data);
        self.issuers[type_index(StreamType::Bidirectional)].peer_limit =
            peer.max_streams_bidi.as_u64();
        self.issuers[type_index(StreamType::Unidirectional)].peer_limit =
            peer.max_streams_uni.as_u64();

        for (id, entry) in self.streams.iter_mut() {
            if let Some(send) = entry.send.as_mut() {
                send.on_max_stream_data(send_limit_for(self.local, *id, &peer));
            }
        }
    }

    // ===== host-facing operations =====

    /// Opens a locally-initiated stream
    pub fn open(&mut self, stream_type: StreamType) -> Result<StreamId, StreamError> {
        let index = type_index(stream_type);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint MUST NOT open more streams than permitted by the
        //# current stream limit set by its peer.
        if self.issuers[index].next_seq >= self.issuers[index].peer_limit {
            let limit = self.issuers[index].peer_limit;
            if self.issuers[index].blocked_reported != Some(limit) {
                self.issuers[index].blocked_reported = Some(limit);
                self.pending
                    .push_back(Control::MaxStreamsBlockedMarker(stream_type, limit));
            }
            return Err(StreamError::StreamsExhausted);
        }

        let issuer = &mut self.issuers[index];
        let id = StreamId::nth(self.local, stream_type, issuer.next_seq)
            .ok_or(StreamError::StreamIdExhausted)?;
        issuer.next_seq += 1;

        let mut entry = Entry::default();
        entry.send = Some(SendStream::new(
            send_limit_for(self.local, id, &self.peer_limits),
            self.send_buffer_capacity,
        ));
        if stream_type.is_bidirectional() {
            entry.recv = Some(RecvStream::new(
                self.local_limits.initial_max_stream_data_bidi_local,
            ));
        }
        self.streams.insert(id, entry);
        Ok(id)
    }

    /// Takes the next peer-initiated stream, if one arrived
    pub fn accept(&mut self) -> Option<(StreamId, OpenReason)> {
        self.accept_queue.pop_front()
    }

    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError> {
        self.send_half(id)?.write(data)
    }

    pub fn finish(&mut self, id: StreamId) -> Result<(), StreamError> {
        self.send_half(id)?.finish()
    }

    pub fn reset(&mut self, id: StreamId, code: VarInt) -> Result<(), StreamError> {
        self.send_half(id)?.reset(code)
    }

    pub fn read(&mut self, id: StreamId, out: &mut [u8]) -> Result<(usize, bool), StreamError> {
        let entry = self
            .streams
            .get_mut(&id)
            .ok_or(StreamError::UnknownStream)?;
        let recv = entry.recv.as_mut().ok_or(StreamError::InvalidDirection)?;
        let result = recv.read(out);
        if let Ok((copied, _)) = result {
            self.conn_rx.on_data_consumed(copied);
        }
        result
    }

    pub fn stop_sending(&mut self, id: StreamId, code: VarInt) -> Result<(), StreamError> {
        let entry = self
            .streams
            .get_mut(&id)
            .ok_or(StreamError::UnknownStream)?;
        let recv = entry.recv.as_mut().ok_or(StreamError::InvalidDirection)?;
        recv.stop_sending(code);
        Ok(())
    }

    fn send_half(&mut self, id: StreamId) -> Result<&mut SendStream, StreamError> {
        let entry = self
            .streams
            .get_mut(&id)
            .ok_or(StreamError::UnknownStream)?;
        entry.send.as_mut().ok_or(StreamError::InvalidDirection)
    }

    // ===== frame handlers =====

    pub fn on_stream_frame(&mut self, frame: &frame::Stream) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        if !id.is_receivable_by(self.local) {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
            //# An endpoint MUST terminate the connection with error
            //# STREAM_STATE_ERROR if it receives a STREAM frame for a locally
            //# initiated stream that has not yet been created, or for a send-
            //# only stream.
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("STREAM frame on a send-only stream"));
        }

        let Some(entry) = self.entry_for_peer_frame(id)? else {
            return Ok(());
        };
        let Some(recv) = entry.recv.as_mut() else {
            return Ok(());
        };

        let growth = recv.on_stream_frame(frame.offset, frame.data, frame.is_fin)?;
        self.conn_rx.on_data_received_delta(growth)?;
        Ok(())
    }

    pub fn on_reset_stream(&mut self, frame: &frame::ResetStream) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        if !id.is_receivable_by(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("RESET_STREAM on a send-only stream"));
        }

        let Some(entry) = self.entry_for_peer_frame(id)? else {
            return Ok(());
        };
        let Some(recv) = entry.recv.as_mut() else {
            return Ok(());
        };

        let growth = recv.on_reset(frame.application_error_code, frame.final_size)?;
        self.conn_rx.on_data_received_delta(growth)?;
        Ok(())
    }

    pub fn on_stop_sending(&mut self, frame: &frame::StopSending) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
        //# An endpoint that receives a STOP_SENDING frame for a receive-only
        //# stream MUST terminate the connection with error STREAM_STATE_ERROR.
        if !id.is_sendable_by(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("STOP_SENDING for a receive-only stream"));
        }
        if id.initiator() == self.local && !self.exists_or_closed_local(id) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("STOP_SENDING for a stream that was never opened"));
        }

        // peer-initiated bidi streams may be implicitly opened by this frame
        if id.initiator() != self.local {
            self.entry_for_peer_frame(id)?;
        }
        if let Some(entry) = self.streams.get_mut(&id) {
            if let Some(send) = entry.send.as_mut() {
                send.on_stop_sending(frame.application_error_code);
            }
        }
        Ok(())
    }

    pub fn on_max_data(&mut self, frame: &frame::MaxData) {
        self.conn_tx.on_limit(frame.maximum_data);
    }

    pub fn on_max_stream_data(
        &mut self,
        frame: &frame::MaxStreamData,
    ) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
        //# Receiving a MAX_STREAM_DATA frame for a locally initiated stream
        //# that has not yet been created MUST be treated as a connection
        //# error of type STREAM_STATE_ERROR.
        if !id.is_sendable_by(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("MAX_STREAM_DATA for a receive-only stream"));
        }
        if id.initiator() == self.local && !self.exists_or_closed_local(id) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("MAX_STREAM_DATA for a stream that was never opened"));
        }

        if id.initiator() != self.local {
            self.entry_for_peer_frame(id)?;
        }
        if let Some(entry) = self.streams.get_mut(&id) {
            if let Some(send) = entry.send.as_mut() {
                send.on_max_stream_data(frame.maximum_stream_data);
            }
        }
        Ok(())
    }

    pub fn on_max_streams(&mut self, frame: &frame::MaxStreams) {
        let issuer = &mut self.issuers[type_index(frame.stream_type)];
        if frame.maximum_streams.as_u64() > issuer.peer_limit {
            issuer.peer_limit = frame.maximum_streams.as_u64();
        }
    }

    pub fn on_streams_blocked(&self, frame: &frame::StreamsBlocked) {
        // informational; the acceptor window opens as streams close
        tracing::debug!(stream_type = ?frame.stream_type, limit = %frame.stream_limit, "peer is streams-blocked");
    }

    pub fn on_data_blocked(&self, frame: &frame::DataBlocked) {
        tracing::debug!(limit = %frame.data_limit, "peer is data-blocked");
    }

    pub fn on_stream_data_blocked(&self, frame: &frame::StreamDataBlocked) {
        tracing::debug!(stream_id = %frame.stream_id, limit = %frame.stream_data_limit, "peer is stream-data-blocked");
    }

    /// Looks up the stream for a peer-sent stream-scoped frame,
    /// implicitly opening peer-initiated streams as needed. `None` means
    /// the stream existed once and is closed; the frame is stale.
    fn entry_for_peer_frame(
        &mut self,
        id: StreamId,
    ) -> Result<Option<&mut Entry>, transport::Error> {
        if id.initiator() == self.local {
            if !self.exists_or_closed_local(id) {
                return Err(transport::Error::STREAM_STATE_ERROR
                    .with_reason("frame for a stream that was never opened"));
            }
            return Ok(self.streams.get_mut(&id));
        }

        let stream_type = id.stream_type();
        let acceptor_index = type_index(stream_type);
        let sequence = id.sequence();

        if sequence >= self.acceptors[acceptor_index].opened {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
            //# An endpoint that receives a frame with a stream ID exceeding
            //# the limit it has sent MUST treat this as a connection error of
            //# type STREAM_LIMIT_ERROR
            if sequence >= self.acceptors[acceptor_index].limit {
                return Err(transport::Error::STREAM_LIMIT_ERROR);
            }

            // implicitly open every skipped stream in this category first,
            // then the one the frame references
            let first = self.acceptors[acceptor_index].opened;
            for seq in first..=sequence {
                let new_id = StreamId::nth(self.local.peer_type(), stream_type, seq)
                    .ok_or(transport::Error::STREAM_LIMIT_ERROR)?;
                self.insert_remote(new_id);
                let reason = if seq == sequence {
                    OpenReason::RecvFrame
                } else {
                    OpenReason::HigherOpen
                };
                self.accept_queue.push_back((new_id, reason));
            }
            self.acceptors[acceptor_index].opened = sequence + 1;
        }

        Ok(self.streams.get_mut(&id))
    }

    fn insert_remote(&mut self, id: StreamId) {
        let mut entry = Entry::default();
        if id.stream_type().is_bidirectional() {
            entry.send = Some(SendStream::new(
                send_limit_for(self.local, id, &self.peer_limits),
                self.send_buffer_capacity,
            ));
            entry.recv = Some(RecvStream::new(
                self.local_limits.initial_max_stream_data_bidi_remote,
            ));
        } else {
            entry.recv = Some(RecvStream::new(
                self.local_limits.initial_max_stream_data_uni,
            ));
        }
        self.streams.insert(id, entry);
    }

    /// True if a locally-initiated stream exists now or existed before
    fn exists_or_closed_local(&self, id: StreamId) -> bool {
        id.sequence() < self.issuers[type_index(id.stream_type())].next_seq
    }

    // ===== transmission =====

    /// True if any frame wants to be sent
    pub fn has_transmission_interest(&self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        if self.acceptors.iter().any(|a| a.pending_update) {
            return true;
        }
        self.streams.values().any(|entry| {
            entry
                .send
                .as_ref()
                .map_or(false, |s| s.has_transmission_interest())
                || entry
                    .recv
                    .as_ref()
                    .map_or(false, |r| r.stop_sending.is_some() || r.flow.has_update())
        })
    }

    /// Encodes as many stream-scoped frames as fit.
    /// Returns whether anything was written.
    pub fn on_transmit(&mut self, encoder: &mut EncoderBuffer, waiters: &mut Waiters) -> bool {
        let mut wrote = false;
        wrote |= self.transmit_flow_updates(encoder, waiters);
        wrote |= self.transmit_control(encoder, waiters);
        wrote |= self.transmit_stream_data(encoder, waiters);
        wrote
    }

    fn transmit_flow_updates(&mut self, encoder: &mut EncoderBuffer, waiters: &mut Waiters) -> bool {
        let mut wrote = false;

        if let Some(limit) = self.conn_rx.take_update() {
            let frame = frame::MaxData {
                maximum_data: limit,
            };
            if encode_if_fits(encoder, &frame) {
                self.track_control(Control::MaxData, waiters);
                wrote = true;
            } else {
                self.conn_rx.retransmit_update();
                return wrote;
            }
        }

        for stream_type in [StreamType::Bidirectional, StreamType::Unidirectional] {
            let acceptor = &mut self.acceptors[type_index(stream_type)];
            if acceptor.pending_update {
                let frame = frame::MaxStreams {
                    stream_type,
                    maximum_streams: VarInt::new(acceptor.limit).unwrap_or(VarInt::MAX),
                };
                if encode_if_fits(encoder, &frame) {
                    acceptor.pending_update = false;
                    self.track_control(Control::MaxStreams { stream_type }, waiters);
                    wrote = true;
                }
            }
        }

        // per-stream window updates and stop-sending requests
        let ids: SmallVec<[StreamId; 8]> = self
            .streams
            .iter()
            .filter(|(_, e)| {
                e.recv
                    .as_ref()
                    .map_or(false, |r| r.flow.has_update() || r.stop_sending.is_some())
            })
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            let update = self
                .streams
                .get_mut(&id)
                .and_then(|e| e.recv.as_mut())
                .and_then(|r| r.flow.take_update());
            if let Some(limit) = update {
                let frame = frame::MaxStreamData {
                    stream_id: id.as_varint(),
                    maximum_stream_data: limit,
                };
                if encode_if_fits(encoder, &frame) {
                    self.track_control(Control::MaxStreamData { id }, waiters);
                    wrote = true;
                } else {
                    if let Some(recv) = self.streams.get_mut(&id).and_then(|e| e.recv.as_mut()) {
                        recv.flow.retransmit_update();
                    }
                    return wrote;
                }
            }

            let stop = self
                .streams
                .get_mut(&id)
                .and_then(|e| e.recv.as_mut())
                .and_then(|r| r.stop_sending.take());
            if let Some(code) = stop {
                let frame = frame::StopSending {
                    stream_id: id.as_varint(),
                    application_error_code: code,
                };
                if encode_if_fits(encoder, &frame) {
                    self.track_control(Control::StopSending { id, code }, waiters);
                    wrote = true;
                } else {
                    if let Some(recv) = self.streams.get_mut(&id).and_then(|e| e.recv.as_mut()) {
                        recv.stop_sending = Some(code);
                    }
                    return wrote;
                }
            }
        }

        wrote
    }

    fn transmit_control(&mut self, encoder: &mut EncoderBuffer, waiters: &mut Waiters) -> bool {
        let mut wrote = false;
        while let Some(control) = self.pending.pop_front() {
            let fits = match control {
                Control::MaxStreamsBlockedMarker(stream_type, limit) => {
                    let frame = frame::StreamsBlocked {
                        stream_type,
                        stream_limit: VarInt::new(limit).unwrap_or(VarInt::MAX),
                    };
                    // blocked frames are informational and untracked
                    encode_if_fits(encoder, &frame)
                }
                Control::StopSending { id, code } => {
                    let frame = frame::StopSending {
                        stream_id: id.as_varint(),
                        application_error_code: code,
                    };
                    if encode_if_fits(encoder, &frame) {
                        self.track_control(control, waiters);
                        true
                    } else {
                        false
                    }
                }
                Control::MaxData => {
                    let frame = frame::MaxData {
                        maximum_data: self.conn_rx.limit(),
                    };
                    if encode_if_fits(encoder, &frame) {
                        self.track_control(control, waiters);
                        true
                    } else {
                        false
                    }
                }
                Control::MaxStreamData { id } => {
                    let Some(limit) = self
                        .streams
                        .get(&id)
                        .and_then(|e| e.recv.as_ref())
                        .map(|r| r.flow.limit())
                    else {
                        continue;
                    };
                    let frame = frame::MaxStreamData {
                        stream_id: id.as_varint(),
                        maximum_stream_data: limit,
                    };
                    if encode_if_fits(encoder, &frame) {
                        self.track_control(control, waiters);
                        true
                    } else {
                        false
                    }
                }
                Control::MaxStreams { stream_type } => {
                    let frame = frame::MaxStreams {
                        stream_type,
                        maximum_streams: VarInt::new(
                            self.acceptors[type_index(stream_type)].limit,
                        )
                        .unwrap_or(VarInt::MAX),
                    };
                    if encode_if_fits(encoder, &frame) {
                        self.track_control(control, waiters);
                        true
                    } else {
                        false
                    }
                }
            };

            if fits {
                wrote = true;
            } else {
                self.pending.push_front(control);
                break;
            }
        }
        wrote
    }

    fn transmit_stream_data(&mut self, encoder: &mut EncoderBuffer, waiters: &mut Waiters) -> bool {
        let mut wrote = false;

        let ids: SmallVec<[StreamId; 8]> = self
            .streams
            .iter()
            .filter(|(_, e)| {
                e.send
                    .as_ref()
                    .map_or(false, |s| s.has_transmission_interest())
            })
            .map(|(id, _)| *id)
            .collect();

        let mut any_data_pending = false;

        for id in ids {
            let Some(entry) = self.streams.get_mut(&id) else {
                continue;
            };
            let Some(send) = entry.send.as_mut() else {
                continue;
            };

            // a queued reset replaces stream data
            if let Some((code, final_size, waiter)) = send.produce_reset() {
                let frame = frame::ResetStream {
                    stream_id: id.as_varint(),
                    application_error_code: code,
                    final_size,
                };
                if encode_if_fits(encoder, &frame) {
                    waiters.push(waiter);
                    wrote = true;
                }
                continue;
            }

            loop {
                // worst-case frame overhead: tag, stream id, offset, length
                let overhead = 1 + id.as_varint().encoding_len() + 8 + 4;
                let Some(max_data) = encoder.remaining_capacity().checked_sub(overhead) else {
                    break;
                };

                let conn_credit = self.conn_tx.available();
                let Some((fragment, waiter, consumed)) = send.produce(max_data, conn_credit)
                else {
                    break;
                };

                let frame = frame::Stream {
                    stream_id: id.as_varint(),
                    offset: VarInt::new(fragment.offset).expect("offsets are varint bounded"),
                    is_last_frame: false,
                    is_fin: fragment.fin,
                    data: &fragment.data[..],
                };
                debug_assert!(frame.encoding_size_for_encoder(encoder) <= encoder.remaining_capacity());
                encoder.encode(&frame);
                waiters.push(waiter);
                self.conn_tx.on_data_sent(consumed as usize);
                wrote = true;
            }

            if let Some(limit) = send.blocked_signal() {
                let frame = frame::StreamDataBlocked {
                    stream_id: id.as_varint(),
                    stream_data_limit: limit,
                };
                if encode_if_fits(encoder, &frame) {
                    wrote = true;
                }
            }

            any_data_pending |= send.has_transmission_interest();
        }

        if let Some(limit) = self.conn_tx.blocked_signal(any_data_pending) {
            let frame = frame::DataBlocked { data_limit: limit };
            if encode_if_fits(encoder, &frame) {
                wrote = true;
            }
        }

        wrote
    }

    fn track_control(&mut self, control: Control, waiters: &mut Waiters) {
        let token = AckToken::new();
        waiters.push(token.waiter());
        self.in_flight.push((control, token));
    }

    // ===== maintenance =====

    /// Reclaims ack/loss outcomes and garbage-collects closed streams
    pub fn sweep(&mut self) {
        // control frames
        let mut requeue: Vec<Control> = Vec::new();
        self.in_flight.retain(|(control, token)| match token.outcome() {
            AckOutcome::Pending => true,
            AckOutcome::Acked => false,
            AckOutcome::Lost => {
                requeue.push(*control);
                false
            }
        });
        for control in requeue {
            match control {
                Control::MaxData => self.conn_rx.retransmit_update(),
                Control::MaxStreamData { id } => {
                    if let Some(recv) = self.streams.get_mut(&id).and_then(|e| e.recv.as_mut()) {
                        recv.flow.retransmit_update();
                    }
                }
                Control::MaxStreams { stream_type } => {
                    self.acceptors[type_index(stream_type)].pending_update = true;
                }
                Control::StopSending { id, code } => {
                    if let Some(recv) = self.streams.get_mut(&id).and_then(|e| e.recv.as_mut()) {
                        recv.stop_sending = Some(code);
                    }
                }
                Control::MaxStreamsBlockedMarker(..) => {}
            }
        }

        // streams
        let mut closed: SmallVec<[StreamId; 4]> = SmallVec::new();
        for (id, entry) in self.streams.iter_mut() {
            let send_done = match entry.send.as_mut() {
                Some(send) => send.sweep(),
                None => true,
            };
            let recv_done = entry.recv.as_ref().map_or(true, |r| r.is_finished());
            if send_done && recv_done {
                closed.push(*id);
            }
        }

        for id in closed {
            self.streams.remove(&id);
            if id.initiator() != self.local {
                self.acceptors[type_index(id.stream_type())].on_stream_closed();
            }
        }
    }
}

/// The send-direction flow limit the peer grants for a given stream
fn send_limit_for(local: endpoint::Type, id: StreamId, peer: &PeerStreamLimits) -> VarInt {
    match (id.stream_type(), id.initiator() == local) {
        (StreamType::Unidirectional, _) => peer.max_stream_data_uni,
        // we send on a stream we opened: the peer sees it as remote-initiated
        (StreamType::Bidirectional, true) => peer.max_stream_data_bidi_remote,
        // we send on a stream the peer opened: the peer sees it as local
        (StreamType::Bidirectional, false) => peer.max_stream_data_bidi_local,
    }
}

fn encode_if_fits<T: EncoderValue>(encoder: &mut EncoderBuffer, frame: &T) -> bool {
    if frame.encoding_size_for_encoder(encoder) <= encoder.remaining_capacity() {
        encoder.encode(frame);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests;
