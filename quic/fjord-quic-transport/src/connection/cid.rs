// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection ID issuance and retirement for both directions

use crate::sync::{AckOutcome, AckToken, PacketWaiter};
use fjord_quic_core::{
    connection::ConnectionId, frame, random, stateless_reset, transport, varint::VarInt,
};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Length of the connection IDs this endpoint issues
pub const LOCAL_ID_LEN: usize = 8;

/// How many IDs we keep issued to the peer, bounded by its
/// active_connection_id_limit
const ISSUE_TARGET: u64 = 4;

#[derive(Debug)]
struct LocalId {
    sequence: u64,
    id: ConnectionId,
    token: stateless_reset::Token,
    retired: bool,
}

#[derive(Debug)]
struct RemoteId {
    sequence: u64,
    id: ConnectionId,
    token: Option<stateless_reset::Token>,
}

#[derive(Debug)]
enum PendingFrame {
    NewConnectionId { sequence: u64 },
    RetireConnectionId { sequence: u64 },
}

/// Both directions of connection ID state
#[derive(Debug)]
pub struct Registry {
    local: SmallVec<[LocalId; 4]>,
    local_next_seq: u64,
    /// The peer's active_connection_id_limit
    peer_limit: u64,
    remote: SmallVec<[RemoteId; 4]>,
    /// Our active_connection_id_limit
    local_limit: u64,
    remote_retire_prior_to: u64,
    /// Sequence of the remote ID used as DCID on outbound packets
    active_remote_seq: u64,
    pending: VecDeque<PendingFrame>,
    in_flight: Vec<(u64, bool, AckToken)>, // (sequence, is_new_cid, token)
}

impl Registry {
    /// Seeds the registry with sequence-0 IDs: ours (sent as SCID during
    /// the handshake) and the peer's (its handshake SCID).
    pub fn new(
        local_id: ConnectionId,
        local_token: stateless_reset::Token,
        local_limit: VarInt,
    ) -> Self {
        Self {
            local: SmallVec::from_iter([LocalId {
                sequence: 0,
                id: local_id,
                token: local_token,
                retired: false,
            }]),
            local_next_seq: 1,
            peer_limit: 2,
            remote: SmallVec::new(),
            local_limit: local_limit.as_u64(),
            remote_retire_prior_to: 0,
            active_remote_seq: 0,
            pending: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// Installs or replaces the peer's sequence-0 ID. Replacement happens
    /// once, when a client adopts the SCID of the server's first response.
    pub fn set_remote_initial(&mut self, id: ConnectionId) {
        match self.remote.iter_mut().find(|entry| entry.sequence == 0) {
            Some(entry) => entry.id = id,
            None => self.remote.push(RemoteId {
                sequence: 0,
                id,
                token: None,
            }),
        }
    }

    /// Attaches the stateless_reset_token transport parameter to the
    /// peer's sequence-0 ID
    pub fn set_remote_initial_token(&mut self, token: stateless_reset::Token) {
        if let Some(entry) = self.remote.iter_mut().find(|entry| entry.sequence == 0) {
            entry.token = Some(token);
        }
    }

    pub fn on_peer_limit(&mut self, limit: VarInt) {
        self.peer_limit = limit.as_u64();
    }

    /// Our ID the peer addresses us with; its length is needed to parse
    /// short headers
    pub fn local_id(&self) -> &ConnectionId {
        // sequence 0 always exists
        &self.local[0].id
    }

    /// The stateless reset token tied to our sequence-0 ID, advertised in
    /// the server's transport parameters
    pub fn local_token(&self) -> stateless_reset::Token {
        self.local[0].token
    }

    /// The DCID for outbound packets
    pub fn active_remote_id(&self) -> ConnectionId {
        self.remote
            .iter()
            .find(|entry| entry.sequence == self.active_remote_seq)
            .or_else(|| self.remote.iter().min_by_key(|entry| entry.sequence))
            .map(|entry| entry.id)
            .unwrap_or(ConnectionId::EMPTY)
    }

    /// All live stateless reset tokens for inbound comparison
    pub fn reset_tokens(&self) -> impl Iterator<Item = &stateless_reset::Token> {
        self.remote.iter().filter_map(|entry| entry.token.as_ref())
    }

    /// Issues additional local IDs up to the peer's limit.
    /// Called once the handshake completes.
    pub fn issue_local_ids<R: random::Generator + ?Sized>(&mut self, random: &mut R) {
        let target = self.peer_limit.min(ISSUE_TARGET);
        while (self.local.iter().filter(|e| !e.retired).count() as u64) < target {
            let mut id_bytes = [0u8; LOCAL_ID_LEN];
            random.fill(random::Usage::ConnectionId, &mut id_bytes);
            let mut token_bytes = [0u8; stateless_reset::LEN];
            random.fill(random::Usage::StatelessReset, &mut token_bytes);

            let sequence = self.local_next_seq;
            self.local_next_seq += 1;
            self.local.push(LocalId {
                sequence,
                id: ConnectionId::try_from_bytes(&id_bytes).expect("fixed length is valid"),
                token: stateless_reset::Token::from(token_bytes),
                retired: false,
            });
            self.pending
                .push_back(PendingFrame::NewConnectionId { sequence });
        }
    }

    /// Handles NEW_CONNECTION_ID from the peer
    pub fn on_new_connection_id(
        &mut self,
        frame: &frame::NewConnectionId,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# An endpoint that is sending packets with a zero-length
        //# Destination Connection ID MUST treat receipt of a
        //# NEW_CONNECTION_ID frame as a connection error of type
        //# PROTOCOL_VIOLATION.
        if self
            .remote
            .iter()
            .find(|e| e.sequence == 0)
            .map_or(false, |e| e.id.is_empty())
        {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("NEW_CONNECTION_ID from a peer using zero-length ids"));
        }

        let sequence = frame.sequence_number.as_u64();
        let id = ConnectionId::try_from_bytes(frame.connection_id)
            .ok_or(transport::Error::FRAME_ENCODING_ERROR)?;
        let token = stateless_reset::Token::from(*frame.stateless_reset_token);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# If an endpoint receives a NEW_CONNECTION_ID frame that repeats a
        //# previously issued connection ID with a different Stateless Reset
        //# Token field value or a different Sequence Number field value, or
        //# if a sequence number is used for different connection IDs, the
        //# endpoint MAY treat that receipt as a connection error of type
        //# PROTOCOL_VIOLATION.
        if let Some(existing) = self.remote.iter().find(|e| e.sequence == sequence) {
            if existing.id != id {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("sequence number reused for a different connection id"));
            }
            // a pure retransmission
            return Ok(());
        }

        let retire_prior_to = frame.retire_prior_to.as_u64();

        if sequence < self.remote_retire_prior_to {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.2
            //# An endpoint that receives a NEW_CONNECTION_ID frame with a
            //# sequence number smaller than the Retire Prior To field of a
            //# previously received NEW_CONNECTION_ID frame MUST send a
            //# corresponding RETIRE_CONNECTION_ID frame
            self.pending
                .push_back(PendingFrame::RetireConnectionId { sequence });
            return Ok(());
        }

        self.remote.push(RemoteId {
            sequence,
            id,
            token: Some(token),
        });

        if retire_prior_to > self.remote_retire_prior_to {
            self.remote_retire_prior_to = retire_prior_to;
            let retired: SmallVec<[u64; 4]> = self
                .remote
                .iter()
                .filter(|e| e.sequence < retire_prior_to)
                .map(|e| e.sequence)
                .collect();
            for sequence in retired {
                self.remote.retain(|e| e.sequence != sequence);
                self.pending
                    .push_back(PendingFrame::RetireConnectionId { sequence });
            }
            if self.active_remote_seq < retire_prior_to {
                self.active_remote_seq = retire_prior_to;
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# After processing a NEW_CONNECTION_ID frame and adding and
        //# retiring active connection IDs, if the number of active
        //# connection IDs exceeds the value advertised in its
        //# active_connection_id_limit transport parameter, an endpoint MUST
        //# close the connection with an error of type
        //# CONNECTION_ID_LIMIT_ERROR.
        if self.remote.len() as u64 > self.local_limit {
            return Err(transport::Error::CONNECTION_ID_LIMIT_ERROR);
        }

        Ok(())
    }

    /// Handles RETIRE_CONNECTION_ID from the peer; `packet_dcid` is the
    /// DCID of the packet carrying the frame
    pub fn on_retire_connection_id(
        &mut self,
        frame: &frame::RetireConnectionId,
        packet_dcid: &[u8],
    ) -> Result<(), transport::Error> {
        let sequence = frame.sequence_number.as_u64();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
        //# Receipt of a RETIRE_CONNECTION_ID frame containing a sequence
        //# number greater than any previously sent to the peer MUST be
        //# treated as a connection error of type PROTOCOL_VIOLATION.
        if sequence >= self.local_next_seq {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("retirement of a connection id that was never issued"));
        }

        let Some(entry) = self.local.iter_mut().find(|e| e.sequence == sequence) else {
            return Ok(());
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
        //# The sequence number specified in a RETIRE_CONNECTION_ID frame MUST
        //# NOT refer to the Destination Connection ID field of the packet in
        //# which the frame is contained.  The peer MAY treat this as a
        //# connection error of type PROTOCOL_VIOLATION.
        if entry.id.as_bytes() == packet_dcid {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("retirement of the connection id in use"));
        }

        entry.retired = true;
        Ok(())
    }

    #[inline]
    pub fn has_transmission_interest(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The next pending CID maintenance frame, if any.
    /// The returned waiter rides in the carrying packet.
    pub fn produce(&mut self) -> Option<(CidFrame, PacketWaiter)> {
        loop {
            let pending = self.pending.pop_front()?;
            let token = AckToken::new();
            let waiter = token.waiter();

            match pending {
                PendingFrame::NewConnectionId { sequence } => {
                    let Some(entry) = self.local.iter().find(|e| e.sequence == sequence) else {
                        continue;
                    };
                    self.in_flight.push((sequence, true, token));
                    return Some((
                        CidFrame::New {
                            sequence,
                            retire_prior_to: 0,
                            id: entry.id,
                            reset_token: entry.token,
                        },
                        waiter,
                    ));
                }
                PendingFrame::RetireConnectionId { sequence } => {
                    self.in_flight.push((sequence, false, token));
                    return Some((CidFrame::Retire { sequence }, waiter));
                }
            }
        }
    }

    /// Requeues lost maintenance frames
    pub fn sweep(&mut self) {
        let mut requeue: Vec<PendingFrame> = Vec::new();
        self.in_flight
            .retain(|(sequence, is_new, token)| match token.outcome() {
                AckOutcome::Pending => true,
                AckOutcome::Acked => false,
                AckOutcome::Lost => {
                    requeue.push(if *is_new {
                        PendingFrame::NewConnectionId {
                            sequence: *sequence,
                        }
                    } else {
                        PendingFrame::RetireConnectionId {
                            sequence: *sequence,
                        }
                    });
                    false
                }
            });
        self.pending.extend(requeue);
    }
}

/// A connection ID maintenance frame ready for encoding
#[derive(Debug)]
pub enum CidFrame {
    New {
        sequence: u64,
        retire_prior_to: u64,
        id: ConnectionId,
        reset_token: stateless_reset::Token,
    },
    Retire {
        sequence: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjord_quic_core::random::testing::Generator;

    fn registry() -> Registry {
        let mut registry = Registry::new(
            ConnectionId::TEST_ID,
            stateless_reset::Token::from([1; 16]),
            VarInt::from_u8(4),
        );
        registry.set_remote_initial(ConnectionId::try_from_bytes(&[9, 9]).unwrap());
        registry
    }

    fn new_cid_frame(sequence: u8, retire_prior_to: u8, id_byte: u8) -> frame::NewConnectionId<'static> {
        static TOKEN: [u8; 16] = [7; 16];
        let id: &'static [u8] = Box::leak(vec![id_byte; 4].into_boxed_slice());
        frame::NewConnectionId {
            sequence_number: VarInt::from_u8(sequence),
            retire_prior_to: VarInt::from_u8(retire_prior_to),
            connection_id: id,
            stateless_reset_token: &TOKEN,
        }
    }

    #[test]
    fn new_ids_are_stored_and_used() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_cid_frame(1, 0, 0xaa)).unwrap();
        assert_eq!(registry.active_remote_id().as_bytes(), &[9, 9]);
        assert_eq!(registry.reset_tokens().count(), 1);
    }

    #[test]
    fn duplicate_sequence_with_different_id_is_rejected() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_cid_frame(1, 0, 0xaa)).unwrap();
        // retransmission is fine
        registry.on_new_connection_id(&new_cid_frame(1, 0, 0xaa)).unwrap();
        // different id under the same sequence is not
        assert!(registry
            .on_new_connection_id(&new_cid_frame(1, 0, 0xbb))
            .is_err());
    }

    #[test]
    fn retire_prior_to_rotates_active_id() {
        let mut registry = registry();
        registry.on_new_connection_id(&new_cid_frame(1, 0, 0xaa)).unwrap();
        registry.on_new_connection_id(&new_cid_frame(2, 2, 0xbb)).unwrap();

        // sequences 0 and 1 are retired; the active id moves to 2
        assert_eq!(registry.active_remote_id().as_bytes(), &[0xbb; 4]);

        let mut retired = vec![];
        while let Some((frame, _)) = registry.produce() {
            if let CidFrame::Retire { sequence } = frame {
                retired.push(sequence);
            }
        }
        retired.sort_unstable();
        assert_eq!(retired, vec![0, 1]);
    }

    #[test]
    fn cid_limit_is_enforced() {
        let mut registry = registry();
        for sequence in 1..=3 {
            registry
                .on_new_connection_id(&new_cid_frame(sequence, 0, sequence))
                .unwrap();
        }
        // the 5th active id exceeds our limit of 4
        assert!(registry
            .on_new_connection_id(&new_cid_frame(4, 0, 4))
            .is_err());
    }

    #[test]
    fn retirement_of_unissued_id_is_rejected() {
        let mut registry = registry();
        let frame = frame::RetireConnectionId {
            sequence_number: VarInt::from_u8(1),
        };
        assert!(registry.on_retire_connection_id(&frame, &[0; 4]).is_err());
    }

    #[test]
    fn retirement_of_in_use_id_is_rejected() {
        let mut registry = registry();
        let frame = frame::RetireConnectionId {
            sequence_number: VarInt::ZERO,
        };
        let dcid = *registry.local_id();
        assert!(registry
            .on_retire_connection_id(&frame, dcid.as_bytes())
            .is_err());
    }

    #[test]
    fn issuance_respects_peer_limit() {
        let mut registry = registry();
        let mut random = Generator::default();
        registry.on_peer_limit(VarInt::from_u8(3));
        registry.issue_local_ids(&mut random);

        let mut issued = 0;
        while let Some((frame, _)) = registry.produce() {
            if matches!(frame, CidFrame::New { .. }) {
                issued += 1;
            }
        }
        // sequence 0 exists already; 2 more reach the limit of 3
        assert_eq!(issued, 2);
    }

    #[test]
    fn lost_frames_are_requeued() {
        let mut registry = registry();
        let mut random = Generator::default();
        registry.on_peer_limit(VarInt::from_u8(2));
        registry.issue_local_ids(&mut random);

        let (_, waiter) = registry.produce().unwrap();
        assert!(registry.produce().is_none());

        waiter.mark_lost();
        registry.sweep();
        assert!(registry.produce().is_some());
    }
}
