// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The sending half of a stream

use crate::{
    stream::{flow::TxLimiter, StreamError},
    sync::{AckOutcome, AckToken, PacketWaiter},
};
use bytes::Bytes;
use fjord_quic_core::{stream::state::Sender, varint::VarInt};
use std::collections::VecDeque;

/// A byte range queued for (re)transmission
#[derive(Debug)]
pub struct Fragment {
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
}

#[derive(Debug)]
struct InFlight {
    fragment: Fragment,
    token: AckToken,
}

#[derive(Debug)]
enum ResetState {
    Queued,
    Sent(AckToken),
    Acked,
}

#[derive(Debug)]
pub struct SendStream {
    state: Sender,
    /// Data accepted from the application but never yet emitted
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    /// Stream offset of the first byte in `queue`
    queue_offset: u64,
    fin_queued: bool,
    fin_emitted: bool,
    retransmit: VecDeque<Fragment>,
    in_flight: Vec<InFlight>,
    pub flow: TxLimiter,
    reset: Option<(VarInt, ResetState)>,
    /// Bound on `queued_bytes` before `write` short-counts
    buffer_capacity: usize,
}

impl SendStream {
    pub fn new(flow_limit: VarInt, buffer_capacity: usize) -> Self {
        Self {
            state: Sender::default(),
            queue: VecDeque::new(),
            queued_bytes: 0,
            queue_offset: 0,
            fin_queued: false,
            fin_emitted: false,
            retransmit: VecDeque::new(),
            in_flight: Vec::new(),
            flow: TxLimiter::new(flow_limit),
            reset: None,
            buffer_capacity,
        }
    }

    #[inline]
    pub fn state(&self) -> &Sender {
        &self.state
    }

    /// The final size this half would declare in a RESET_STREAM
    fn emitted_size(&self) -> u64 {
        self.queue_offset
    }

    /// Accepts application data, bounded by the local buffer capacity.
    ///
    /// Returns the number of bytes accepted; zero means the caller must
    /// wait for in-flight data to drain.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if let Some((code, _)) = &self.reset {
            return Err(StreamError::StreamReset(*code));
        }
        if self.fin_queued {
            return Err(StreamError::SendAfterFinish);
        }
        debug_assert!(self.state.is_ready() || self.state.is_sending());

        let accepted = data.len().min(self.buffer_capacity - self.queued_bytes.min(self.buffer_capacity));
        if accepted == 0 {
            return Ok(0);
        }

        self.queue.push_back(Bytes::copy_from_slice(&data[..accepted]));
        self.queued_bytes += accepted;
        if self.state.is_ready() {
            let _ = self.state.on_send();
        }
        Ok(accepted)
    }

    /// Marks the end of the stream; no further writes are accepted
    pub fn finish(&mut self) -> Result<(), StreamError> {
        if let Some((code, _)) = &self.reset {
            return Err(StreamError::StreamReset(*code));
        }
        self.fin_queued = true;
        Ok(())
    }

    /// Abruptly terminates the sending half
    pub fn reset(&mut self, code: VarInt) -> Result<(), StreamError> {
        if self.state.is_terminal() || self.state.is_reset_sent() {
            return Ok(());
        }
        self.state
            .on_reset()
            .map_err(|_| StreamError::InvalidState)?;
        self.reset = Some((code, ResetState::Queued));
        // everything queued is abandoned
        self.queue.clear();
        self.queued_bytes = 0;
        self.retransmit.clear();
        self.in_flight.clear();
        Ok(())
    }

    /// A STOP_SENDING frame from the peer requests a reset
    pub fn on_stop_sending(&mut self, code: VarInt) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
        //# An endpoint that receives a STOP_SENDING frame MUST send a
        //# RESET_STREAM frame if the stream is in the "Ready" or "Send"
        //# state.
        let _ = self.reset(code);
    }

    pub fn on_max_stream_data(&mut self, limit: VarInt) {
        self.flow.on_limit(limit);
    }

    /// The pending RESET_STREAM frame, if one needs transmission.
    /// The returned waiter rides in the carrying packet.
    pub fn produce_reset(&mut self) -> Option<(VarInt, VarInt, PacketWaiter)> {
        let final_size = VarInt::new(self.emitted_size()).expect("offsets are varint bounded");
        match &self.reset {
            Some((code, ResetState::Queued)) => {
                let code = *code;
                let token = AckToken::new();
                let waiter = token.waiter();
                self.reset = Some((code, ResetState::Sent(token)));
                Some((code, final_size, waiter))
            }
            _ => None,
        }
    }

    /// True if data, a fin, or a reset is waiting for packet space
    pub fn has_transmission_interest(&self) -> bool {
        if matches!(self.reset, Some((_, ResetState::Queued))) {
            return true;
        }
        if self.reset.is_some() {
            return false;
        }
        !self.retransmit.is_empty()
            || (!self.queue.is_empty() && self.flow.available() > 0)
            || (self.fin_queued && !self.fin_emitted && self.queue.is_empty())
    }

    /// Produces the next STREAM fragment within `max_data_len` data bytes
    /// and `connection_credit` connection-level flow credit.
    ///
    /// Returns the fragment, the waiter for the carrying packet, and the
    /// number of connection credits consumed (zero for retransmissions).
    pub fn produce(
        &mut self,
        max_data_len: usize,
        connection_credit: u64,
    ) -> Option<(Fragment, PacketWaiter, u64)> {
        if self.reset.is_some() {
            return None;
        }

        // lost fragments go out first and consume no new flow credit
        if let Some(mut fragment) = self.retransmit.pop_front() {
            if fragment.data.len() > max_data_len {
                if max_data_len == 0 {
                    self.retransmit.push_front(fragment);
                    return None;
                }
                let rest = Fragment {
                    offset: fragment.offset + max_data_len as u64,
                    data: fragment.data.slice(max_data_len..),
                    fin: fragment.fin,
                };
                fragment.data = fragment.data.slice(..max_data_len);
                fragment.fin = false;
                self.retransmit.push_front(rest);
            }
            let (fragment, waiter) = self.track(fragment);
            return Some((fragment, waiter, 0));
        }

        let credit = self
            .flow
            .available()
            .min(connection_credit)
            .min(max_data_len as u64) as usize;

        let mut emitted = Bytes::new();
        let offset = self.queue_offset;
        if credit > 0 {
            if let Some(mut chunk) = self.queue.pop_front() {
                if chunk.len() > credit {
                    self.queue.push_front(chunk.slice(credit..));
                    chunk = chunk.slice(..credit);
                }
                self.queued_bytes -= chunk.len();
                self.queue_offset += chunk.len() as u64;
                self.flow.on_data_sent(chunk.len());
                emitted = chunk;
            }
        }

        let fin = self.fin_queued && !self.fin_emitted && self.queue.is_empty();
        if emitted.is_empty() && !fin {
            return None;
        }

        if fin {
            self.fin_emitted = true;
            //= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
            //# After the application indicates that all stream data has been
            //# sent and a STREAM frame containing the FIN bit is sent, the
            //# sending part of the stream enters the "Data Sent" state.
            let _ = self.state.on_send_fin();
        }

        let consumed = emitted.len() as u64;
        let fragment = Fragment {
            offset,
            data: emitted,
            fin,
        };
        let (fragment, waiter) = self.track(fragment);
        Some((fragment, waiter, consumed))
    }

    fn track(&mut self, fragment: Fragment) -> (Fragment, PacketWaiter) {
        let token = AckToken::new();
        let waiter = token.waiter();
        self.in_flight.push(InFlight {
            fragment: Fragment {
                offset: fragment.offset,
                data: fragment.data.clone(),
                fin: fragment.fin,
            },
            token,
        });
        (fragment, waiter)
    }

    /// The STREAM_DATA_BLOCKED value to emit, if the stream is stopped
    /// exactly at its flow limit
    pub fn blocked_signal(&mut self) -> Option<VarInt> {
        let has_pending = !self.queue.is_empty();
        self.flow.blocked_signal(has_pending)
    }

    /// Reclaims acknowledged fragments and requeues lost ones.
    /// Returns true if the stream reached a terminal state.
    pub fn sweep(&mut self) -> bool {
        if let Some((code, ResetState::Sent(token))) = &self.reset {
            match token.outcome() {
                AckOutcome::Acked => {
                    let code = *code;
                    let _ = self.state.on_reset_acked();
                    self.reset = Some((code, ResetState::Acked));
                }
                AckOutcome::Lost => {
                    let code = *code;
                    self.reset = Some((code, ResetState::Queued));
                }
                AckOutcome::Pending => {}
            }
        }

        let mut requeue: Vec<Fragment> = Vec::new();
        self.in_flight.retain_mut(|entry| match entry.token.outcome() {
            AckOutcome::Pending => true,
            AckOutcome::Acked => false,
            AckOutcome::Lost => {
                requeue.push(Fragment {
                    offset: entry.fragment.offset,
                    data: entry.fragment.data.clone(),
                    fin: entry.fragment.fin,
                });
                false
            }
        });
        requeue.sort_by_key(|fragment| fragment.offset);
        for fragment in requeue.into_iter().rev() {
            self.retransmit.push_front(fragment);
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
        //# Once all stream data has been successfully acknowledged, the
        //# sending part of the stream enters the "Data Recvd" state
        if self.state.is_data_sent()
            && self.fin_emitted
            && self.in_flight.is_empty()
            && self.retransmit.is_empty()
        {
            let _ = self.state.on_all_data_acked();
        }

        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(limit: u64) -> SendStream {
        SendStream::new(VarInt::new(limit).unwrap(), 64 * 1024)
    }

    #[test]
    fn write_then_produce_then_ack() {
        let mut stream = stream(1000);
        assert_eq!(stream.write(b"hello world").unwrap(), 11);
        assert!(stream.state().is_sending());

        let (fragment, waiter, credit) = stream.produce(6, u64::MAX).unwrap();
        assert_eq!((fragment.offset, &fragment.data[..]), (0, &b"hello "[..]));
        assert_eq!(credit, 6);
        assert!(!fragment.fin);

        stream.finish().unwrap();
        let (fragment, waiter2, _) = stream.produce(100, u64::MAX).unwrap();
        assert_eq!((fragment.offset, &fragment.data[..]), (6, &b"world"[..]));
        assert!(fragment.fin);
        assert!(stream.state().is_data_sent());

        waiter.mark_acked();
        waiter2.mark_acked();
        assert!(stream.sweep());
        assert!(stream.state().is_terminal());
    }

    #[test]
    fn lost_fragment_is_retransmitted_at_original_offset() {
        let mut stream = stream(1000);
        stream.write(b"abcdef").unwrap();

        let (first, waiter, _) = stream.produce(3, u64::MAX).unwrap();
        assert_eq!((first.offset, &first.data[..]), (0, &b"abc"[..]));
        let (_, waiter2, _) = stream.produce(3, u64::MAX).unwrap();

        waiter.mark_lost();
        waiter2.mark_acked();
        stream.sweep();

        let (again, _, credit) = stream.produce(100, u64::MAX).unwrap();
        assert_eq!((again.offset, &again.data[..]), (0, &b"abc"[..]));
        // retransmissions never re-consume connection flow credit
        assert_eq!(credit, 0);
    }

    #[test]
    fn stream_flow_limit_blocks() {
        let mut stream = stream(100);
        stream.write(&[0u8; 200]).unwrap();

        let (fragment, _, _) = stream.produce(1000, u64::MAX).unwrap();
        assert_eq!(fragment.data.len(), 100);
        assert!(stream.produce(1000, u64::MAX).is_none());
        assert_eq!(stream.blocked_signal(), Some(VarInt::from_u8(100)));
        // reported once per limit
        assert_eq!(stream.blocked_signal(), None);

        stream.on_max_stream_data(VarInt::from_u16(250));
        let (fragment, _, _) = stream.produce(1000, u64::MAX).unwrap();
        assert_eq!(fragment.offset, 100);
        assert_eq!(fragment.data.len(), 100);
        assert_eq!(stream.blocked_signal(), None);
    }

    #[test]
    fn connection_credit_bounds_fresh_data() {
        let mut stream = stream(1000);
        stream.write(&[1u8; 50]).unwrap();
        let (fragment, _, consumed) = stream.produce(1000, 20).unwrap();
        assert_eq!(fragment.data.len(), 20);
        assert_eq!(consumed, 20);
    }

    #[test]
    fn reset_supersedes_data() {
        let mut stream = stream(1000);
        stream.write(b"doomed").unwrap();
        stream.produce(3, u64::MAX).unwrap();

        stream.reset(VarInt::from_u8(9)).unwrap();
        assert!(stream.produce(100, u64::MAX).is_none());
        assert!(matches!(
            stream.write(b"more"),
            Err(StreamError::StreamReset(_))
        ));

        let (code, final_size, waiter) = stream.produce_reset().unwrap();
        assert_eq!(code, VarInt::from_u8(9));
        assert_eq!(final_size, VarInt::from_u8(3));
        // only one reset frame at a time
        assert!(stream.produce_reset().is_none());

        waiter.mark_acked();
        assert!(stream.sweep());
        assert!(stream.state().is_terminal());
    }

    #[test]
    fn fin_only_frame() {
        let mut stream = stream(1000);
        stream.finish().unwrap();
        let (fragment, _, consumed) = stream.produce(100, 0).unwrap();
        assert!(fragment.fin);
        assert!(fragment.data.is_empty());
        assert_eq!(consumed, 0);
        assert!(stream.state().is_data_sent());
    }
}
