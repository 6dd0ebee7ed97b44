// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space state: packet number allocation, ACK
//! bookkeeping, loss recovery, the CRYPTO stream, and keys.

use crate::{ack::AckManager, buffer::Reassembler, recovery, sync::AckToken};
use bytes::Bytes;
use fjord_quic_core::{
    packet::number::PacketNumberSpace, time::Timestamp, transport, varint::VarInt,
};
use fjord_quic_crypto::{KeyPair, OneRttKey, PacketProtectionKeys};
use std::collections::VecDeque;

/// An outbound CRYPTO fragment that has not yet been acknowledged
#[derive(Debug)]
struct CryptoInFlight {
    offset: u64,
    data: Bytes,
    token: AckToken,
}

/// The handshake byte stream of one space: ordered delivery in both
/// directions, retransmission on loss, no flow control (bounded by a
/// buffer capacity instead).
#[derive(Debug)]
pub struct CryptoStream {
    tx_queue: VecDeque<(u64, Bytes)>,
    tx_offset: u64,
    in_flight: Vec<CryptoInFlight>,
    rx: Reassembler,
}

impl CryptoStream {
    pub fn new(rx_capacity: usize) -> Self {
        Self {
            tx_queue: VecDeque::new(),
            tx_offset: 0,
            in_flight: Vec::new(),
            rx: Reassembler::new(rx_capacity),
        }
    }

    /// Queues handshake bytes produced by the TLS engine
    pub fn push_tx(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.tx_queue
            .push_back((self.tx_offset, Bytes::copy_from_slice(data)));
        self.tx_offset += data.len() as u64;
    }

    #[inline]
    pub fn has_tx(&self) -> bool {
        !self.tx_queue.is_empty()
    }

    /// Takes up to `max_data_len` bytes for a CRYPTO frame.
    ///
    /// The returned waiter must be attached to the carrying packet's
    /// waiter list; the strong token stays with the fragment until it is
    /// acknowledged or requeued.
    pub fn produce(&mut self, max_data_len: usize) -> Option<(u64, Bytes, crate::sync::PacketWaiter)> {
        if max_data_len == 0 {
            return None;
        }
        let (offset, chunk) = self.tx_queue.pop_front()?;

        let (data, rest) = if chunk.len() > max_data_len {
            let data = chunk.slice(..max_data_len);
            let rest = chunk.slice(max_data_len..);
            (data, Some((offset + max_data_len as u64, rest)))
        } else {
            (chunk, None)
        };

        if let Some(rest) = rest {
            self.tx_queue.push_front(rest);
        }

        let token = AckToken::new();
        let waiter = token.waiter();
        self.in_flight.push(CryptoInFlight {
            offset,
            data: data.clone(),
            token,
        });

        Some((offset, data, waiter))
    }

    /// Requeues everything in flight, e.g. after a Retry forces the
    /// first flight to be resent under fresh keys
    pub fn retransmit_all(&mut self) {
        let mut requeue: Vec<(u64, Bytes)> = self
            .in_flight
            .drain(..)
            .map(|entry| (entry.offset, entry.data))
            .collect();
        requeue.sort_by_key(|(offset, _)| *offset);
        for entry in requeue.into_iter().rev() {
            self.tx_queue.push_front(entry);
        }
    }

    /// Reclaims acknowledged fragments and requeues lost ones
    pub fn sweep(&mut self) {
        use crate::sync::AckOutcome::*;

        let mut requeue: Vec<(u64, Bytes)> = Vec::new();
        self.in_flight.retain(|entry| match entry.token.outcome() {
            Pending => true,
            Acked => false,
            Lost => {
                requeue.push((entry.offset, entry.data.clone()));
                false
            }
        });

        // keep retransmissions in offset order ahead of fresh data
        requeue.sort_by_key(|(offset, _)| *offset);
        for entry in requeue.into_iter().rev() {
            self.tx_queue.push_front(entry);
        }
    }

    /// Buffers received CRYPTO frame data
    pub fn on_data_received(&mut self, offset: VarInt, data: &[u8]) -> Result<(), transport::Error> {
        self.rx.insert(offset.as_u64(), data).map_err(|_| {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
            //# If an endpoint's buffer is exceeded during the handshake, it
            //# can expand its buffer temporarily to complete the handshake.
            //# If an endpoint does not expand its buffer, it MUST close the
            //# connection with a CRYPTO_BUFFER_EXCEEDED error code.
            transport::Error::CRYPTO_BUFFER_EXCEEDED
        })
    }

    /// Pops the next in-order chunk for delivery to the TLS engine
    pub fn take_rx(&mut self) -> Option<Bytes> {
        self.rx.pop()
    }
}

/// One packet number space
pub struct Space {
    pub space: PacketNumberSpace,
    next_pn: u64,
    pub ack: AckManager,
    pub recovery: recovery::Manager,
    pub crypto: CryptoStream,
    /// Seals outbound packets: Initial (derived) or Handshake (installed
    /// by TLS)
    pub tx_key: Option<PacketProtectionKeys>,
    /// Opens inbound packets
    pub rx_key: Option<PacketProtectionKeys>,
}

impl Space {
    pub fn new(space: PacketNumberSpace, crypto_capacity: usize, ack_delay_exponent: u8) -> Self {
        let immediate_acks = !space.is_application_data();
        Self {
            space,
            next_pn: 0,
            ack: AckManager::new(immediate_acks, ack_delay_exponent),
            recovery: recovery::Manager::new(space),
            crypto: CryptoStream::new(crypto_capacity),
            tx_key: None,
            rx_key: None,
        }
    }

    /// Installs both directions at once, e.g. derived Initial keys
    pub fn install_key_pair(&mut self, keys: KeyPair) {
        self.tx_key = Some(keys.sealer);
        self.rx_key = Some(keys.opener);
    }

    /// Allocates the next packet number; numbers are never reused
    pub fn next_packet_number(&mut self) -> u64 {
        let pn = self.next_pn;
        self.next_pn += 1;
        pn
    }

    #[inline]
    pub fn peek_packet_number(&self) -> u64 {
        self.next_pn
    }

    /// The earliest of this space's ACK and loss deadlines
    pub fn earliest_deadline(&self) -> Option<Timestamp> {
        match (self.ack.ack_deadline(), self.recovery.loss_time()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// The application space adds 0-RTT and 1-RTT key state on top of the
/// shared space machinery
pub struct ApplicationSpace {
    pub space: Space,
    pub zero_rtt_tx: Option<PacketProtectionKeys>,
    pub zero_rtt_rx: Option<PacketProtectionKeys>,
    pub one_rtt_tx: Option<OneRttKey>,
    pub one_rtt_rx: Option<OneRttKey>,
    /// The key-phase bit carried on outbound 1-RTT packets
    pub tx_phase: bool,
    /// The key-phase bit expected on inbound 1-RTT packets
    pub rx_phase: bool,
    /// Lowest packet number opened in the current receive phase
    pub rx_phase_start: Option<u64>,
    /// The peer sent an ack-eliciting packet in the current phase; it
    /// must have before it may initiate another key update
    pub eliciting_in_phase: bool,
    /// First packet number sent in the current transmit phase
    pub tx_phase_start_pn: Option<u64>,
    /// A packet sent in the current transmit phase was acknowledged;
    /// required before the local endpoint may initiate another update
    pub acked_in_tx_phase: bool,
}

impl ApplicationSpace {
    pub fn new(crypto_capacity: usize, ack_delay_exponent: u8) -> Self {
        Self {
            space: Space::new(
                PacketNumberSpace::ApplicationData,
                crypto_capacity,
                ack_delay_exponent,
            ),
            zero_rtt_tx: None,
            zero_rtt_rx: None,
            one_rtt_tx: None,
            one_rtt_rx: None,
            tx_phase: false,
            rx_phase: false,
            rx_phase_start: None,
            eliciting_in_phase: false,
            tx_phase_start_pn: None,
            acked_in_tx_phase: false,
        }
    }

    #[inline]
    pub fn has_one_rtt_keys(&self) -> bool {
        self.one_rtt_tx.is_some() && self.one_rtt_rx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_stream_fragments_and_retransmits() {
        let mut stream = CryptoStream::new(1024);
        stream.push_tx(b"0123456789");

        let (offset, data, waiter) = stream.produce(4).unwrap();
        assert_eq!((offset, &data[..]), (0, &b"0123"[..]));

        let (offset, data, waiter2) = stream.produce(100).unwrap();
        assert_eq!((offset, &data[..]), (4, &b"456789"[..]));

        // the first fragment is lost, the second acknowledged
        waiter.mark_lost();
        waiter2.mark_acked();
        stream.sweep();

        let (offset, data, _token) = stream.produce(100).unwrap();
        assert_eq!((offset, &data[..]), (0, &b"0123"[..]));
        assert!(stream.produce(100).is_none());
    }

    #[test]
    fn crypto_rx_is_ordered() {
        let mut stream = CryptoStream::new(1024);
        stream
            .on_data_received(VarInt::from_u8(5), b"world")
            .unwrap();
        assert!(stream.take_rx().is_none());
        stream.on_data_received(VarInt::ZERO, b"hello").unwrap();
        assert_eq!(stream.take_rx().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(stream.take_rx().unwrap(), Bytes::from_static(b"world"));
    }

    #[test]
    fn crypto_rx_capacity_is_a_connection_error() {
        let mut stream = CryptoStream::new(4);
        let error = stream
            .on_data_received(VarInt::from_u8(10), b"too much data")
            .unwrap_err();
        assert_eq!(error, transport::Error::CRYPTO_BUFFER_EXCEEDED);
    }

    #[test]
    fn packet_numbers_are_monotonic() {
        let mut space = Space::new(PacketNumberSpace::Initial, 1024, 3);
        assert_eq!(space.next_packet_number(), 0);
        assert_eq!(space.next_packet_number(), 1);
        assert_eq!(space.peek_packet_number(), 2);
    }
}
