// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Unreliable DATAGRAM frame queues (RFC 9221).
//!
//! Datagrams are fire-and-forget: a frame lost in transit is never
//! retransmitted, so no waiter tokens are attached.

use bytes::Bytes;
use fjord_quic_core::{transport, varint::VarInt};
use std::collections::VecDeque;

const QUEUE_LIMIT: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The peer did not advertise max_datagram_frame_size
    Disabled,
    /// The datagram exceeds the peer's advertised frame size
    TooLarge,
    /// The send queue is full; try again after transmitting
    QueueFull,
}

#[derive(Debug, Default)]
pub struct Datagrams {
    send: VecDeque<Bytes>,
    recv: VecDeque<Bytes>,
    /// The peer's max_datagram_frame_size; zero disables sending
    peer_frame_limit: u64,
    /// Our own advertised limit; zero means we drop inbound datagrams
    local_frame_limit: u64,
}

impl Datagrams {
    pub fn new(local_frame_limit: VarInt) -> Self {
        Self {
            local_frame_limit: local_frame_limit.as_u64(),
            ..Self::default()
        }
    }

    pub fn on_peer_limit(&mut self, limit: VarInt) {
        self.peer_frame_limit = limit.as_u64();
    }

    /// Queues an unreliable datagram for transmission
    pub fn send(&mut self, data: Bytes) -> Result<(), SendError> {
        if self.peer_frame_limit == 0 {
            return Err(SendError::Disabled);
        }
        // the limit covers the whole frame: tag, length prefix, payload
        let frame_size = 1 + VarInt::try_from(data.len())
            .map_err(|_| SendError::TooLarge)?
            .encoding_len() as u64
            + data.len() as u64;
        if frame_size > self.peer_frame_limit {
            return Err(SendError::TooLarge);
        }
        if self.send.len() >= QUEUE_LIMIT {
            return Err(SendError::QueueFull);
        }
        self.send.push_back(data);
        Ok(())
    }

    /// Takes the next received datagram
    pub fn recv(&mut self) -> Option<Bytes> {
        self.recv.pop_front()
    }

    /// Handles an inbound DATAGRAM frame
    pub fn on_frame(&mut self, data: &[u8]) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9221#section-3
        //# An endpoint that receives a DATAGRAM frame when it has not
        //# indicated support via the transport parameter MUST terminate the
        //# connection with an error of type PROTOCOL_VIOLATION.
        if self.local_frame_limit == 0 {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("DATAGRAM frame without max_datagram_frame_size"));
        }
        if self.recv.len() < QUEUE_LIMIT {
            self.recv.push_back(Bytes::copy_from_slice(data));
        }
        // a full receive queue silently drops: datagrams are unreliable
        Ok(())
    }

    #[inline]
    pub fn has_transmission_interest(&self) -> bool {
        !self.send.is_empty()
    }

    /// Takes the next datagram that fits in `capacity` encoded bytes
    pub fn produce(&mut self, capacity: usize) -> Option<Bytes> {
        let front_len = self.send.front()?.len();
        let overhead = 1 + VarInt::try_from(front_len).ok()?.encoding_len();
        if front_len + overhead > capacity {
            return None;
        }
        self.send.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_until_advertised() {
        let mut datagrams = Datagrams::new(VarInt::ZERO);
        assert_eq!(
            datagrams.send(Bytes::from_static(b"hi")),
            Err(SendError::Disabled)
        );
        assert!(datagrams.on_frame(b"hi").is_err());
    }

    #[test]
    fn size_limit_counts_frame_overhead() {
        let mut datagrams = Datagrams::new(VarInt::from_u16(1200));
        datagrams.on_peer_limit(VarInt::from_u8(10));
        // 8 bytes payload + tag + length = 10
        assert!(datagrams.send(Bytes::from_static(&[0u8; 8])).is_ok());
        assert_eq!(
            datagrams.send(Bytes::from_static(&[0u8; 9])),
            Err(SendError::TooLarge)
        );
    }

    #[test]
    fn round_trip() {
        let mut datagrams = Datagrams::new(VarInt::from_u16(1200));
        datagrams.on_peer_limit(VarInt::from_u16(1200));
        datagrams.send(Bytes::from_static(b"ping")).unwrap();

        let produced = datagrams.produce(1200).unwrap();
        assert_eq!(produced, Bytes::from_static(b"ping"));
        assert!(datagrams.produce(1200).is_none());

        datagrams.on_frame(b"pong").unwrap();
        assert_eq!(datagrams.recv().unwrap(), Bytes::from_static(b"pong"));
        assert!(datagrams.recv().is_none());
    }
}
