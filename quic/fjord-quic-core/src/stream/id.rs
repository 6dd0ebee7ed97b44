// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC stream identifier

use crate::{endpoint, stream::StreamType, varint::VarInt};

/// The ID of a stream.
///
/// A 62-bit integer whose two low bits encode the initiator and the
/// directionality; the remaining bits are a per-category sequence number.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct StreamId(VarInt);

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl StreamId {
    /// Streams of one category are spaced apart by the four ID categories
    const STEP: u64 = 4;

    #[inline]
    pub const fn from_varint(id: VarInt) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
    //# The two least significant bits from a stream ID therefore identify a
    //# stream as one of four types, as summarized in Table 1.
    //#
    //# +======+==================================+
    //# | Bits | Stream Type                      |
    //# +======+==================================+
    //# | 0x00 | Client-Initiated, Bidirectional  |
    //# +------+----------------------------------+
    //# | 0x01 | Server-Initiated, Bidirectional  |
    //# +------+----------------------------------+
    //# | 0x02 | Client-Initiated, Unidirectional |
    //# +------+----------------------------------+
    //# | 0x03 | Server-Initiated, Unidirectional |
    //# +------+----------------------------------+

    /// The `nth` stream ID (0-based) of the given initiator and type
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<Self> {
        let mut bits = 0;
        if initiator.is_server() {
            bits |= 0x1;
        }
        if stream_type.is_unidirectional() {
            bits |= 0x2;
        }
        let id = n.checked_mul(Self::STEP)?.checked_add(bits)?;
        VarInt::new(id).ok().map(Self)
    }

    /// The initial (0th) stream ID of the given initiator and type
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> Self {
        Self::nth(initiator, stream_type, 0).expect("initial ids are in range")
    }

    /// The per-category sequence number of this ID
    #[inline]
    pub fn sequence(self) -> u64 {
        self.0.as_u64() / Self::STEP
    }

    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        if self.0.as_u64() & 0x1 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    #[inline]
    pub fn stream_type(self) -> StreamType {
        if self.0.as_u64() & 0x2 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    /// The next stream ID of the same category, if it is representable
    #[inline]
    pub fn next_of_type(self) -> Option<Self> {
        self.0
            .checked_add(VarInt::from_u8(Self::STEP as u8))
            .map(Self)
    }

    /// True if `endpoint` may send data on this stream
    #[inline]
    pub fn is_sendable_by(self, endpoint: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() == endpoint
    }

    /// True if `endpoint` may receive data on this stream
    #[inline]
    pub fn is_receivable_by(self, endpoint: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() != endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Type::{Client, Server};
    use crate::stream::StreamType::{Bidirectional, Unidirectional};

    #[test]
    fn category_bits() {
        assert_eq!(StreamId::initial(Client, Bidirectional).as_varint(), 0u64);
        assert_eq!(StreamId::initial(Server, Bidirectional).as_varint(), 1u64);
        assert_eq!(StreamId::initial(Client, Unidirectional).as_varint(), 2u64);
        assert_eq!(StreamId::initial(Server, Unidirectional).as_varint(), 3u64);

        for initiator in [Client, Server] {
            for stream_type in [Bidirectional, Unidirectional] {
                let id = StreamId::nth(initiator, stream_type, 7).unwrap();
                assert_eq!(id.initiator(), initiator);
                assert_eq!(id.stream_type(), stream_type);
                assert_eq!(id.sequence(), 7);
            }
        }
    }

    #[test]
    fn next_of_type() {
        let id = StreamId::initial(Client, Bidirectional);
        assert_eq!(id.next_of_type().unwrap().as_varint(), 4u64);

        let max = StreamId::from_varint(VarInt::MAX);
        assert!(max.next_of_type().is_none());
    }

    #[test]
    fn directionality() {
        let client_uni = StreamId::initial(Client, Unidirectional);
        assert!(client_uni.is_sendable_by(Client));
        assert!(!client_uni.is_sendable_by(Server));
        assert!(client_uni.is_receivable_by(Server));
        assert!(!client_uni.is_receivable_by(Client));

        let bidi = StreamId::initial(Server, Bidirectional);
        assert!(bidi.is_sendable_by(Client));
        assert!(bidi.is_sendable_by(Server));
    }
}
