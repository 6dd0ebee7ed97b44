// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Parsing of protected packet headers.
//!
//! A UDP datagram may coalesce several long-header packets followed by at
//! most one short-header packet; [`ProtectedPacket::parse`] consumes one
//! packet and returns the remainder of the datagram so the caller can loop.

use crate::{connection, packet::number::PacketNumberSpace};
use core::ops::Range;
use fjord_codec::{DecoderBuffer, DecoderError};

pub mod number;

/// The QUIC version implemented by this crate
pub const VERSION: u32 = 0x0000_0001;

pub(crate) const FORM_BIT: u8 = 0x80;
pub(crate) const FIXED_BIT: u8 = 0x40;
pub const SHORT_KEY_PHASE_BIT: u8 = 0x04;
pub const LONG_RESERVED_MASK: u8 = 0x0c;
pub const SHORT_RESERVED_MASK: u8 = 0x18;

const LONG_TYPE_MASK: u8 = 0x30;
const RETRY_TAG_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    VersionNegotiation,
    OneRtt,
}

impl Type {
    /// The packet number space this packet type belongs to, if it carries a
    /// packet number at all
    #[inline]
    pub fn space(self) -> Option<PacketNumberSpace> {
        match self {
            Type::Initial => Some(PacketNumberSpace::Initial),
            Type::Handshake => Some(PacketNumberSpace::Handshake),
            Type::ZeroRtt | Type::OneRtt => Some(PacketNumberSpace::ApplicationData),
            Type::Retry | Type::VersionNegotiation => None,
        }
    }

    #[inline]
    pub fn is_long_header(self) -> bool {
        self != Type::OneRtt
    }
}

/// A parsed but still header-protected packet
#[derive(Debug)]
pub struct ProtectedPacket<'a> {
    ty: Type,
    version: u32,
    bytes: &'a mut [u8],
    header_len: usize,
    dcid: Range<usize>,
    scid: Range<usize>,
    token: Range<usize>,
}

struct Meta {
    ty: Type,
    version: u32,
    header_len: usize,
    packet_len: usize,
    dcid: Range<usize>,
    scid: Range<usize>,
    token: Range<usize>,
}

impl<'a> ProtectedPacket<'a> {
    /// Parses a single packet from the front of `datagram`, returning the
    /// packet and the unconsumed remainder.
    ///
    /// `short_dcid_len` tells the parser how many destination connection ID
    /// bytes a short header carries, since that length is not on the wire.
    pub fn parse(
        datagram: &'a mut [u8],
        short_dcid_len: usize,
    ) -> Result<(Self, &'a mut [u8]), DecoderError> {
        let meta = parse_meta(DecoderBuffer::new(datagram), short_dcid_len)?;
        let (bytes, remaining) = datagram.split_at_mut(meta.packet_len);

        let packet = Self {
            ty: meta.ty,
            version: meta.version,
            bytes,
            header_len: meta.header_len,
            dcid: meta.dcid,
            scid: meta.scid,
            token: meta.token,
        };

        Ok((packet, remaining))
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// The wire version; zero for Version Negotiation, zero for 1-RTT
    /// packets (which elide it)
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn destination_connection_id(&self) -> &[u8] {
        &self.bytes[self.dcid.clone()]
    }

    #[inline]
    pub fn source_connection_id(&self) -> &[u8] {
        &self.bytes[self.scid.clone()]
    }

    /// The address validation token of an Initial packet, or the Retry
    /// token of a Retry packet (excluding the integrity tag)
    #[inline]
    pub fn token(&self) -> &[u8] {
        &self.bytes[self.token.clone()]
    }

    /// The integrity tag trailing a Retry packet
    pub fn retry_tag(&self) -> Option<&[u8]> {
        if self.ty == Type::Retry {
            Some(&self.bytes[self.bytes.len() - RETRY_TAG_LEN..])
        } else {
            None
        }
    }

    /// The supported versions listed in a Version Negotiation packet
    pub fn supported_versions(&self) -> impl Iterator<Item = u32> + '_ {
        let payload = if self.ty == Type::VersionNegotiation {
            &self.bytes[self.header_len..]
        } else {
            &[][..]
        };
        payload.chunks_exact(4).map(|chunk| {
            u32::from_be_bytes(chunk.try_into().expect("chunks are 4 bytes"))
        })
    }

    /// Offset of the (protected) packet number field
    #[inline]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Consumes the packet into its raw bytes and the packet number offset,
    /// for header unprotection and decryption in place
    #[inline]
    pub fn into_parts(self) -> (&'a mut [u8], usize) {
        (self.bytes, self.header_len)
    }
}

fn parse_meta(buffer: DecoderBuffer<'_>, short_dcid_len: usize) -> Result<Meta, DecoderError> {
    let total_len = buffer.len();
    let first = buffer.peek_byte(0)?;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
    //# Header Form:  The most significant bit (0x80) of byte 0 is set to 0
    //#    for the short header.
    if first & FORM_BIT == 0 {
        if first & FIXED_BIT == 0 {
            return Err(DecoderError::InvariantViolation("fixed bit is zero"));
        }
        let header_len = 1 + short_dcid_len;
        buffer.ensure_len(header_len + 1)?;

        return Ok(Meta {
            ty: Type::OneRtt,
            version: 0,
            header_len,
            packet_len: total_len,
            dcid: 1..header_len,
            scid: 0..0,
            token: 0..0,
        });
    }

    let buffer = buffer.skip(1)?;
    let (version, buffer) = buffer.decode::<u32>()?;

    let dcid_start = total_len - buffer.len() + 1;
    let (dcid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let dcid_range = dcid_start..dcid_start + dcid.len();

    let scid_start = total_len - buffer.len() + 1;
    let (scid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let scid_range = scid_start..scid_start + scid.len();

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Endpoints that receive a version 1 long header with a value larger
    //# than 20 MUST drop the packet.
    if dcid.len() > connection::id::MAX_LEN || scid.len() > connection::id::MAX_LEN {
        return Err(DecoderError::InvariantViolation("connection id too long"));
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
    //# A Version Negotiation packet is inherently not version specific.
    //# Upon receipt by a client, it will be identified as a Version
    //# Negotiation packet based on the Version field having a value of 0.
    if version == 0 {
        return Ok(Meta {
            ty: Type::VersionNegotiation,
            version,
            header_len: total_len - buffer.len(),
            packet_len: total_len,
            dcid: dcid_range,
            scid: scid_range,
            token: 0..0,
        });
    }

    if first & FIXED_BIT == 0 {
        return Err(DecoderError::InvariantViolation("fixed bit is zero"));
    }

    let ty = match (first & LONG_TYPE_MASK) >> 4 {
        0b00 => Type::Initial,
        0b01 => Type::ZeroRtt,
        0b10 => Type::Handshake,
        _ => Type::Retry,
    };

    match ty {
        Type::Retry => {
            //= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
            //# The Retry Integrity Tag is a 128-bit field computed over the
            //# Retry packet.
            buffer.ensure_len(RETRY_TAG_LEN)?;
            let token_start = total_len - buffer.len();
            Ok(Meta {
                ty,
                version,
                header_len: token_start,
                packet_len: total_len,
                dcid: dcid_range,
                scid: scid_range,
                token: token_start..total_len - RETRY_TAG_LEN,
            })
        }
        _ => {
            let (token_range, buffer) = if ty == Type::Initial {
                let (token, buffer) = buffer.decode_slice_with_len_prefix::<crate::varint::VarInt>()?;
                let token_end = total_len - buffer.len();
                (token_end - token.len()..token_end, buffer)
            } else {
                (0..0, buffer)
            };

            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
            //# Length:  The length of the remainder of the packet (that is, the
            //#    Packet Number and Payload fields) in bytes, encoded as a
            //#    variable-length integer (Section 16).
            let (payload_len, buffer) = buffer.decode::<crate::varint::VarInt>()?;
            let payload_len: usize = payload_len
                .try_into()
                .map_err(|_| DecoderError::LengthCapacityExceeded)?;

            let header_len = total_len - buffer.len();
            buffer.ensure_len(payload_len)?;
            if payload_len == 0 {
                return Err(DecoderError::InvariantViolation("empty packet payload"));
            }

            Ok(Meta {
                ty,
                version,
                header_len,
                packet_len: header_len + payload_len,
                dcid: dcid_range,
                scid: scid_range,
                token: token_range,
            })
        }
    }
}
