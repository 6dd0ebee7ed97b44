// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Encoding, decoding, and validation of QUIC transport parameters

use crate::{
    connection::ConnectionId, endpoint, stateless_reset, transport::Error, varint::VarInt,
};
use fjord_codec::{DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18
//# The extension_data field of the quic_transport_parameters extension
//# defined in [QUIC-TLS] contains the QUIC transport parameters.  They
//# are encoded as a sequence of transport parameters, as shown in
//# Figure 20:
//#
//# Transport Parameters {
//#   Transport Parameter (..) ...,
//# }

mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const PREFERRED_ADDRESS: u64 = 0x0d;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;
    //= https://www.rfc-editor.org/rfc/rfc9221#section-3
    //# max_datagram_frame_size (0x20):  A variable-length integer encoding
    //#    the maximum size of a DATAGRAM frame (including the frame type,
    //#    length, and payload) the endpoint is willing to receive, in bytes.
    pub const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# Values below 1200 are invalid.
const MIN_MAX_UDP_PAYLOAD_SIZE: u64 = 1200;

const DEFAULT_MAX_UDP_PAYLOAD_SIZE: u64 = 65527;

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# Preferred Address {
//#   IPv4 Address (32),
//#   IPv4 Port (16),
//#   IPv6 Address (128),
//#   IPv6 Port (16),
//#   Connection ID Length (8),
//#   Connection ID (..),
//#   Stateless Reset Token (128),
//# }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreferredAddress {
    pub ipv4_address: [u8; 4],
    pub ipv4_port: u16,
    pub ipv6_address: [u8; 16],
    pub ipv6_port: u16,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: stateless_reset::Token,
}

impl EncoderValue for PreferredAddress {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.ipv4_address);
        encoder.encode(&self.ipv4_port);
        encoder.write_slice(&self.ipv6_address);
        encoder.encode(&self.ipv6_port);
        encoder.encode(&(self.connection_id.len() as u8));
        encoder.encode(&self.connection_id);
        encoder.encode(&self.stateless_reset_token);
    }
}

impl PreferredAddress {
    fn decode(buffer: DecoderBuffer<'_>) -> Result<Self, Error> {
        let (ipv4, buffer) = buffer.decode_slice(4)?;
        let mut ipv4_address = [0u8; 4];
        ipv4_address.copy_from_slice(ipv4.as_less_safe_slice());
        let (ipv4_port, buffer) = buffer.decode::<u16>()?;
        let (ipv6, buffer) = buffer.decode_slice(16)?;
        let mut ipv6_address = [0u8; 16];
        ipv6_address.copy_from_slice(ipv6.as_less_safe_slice());
        let (ipv6_port, buffer) = buffer.decode::<u16>()?;
        let (cid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
        let connection_id = ConnectionId::try_from_bytes(cid.as_less_safe_slice())
            .ok_or_else(|| Error::TRANSPORT_PARAMETER_ERROR.with_reason("invalid connection id"))?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# A server that chooses a zero-length connection ID MUST NOT
        //# provide a preferred address.
        if connection_id.is_empty() {
            return Err(Error::TRANSPORT_PARAMETER_ERROR
                .with_reason("preferred address connection id must not be empty"));
        }

        let (stateless_reset_token, buffer) = buffer.decode::<stateless_reset::Token>()?;
        buffer.ensure_empty()?;

        Ok(Self {
            ipv4_address,
            ipv4_port,
            ipv6_address,
            ipv6_port,
            connection_id,
            stateless_reset_token,
        })
    }
}

/// The full transport parameter set of one endpoint.
///
/// Server-only parameters are `None` on the client side; validation
/// enforces this at decode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    /// Idle timeout in milliseconds; zero means no timeout
    pub max_idle_timeout: VarInt,
    pub stateless_reset_token: Option<stateless_reset::Token>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    /// In milliseconds
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    pub preferred_address: Option<PreferredAddress>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    pub max_datagram_frame_size: VarInt,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: VarInt::ZERO,
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::new(DEFAULT_MAX_UDP_PAYLOAD_SIZE).unwrap(),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: crate::connection::limits::DEFAULT_ACK_DELAY_EXPONENT,
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            preferred_address: None,
            active_connection_id_limit: VarInt::from_u8(2),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: VarInt::ZERO,
        }
    }
}

fn encode_param<E: Encoder, T: EncoderValue>(encoder: &mut E, id: u64, value: &T) {
    encoder.encode(&VarInt::new(id).expect("parameter ids are small"));
    encoder.encode_with_len_prefix::<VarInt, _>(value);
}

impl EncoderValue for TransportParameters {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        if let Some(odcid) = &self.original_destination_connection_id {
            encode_param(encoder, id::ORIGINAL_DESTINATION_CONNECTION_ID, odcid);
        }
        if self.max_idle_timeout != 0u64 {
            encode_param(encoder, id::MAX_IDLE_TIMEOUT, &self.max_idle_timeout);
        }
        if let Some(token) = &self.stateless_reset_token {
            encode_param(encoder, id::STATELESS_RESET_TOKEN, token);
        }
        if self.max_udp_payload_size != DEFAULT_MAX_UDP_PAYLOAD_SIZE {
            encode_param(encoder, id::MAX_UDP_PAYLOAD_SIZE, &self.max_udp_payload_size);
        }
        if self.initial_max_data != 0u64 {
            encode_param(encoder, id::INITIAL_MAX_DATA, &self.initial_max_data);
        }
        if self.initial_max_stream_data_bidi_local != 0u64 {
            encode_param(
                encoder,
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
                &self.initial_max_stream_data_bidi_local,
            );
        }
        if self.initial_max_stream_data_bidi_remote != 0u64 {
            encode_param(
                encoder,
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
                &self.initial_max_stream_data_bidi_remote,
            );
        }
        if self.initial_max_stream_data_uni != 0u64 {
            encode_param(
                encoder,
                id::INITIAL_MAX_STREAM_DATA_UNI,
                &self.initial_max_stream_data_uni,
            );
        }
        if self.initial_max_streams_bidi != 0u64 {
            encode_param(
                encoder,
                id::INITIAL_MAX_STREAMS_BIDI,
                &self.initial_max_streams_bidi,
            );
        }
        if self.initial_max_streams_uni != 0u64 {
            encode_param(
                encoder,
                id::INITIAL_MAX_STREAMS_UNI,
                &self.initial_max_streams_uni,
            );
        }
        if self.ack_delay_exponent != crate::connection::limits::DEFAULT_ACK_DELAY_EXPONENT {
            encode_param(
                encoder,
                id::ACK_DELAY_EXPONENT,
                &VarInt::from_u8(self.ack_delay_exponent),
            );
        }
        if self.max_ack_delay != 25u64 {
            encode_param(encoder, id::MAX_ACK_DELAY, &self.max_ack_delay);
        }
        if self.disable_active_migration {
            encode_param(encoder, id::DISABLE_ACTIVE_MIGRATION, &());
        }
        if let Some(preferred_address) = &self.preferred_address {
            encode_param(encoder, id::PREFERRED_ADDRESS, preferred_address);
        }
        if self.active_connection_id_limit != 2u64 {
            encode_param(
                encoder,
                id::ACTIVE_CONNECTION_ID_LIMIT,
                &self.active_connection_id_limit,
            );
        }
        if let Some(scid) = &self.initial_source_connection_id {
            encode_param(encoder, id::INITIAL_SOURCE_CONNECTION_ID, scid);
        }
        if let Some(scid) = &self.retry_source_connection_id {
            encode_param(encoder, id::RETRY_SOURCE_CONNECTION_ID, scid);
        }
        if self.max_datagram_frame_size != 0u64 {
            encode_param(
                encoder,
                id::MAX_DATAGRAM_FRAME_SIZE,
                &self.max_datagram_frame_size,
            );
        }
    }
}

impl TransportParameters {
    /// Decodes and validates the parameter set sent by `sender`
    pub fn decode(buffer: DecoderBuffer<'_>, sender: endpoint::Type) -> Result<Self, Error> {
        let mut params = Self::default();
        let mut seen = 0u64;
        let mut buffer = buffer;

        while !buffer.is_empty() {
            let (param_id, rest) = buffer.decode::<VarInt>()?;
            let (value, rest) = rest.decode_slice_with_len_prefix::<VarInt>()?;
            buffer = rest;
            let value = value.freeze_if_needed();
            let param_id = param_id.as_u64();

            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
            //# An endpoint MUST treat receipt of duplicate transport parameters
            //# as a connection error of type TRANSPORT_PARAMETER_ERROR.
            if param_id < 64 {
                let bit = 1u64 << param_id;
                if seen & bit != 0 {
                    return Err(Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("duplicate transport parameter"));
                }
                seen |= bit;
            }

            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.1
            //# A client MUST NOT include any server-only transport parameter:
            //# original_destination_connection_id, preferred_address,
            //# retry_source_connection_id, or stateless_reset_token.
            let server_only = matches!(
                param_id,
                id::ORIGINAL_DESTINATION_CONNECTION_ID
                    | id::PREFERRED_ADDRESS
                    | id::RETRY_SOURCE_CONNECTION_ID
                    | id::STATELESS_RESET_TOKEN
            );
            if server_only && sender.is_client() {
                return Err(Error::TRANSPORT_PARAMETER_ERROR
                    .with_reason("server-only transport parameter sent by client"));
            }

            match param_id {
                id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(decode_cid(value)?);
                }
                id::MAX_IDLE_TIMEOUT => params.max_idle_timeout = decode_varint(value)?,
                id::STATELESS_RESET_TOKEN => {
                    let (token, rest) = value.decode::<stateless_reset::Token>()?;
                    rest.ensure_empty()?;
                    params.stateless_reset_token = Some(token);
                }
                id::MAX_UDP_PAYLOAD_SIZE => {
                    let value = decode_varint(value)?;
                    if value < MIN_MAX_UDP_PAYLOAD_SIZE {
                        return Err(Error::TRANSPORT_PARAMETER_ERROR
                            .with_reason("max_udp_payload_size below 1200"));
                    }
                    params.max_udp_payload_size = value;
                }
                id::INITIAL_MAX_DATA => params.initial_max_data = decode_varint(value)?,
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = decode_varint(value)?;
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = decode_varint(value)?;
                }
                id::INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = decode_varint(value)?;
                }
                id::INITIAL_MAX_STREAMS_BIDI => {
                    params.initial_max_streams_bidi = decode_stream_count(value)?;
                }
                id::INITIAL_MAX_STREAMS_UNI => {
                    params.initial_max_streams_uni = decode_stream_count(value)?;
                }
                id::ACK_DELAY_EXPONENT => {
                    let value = decode_varint(value)?;
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# Values above 20 are invalid.
                    if value > 20u64 {
                        return Err(Error::TRANSPORT_PARAMETER_ERROR
                            .with_reason("ack_delay_exponent above 20"));
                    }
                    params.ack_delay_exponent = value.as_u64() as u8;
                }
                id::MAX_ACK_DELAY => {
                    let value = decode_varint(value)?;
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# Values of 2^14 or greater are invalid.
                    if value >= 1u64 << 14 {
                        return Err(Error::TRANSPORT_PARAMETER_ERROR
                            .with_reason("max_ack_delay of 2^14 or greater"));
                    }
                    params.max_ack_delay = value;
                }
                id::DISABLE_ACTIVE_MIGRATION => {
                    value.ensure_empty()?;
                    params.disable_active_migration = true;
                }
                id::PREFERRED_ADDRESS => {
                    params.preferred_address = Some(PreferredAddress::decode(value)?);
                }
                id::ACTIVE_CONNECTION_ID_LIMIT => {
                    let value = decode_varint(value)?;
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# The value of the active_connection_id_limit parameter MUST
                    //# be at least 2.
                    if value < 2u64 {
                        return Err(Error::TRANSPORT_PARAMETER_ERROR
                            .with_reason("active_connection_id_limit below 2"));
                    }
                    params.active_connection_id_limit = value;
                }
                id::INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id = Some(decode_cid(value)?);
                }
                id::RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id = Some(decode_cid(value)?);
                }
                id::MAX_DATAGRAM_FRAME_SIZE => {
                    params.max_datagram_frame_size = decode_varint(value)?;
                }
                //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.2
                //# An endpoint MUST ignore transport parameters that it does
                //# not support.
                _ => {}
            }
        }

        Ok(params)
    }

    /// The subset a client may remember and act on when attempting 0-RTT.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.1
    //# A client MUST NOT use remembered values for the following parameters:
    //# ack_delay_exponent, max_ack_delay, initial_source_connection_id,
    //# original_destination_connection_id, preferred_address,
    //# retry_source_connection_id, and stateless_reset_token.
    pub fn zero_rtt_snapshot(&self) -> ZeroRttParameters {
        ZeroRttParameters {
            initial_max_data: self.initial_max_data,
            initial_max_stream_data_bidi_local: self.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: self.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: self.initial_max_stream_data_uni,
            initial_max_streams_bidi: self.initial_max_streams_bidi,
            initial_max_streams_uni: self.initial_max_streams_uni,
            active_connection_id_limit: self.active_connection_id_limit,
            max_datagram_frame_size: self.max_datagram_frame_size,
            disable_active_migration: self.disable_active_migration,
        }
    }
}

fn decode_varint(buffer: DecoderBuffer<'_>) -> Result<VarInt, Error> {
    let (value, buffer) = buffer.decode::<VarInt>()?;
    buffer.ensure_empty()?;
    Ok(value)
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
//# If a max_streams transport parameter or a MAX_STREAMS frame is
//# received with a value greater than 2^60, this would allow a maximum
//# stream ID that cannot be expressed as a variable-length integer; see
//# Section 16.  If either is received, the connection MUST be closed
//# immediately with a connection error of type TRANSPORT_PARAMETER_ERROR
//# if the offending value was received in a transport parameter
fn decode_stream_count(buffer: DecoderBuffer<'_>) -> Result<VarInt, Error> {
    let value = decode_varint(buffer)?;
    if value > 1u64 << 60 {
        return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("stream count above 2^60"));
    }
    Ok(value)
}

fn decode_cid(buffer: DecoderBuffer<'_>) -> Result<ConnectionId, Error> {
    let (cid, buffer) = buffer.decode::<ConnectionId>()?;
    buffer.ensure_empty()?;
    Ok(cid)
}

/// The parameters a client remembers from a previous connection for 0-RTT
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZeroRttParameters {
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub active_connection_id_limit: VarInt,
    pub max_datagram_frame_size: VarInt,
    pub disable_active_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(params: &TransportParameters, sender: endpoint::Type) -> TransportParameters {
        let bytes = params.encode_to_vec();
        TransportParameters::decode(DecoderBuffer::new(&bytes), sender).unwrap()
    }

    #[test]
    fn default_round_trip() {
        let params = TransportParameters::default();
        assert_eq!(round_trip(&params, endpoint::Type::Client), params);
    }

    #[test]
    fn server_round_trip() {
        let params = TransportParameters {
            original_destination_connection_id: Some(ConnectionId::TEST_ID),
            max_idle_timeout: VarInt::from_u16(30_000),
            stateless_reset_token: Some(stateless_reset::Token::from([3; 16])),
            initial_max_data: VarInt::from_u32(1_000_000),
            initial_max_stream_data_bidi_local: VarInt::from_u32(100_000),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(200_000),
            initial_max_stream_data_uni: VarInt::from_u32(300_000),
            initial_max_streams_bidi: VarInt::from_u8(16),
            initial_max_streams_uni: VarInt::from_u8(4),
            ack_delay_exponent: 5,
            max_ack_delay: VarInt::from_u8(50),
            disable_active_migration: true,
            active_connection_id_limit: VarInt::from_u8(4),
            initial_source_connection_id: Some(ConnectionId::TEST_ID),
            retry_source_connection_id: Some(ConnectionId::TEST_ID),
            max_datagram_frame_size: VarInt::from_u16(1200),
            ..Default::default()
        };
        assert_eq!(round_trip(&params, endpoint::Type::Server), params);
    }

    #[test]
    fn preferred_address_round_trip() {
        let params = TransportParameters {
            preferred_address: Some(PreferredAddress {
                ipv4_address: [192, 0, 2, 1],
                ipv4_port: 4433,
                ipv6_address: [0x20; 16],
                ipv6_port: 4434,
                connection_id: ConnectionId::TEST_ID,
                stateless_reset_token: stateless_reset::Token::from([9; 16]),
            }),
            ..Default::default()
        };
        assert_eq!(round_trip(&params, endpoint::Type::Server), params);
    }

    #[test]
    fn client_must_not_send_server_only_parameters() {
        let params = TransportParameters {
            stateless_reset_token: Some(stateless_reset::Token::from([3; 16])),
            ..Default::default()
        };
        let bytes = params.encode_to_vec();
        assert!(TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client).is_err());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut bytes = vec![];
        for _ in 0..2 {
            bytes.push(id::MAX_IDLE_TIMEOUT as u8);
            bytes.push(1);
            bytes.push(30);
        }
        assert!(TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client).is_err());
    }

    #[test]
    fn unknown_parameters_are_skipped() {
        // a grease parameter followed by max_idle_timeout
        let mut bytes = vec![];
        bytes.extend_from_slice(&[0x40, 0x5c, 2, 0xaa, 0xbb]);
        bytes.extend_from_slice(&[id::MAX_IDLE_TIMEOUT as u8, 1, 30]);
        let params =
            TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client).unwrap();
        assert_eq!(params.max_idle_timeout, 30u64);
    }

    #[test]
    fn validation_bounds() {
        for (param_id, value) in [
            (id::ACK_DELAY_EXPONENT, 21u8),
            (id::ACTIVE_CONNECTION_ID_LIMIT, 1),
        ] {
            let bytes = vec![param_id as u8, 1, value];
            assert!(
                TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client)
                    .is_err(),
                "parameter {param_id:#x} with value {value} should be rejected"
            );
        }

        // max_ack_delay of 2^14 ms
        let bytes = vec![id::MAX_ACK_DELAY as u8, 4, 0x80, 0x00, 0x40, 0x00];
        assert!(
            TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client).is_err()
        );

        // max_udp_payload_size below 1200
        let bytes = vec![id::MAX_UDP_PAYLOAD_SIZE as u8, 2, 0x44, 0x00];
        assert!(
            TransportParameters::decode(DecoderBuffer::new(&bytes), endpoint::Type::Client).is_err()
        );
    }

    #[test]
    fn zero_rtt_snapshot_excludes_forbidden_parameters() {
        let params = TransportParameters {
            initial_max_data: VarInt::from_u32(5000),
            ack_delay_exponent: 10,
            ..Default::default()
        };
        let snapshot = params.zero_rtt_snapshot();
        assert_eq!(snapshot.initial_max_data, VarInt::from_u32(5000));
        // no field of the snapshot carries the ack_delay_exponent
    }
}
