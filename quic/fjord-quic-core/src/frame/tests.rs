// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{ack::Ranges, endpoint, packet};
use fjord_codec::EncoderBuffer;

fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    FrameIter::new(DecoderBuffer::new(bytes))
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn dispatches_multiple_frames_in_wire_order() {
    let mut ranges = Ranges::new(10);
    ranges.insert(7);

    let mut storage = [0u8; 256];
    let mut encoder = EncoderBuffer::new(&mut storage);
    encoder.encode(&Frame::Ping(Ping));
    encoder.encode(&Ack {
        ack_delay: VarInt::from_u8(0),
        ack_ranges: ranges,
        ecn_counts: None,
    });
    encoder.encode(&Crypto {
        offset: VarInt::ZERO,
        data: b"hello",
    });
    encoder.encode(&Padding { length: 3 });
    let len = encoder.len();

    let frames = decode_all(&storage[..len]);
    assert_eq!(frames.len(), 4);
    assert!(matches!(frames[0], Frame::Ping(_)));
    assert!(matches!(frames[1], Frame::Ack(_)));
    assert!(matches!(frames[2], Frame::Crypto(Crypto { data: b"hello", .. })));
    assert!(matches!(frames[3], Frame::Padding(Padding { length: 3 })));
}

#[test]
fn unknown_frame_type_is_rejected() {
    // 0x21 is unassigned
    let bytes = [0x21u8];
    let result: Result<Vec<_>, _> = FrameIter::new(DecoderBuffer::new(&bytes)).collect();
    assert!(result.is_err());
}

#[test]
fn non_minimal_frame_type_is_rejected() {
    // PING (0x01) encoded on two bytes
    let bytes = [0x40u8, 0x01];
    let result: Result<Vec<_>, _> = FrameIter::new(DecoderBuffer::new(&bytes)).collect();
    assert!(result.is_err());
}

#[test]
fn ack_elicitation() {
    assert!(!Frame::Padding(Padding { length: 1 }).is_ack_eliciting());
    assert!(!Frame::ConnectionClose(ConnectionClose {
        error_code: VarInt::ZERO,
        frame_type: Some(VarInt::ZERO),
        reason: b"",
    })
    .is_ack_eliciting());
    assert!(Frame::Ping(Ping).is_ack_eliciting());
    assert!(Frame::Stream(Stream {
        stream_id: VarInt::ZERO,
        offset: VarInt::ZERO,
        is_last_frame: true,
        is_fin: false,
        data: b"",
    })
    .is_ack_eliciting());

    // PADDING counts toward bytes in flight even though it is not eliciting
    assert!(Frame::Padding(Padding { length: 1 }).counts_in_flight());
}

#[test]
fn placement_table() {
    use crate::endpoint::Type::{Client, Server};
    use crate::packet::Type::{Handshake, Initial, OneRtt, ZeroRtt};

    let ping = Frame::Ping(Ping);
    let crypto = Frame::Crypto(Crypto {
        offset: VarInt::ZERO,
        data: b"",
    });
    let stream = Frame::Stream(Stream {
        stream_id: VarInt::ZERO,
        offset: VarInt::ZERO,
        is_last_frame: true,
        is_fin: false,
        data: b"",
    });
    let handshake_done = Frame::HandshakeDone(HandshakeDone);
    let new_token = Frame::NewToken(NewToken { token: b"token" });
    let path_response = Frame::PathResponse(PathResponse { data: [0; 8] });

    for packet_type in [Initial, Handshake, ZeroRtt, OneRtt] {
        assert!(ping.validate_placement(packet_type, Client).is_ok());
    }

    assert!(crypto.validate_placement(Initial, Client).is_ok());
    assert!(crypto.validate_placement(ZeroRtt, Client).is_err());

    assert!(stream.validate_placement(Initial, Client).is_err());
    assert!(stream.validate_placement(Handshake, Client).is_err());
    assert!(stream.validate_placement(ZeroRtt, Client).is_ok());
    assert!(stream.validate_placement(OneRtt, Client).is_ok());

    // server to client only
    assert!(handshake_done.validate_placement(OneRtt, Server).is_ok());
    assert!(handshake_done.validate_placement(OneRtt, Client).is_err());
    assert!(new_token.validate_placement(OneRtt, Server).is_ok());
    assert!(new_token.validate_placement(OneRtt, Client).is_err());

    // forbidden in 0-RTT
    assert!(path_response.validate_placement(ZeroRtt, Client).is_err());
    assert!(path_response.validate_placement(OneRtt, Client).is_ok());
}
