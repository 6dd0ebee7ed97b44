// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use fjord_codec::DecoderBuffer;
use fjord_quic_core::frame::Frame;

fn peer_limits() -> PeerStreamLimits {
    PeerStreamLimits {
        max_stream_data_bidi_local: VarInt::from_u16(1000),
        max_stream_data_bidi_remote: VarInt::from_u16(1000),
        max_stream_data_uni: VarInt::from_u16(1000),
        max_streams_bidi: VarInt::from_u8(8),
        max_streams_uni: VarInt::from_u8(8),
        max_data: VarInt::from_u16(10_000),
    }
}

fn client_manager() -> Manager {
    let mut manager = Manager::new(endpoint::Type::Client, &Limits::default());
    manager.on_peer_limits(peer_limits());
    manager
}

fn collect_frames(manager: &mut Manager) -> Vec<String> {
    let mut storage = [0u8; 1500];
    let mut encoder = EncoderBuffer::new(&mut storage);
    let mut waiters = Waiters::new();
    manager.on_transmit(&mut encoder, &mut waiters);
    let len = encoder.len();

    let mut names = vec![];
    let mut buffer = DecoderBuffer::new(&storage[..len]);
    while !buffer.is_empty() {
        let (frame, rest) = buffer.decode::<Frame>().unwrap();
        names.push(format!("{:?}", frame).split(['(', ' ']).next().unwrap().to_string());
        // deliver stream frames so waiters behave realistically
        buffer = rest;
    }
    names
}

#[test]
fn open_write_and_emit() {
    let mut manager = client_manager();
    let id = manager.open(StreamType::Bidirectional).unwrap();
    assert_eq!(id.as_varint(), 0u64);

    manager.write(id, b"hello").unwrap();
    manager.finish(id).unwrap();

    let frames = collect_frames(&mut manager);
    assert_eq!(frames, vec!["Stream"]);
}

#[test]
fn stream_limit_is_enforced_locally() {
    let mut manager = client_manager();
    for _ in 0..8 {
        manager.open(StreamType::Unidirectional).unwrap();
    }
    assert_eq!(
        manager.open(StreamType::Unidirectional),
        Err(StreamError::StreamsExhausted)
    );
    // a STREAMS_BLOCKED frame goes out once
    let frames = collect_frames(&mut manager);
    assert!(frames.contains(&"StreamsBlocked".to_string()));
}

#[test]
fn implicit_open_of_skipped_streams() {
    let mut manager = client_manager();
    // the server opens its bidi stream with sequence 2 directly
    let id = StreamId::nth(endpoint::Type::Server, StreamType::Bidirectional, 2).unwrap();
    let frame = fjord_quic_core::frame::Stream {
        stream_id: id.as_varint(),
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: false,
        data: b"x",
    };
    manager.on_stream_frame(&frame).unwrap();

    let opened: Vec<_> = std::iter::from_fn(|| manager.accept()).collect();
    assert_eq!(opened.len(), 3);
    assert_eq!(opened[0].1, OpenReason::HigherOpen);
    assert_eq!(opened[1].1, OpenReason::HigherOpen);
    assert_eq!(opened[2].1, OpenReason::RecvFrame);
    assert_eq!(opened[2].0, id);

    // reading from the triggering stream works
    let mut out = [0u8; 4];
    let (n, _) = manager.read(id, &mut out).unwrap();
    assert_eq!(&out[..n], b"x");
}

#[test]
fn remote_stream_limit_violation() {
    let mut manager = client_manager();
    // Limits::default advertises 100 streams; sequence 100 is one too many
    let id = StreamId::nth(endpoint::Type::Server, StreamType::Unidirectional, 100).unwrap();
    let frame = fjord_quic_core::frame::Stream {
        stream_id: id.as_varint(),
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: false,
        data: b"",
    };
    let error = manager.on_stream_frame(&frame).unwrap_err();
    assert_eq!(error.code, transport::Error::STREAM_LIMIT_ERROR.code);
}

#[test]
fn frame_on_never_opened_local_stream_is_an_error() {
    let mut manager = client_manager();
    let frame = fjord_quic_core::frame::Stream {
        // client bidi stream 0 was never opened
        stream_id: VarInt::ZERO,
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: false,
        data: b"",
    };
    let error = manager.on_stream_frame(&frame).unwrap_err();
    assert_eq!(error.code, transport::Error::STREAM_STATE_ERROR.code);
}

#[test]
fn stream_frame_on_send_only_stream_is_an_error() {
    let mut manager = client_manager();
    let id = manager.open(StreamType::Unidirectional).unwrap();
    let frame = fjord_quic_core::frame::Stream {
        stream_id: id.as_varint(),
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: false,
        data: b"",
    };
    assert!(manager.on_stream_frame(&frame).is_err());
}

#[test]
fn connection_flow_blocks_across_streams() {
    let mut manager = Manager::new(endpoint::Type::Client, &Limits::default());
    let mut limits = peer_limits();
    limits.max_data = VarInt::from_u8(10);
    manager.on_peer_limits(limits);

    let a = manager.open(StreamType::Unidirectional).unwrap();
    let b = manager.open(StreamType::Unidirectional).unwrap();
    manager.write(a, &[1u8; 8]).unwrap();
    manager.write(b, &[2u8; 8]).unwrap();

    let frames = collect_frames(&mut manager);
    // 10 connection credits cover stream a (8) plus 2 bytes of stream b,
    // then a DATA_BLOCKED is reported
    assert!(frames.contains(&"DataBlocked".to_string()));
    assert_eq!(manager.conn_tx.available(), 0);

    // raising MAX_DATA releases the rest
    manager.on_max_data(&frame::MaxData {
        maximum_data: VarInt::from_u8(100),
    });
    let frames = collect_frames(&mut manager);
    assert!(frames.contains(&"Stream".to_string()));
    assert!(!frames.contains(&"DataBlocked".to_string()));
}

#[test]
fn max_stream_data_updates_are_produced_after_reads() {
    let limits = Limits {
        initial_max_data: VarInt::from_u16(1000),
        initial_max_stream_data_bidi_local: VarInt::from_u16(1000),
        ..Limits::default()
    };
    let mut manager = Manager::new(endpoint::Type::Client, &limits);
    manager.on_peer_limits(peer_limits());
    let id = manager.open(StreamType::Bidirectional).unwrap();

    // peer sends a chunk on our bidi stream
    let data = vec![7u8; 600];
    let frame = fjord_quic_core::frame::Stream {
        stream_id: id.as_varint(),
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: false,
        data: &data,
    };
    manager.on_stream_frame(&frame).unwrap();

    let mut out = vec![0u8; 600];
    manager.read(id, &mut out).unwrap();

    let frames = collect_frames(&mut manager);
    assert!(frames.contains(&"MaxStreamData".to_string()));
    assert!(frames.contains(&"MaxData".to_string()));
}

#[test]
fn stop_sending_round_trip() {
    let mut manager = client_manager();
    let id = manager.open(StreamType::Bidirectional).unwrap();
    manager.stop_sending(id, VarInt::from_u8(3)).unwrap();

    let frames = collect_frames(&mut manager);
    assert!(frames.contains(&"StopSending".to_string()));

    // receiving STOP_SENDING for our send half queues a reset
    let frame = frame::StopSending {
        stream_id: id.as_varint(),
        application_error_code: VarInt::from_u8(5),
    };
    manager.on_stop_sending(&frame).unwrap();
    let frames = collect_frames(&mut manager);
    assert!(frames.contains(&"ResetStream".to_string()));
}

#[test]
fn closed_streams_are_collected_and_credit_returned() {
    let mut manager = Manager::new(endpoint::Type::Server, &Limits::default());
    manager.on_peer_limits(peer_limits());

    // the client opens uni stream 0 and finishes it immediately
    let id = StreamId::nth(endpoint::Type::Client, StreamType::Unidirectional, 0).unwrap();
    let frame = fjord_quic_core::frame::Stream {
        stream_id: id.as_varint(),
        offset: VarInt::ZERO,
        is_last_frame: false,
        is_fin: true,
        data: b"done",
    };
    manager.on_stream_frame(&frame).unwrap();
    manager.accept().unwrap();

    let mut out = [0u8; 8];
    let (n, finished) = manager.read(id, &mut out).unwrap();
    assert_eq!((n, finished), (4, true));

    manager.sweep();
    assert_eq!(manager.read(id, &mut out), Err(StreamError::UnknownStream));
}
