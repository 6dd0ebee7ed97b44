// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests driving a client and a server connection against
//! each other in memory, with real packet protection.

use core::time::Duration;
use fjord_quic_core::{
    connection::{ConnectionId, Error, Limits},
    crypto::retry::pseudo_packet,
    endpoint,
    packet::{self, ProtectedPacket},
    stream::StreamType,
    varint::VarInt,
};
use fjord_quic_crypto::retry::generate_tag;
use fjord_quic_transport::{
    path,
    testing::{self, Pair},
    Connection,
};

fn limits() -> Limits {
    Limits {
        max_idle_timeout: Duration::from_secs(5),
        ..Limits::default()
    }
}

#[test]
fn handshake_completes_and_confirms() {
    let mut pair = Pair::new(limits());
    pair.drive();

    assert!(pair.client.is_handshake_complete(), "client complete");
    assert!(pair.server.is_handshake_complete(), "server complete");
    // the server confirms on completion; the client on HANDSHAKE_DONE
    assert!(pair.server.is_handshake_confirmed(), "server confirmed");
    assert!(pair.client.is_handshake_confirmed(), "client confirmed");
    assert!(pair.client.error().is_none());
    assert!(pair.server.error().is_none());
}

#[test]
fn bidirectional_stream_transfer() {
    let mut pair = Pair::new(limits());
    pair.drive();

    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    assert_eq!(pair.client.stream_write(id, b"hello server").unwrap(), 12);
    pair.client.stream_finish(id).unwrap();
    pair.drive();

    let (accepted, _reason) = pair.server.accept_stream().expect("stream arrives");
    assert_eq!(accepted, id);

    let mut out = [0u8; 64];
    let (len, finished) = pair.server.stream_read(accepted, &mut out).unwrap();
    assert_eq!(&out[..len], b"hello server");
    assert!(finished);

    // and the response direction
    pair.server.stream_write(accepted, b"hello client").unwrap();
    pair.server.stream_finish(accepted).unwrap();
    pair.drive();

    let (len, finished) = pair.client.stream_read(id, &mut out).unwrap();
    assert_eq!(&out[..len], b"hello client");
    assert!(finished);
}

#[test]
fn lost_stream_data_is_retransmitted() {
    let mut pair = Pair::new(limits());
    pair.drive();

    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    pair.client.stream_write(id, b"abcdef").unwrap();
    pair.client.stream_finish(id).unwrap();

    // lose the first client datagram after the handshake
    let mut first = true;
    pair.drive_with_loss(&mut |from_client, _| {
        if from_client && first {
            first = false;
            true
        } else {
            false
        }
    });

    // nothing arrived; let the probe timeout fire and retransmit
    for _ in 0..10 {
        pair.clock.advance(Duration::from_millis(400));
        pair.drive();
        if pair.server.accept_stream().is_some() {
            let mut out = [0u8; 16];
            let (len, finished) = pair.server.stream_read(id, &mut out).unwrap();
            assert_eq!(&out[..len], b"abcdef");
            assert!(finished);
            return;
        }
    }
    panic!("stream data never arrived after loss");
}

#[test]
fn large_transfer_spans_many_packets() {
    let mut pair = Pair::new(limits());
    pair.drive();

    let payload: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
    let id = pair.client.open_stream(StreamType::Unidirectional).unwrap();

    let mut written = 0;
    while written < payload.len() {
        written += pair.client.stream_write(id, &payload[written..]).unwrap();
        pair.drive();
    }
    pair.client.stream_finish(id).unwrap();
    pair.drive();

    let (accepted, _) = pair.server.accept_stream().expect("stream arrives");
    let mut received = Vec::new();
    let mut out = [0u8; 4096];
    loop {
        // keep the window open while draining
        let (len, finished) = pair.server.stream_read(accepted, &mut out).unwrap();
        received.extend_from_slice(&out[..len]);
        pair.drive();
        if finished {
            break;
        }
        if len == 0 {
            // allow retransmissions and window updates to flow
            pair.clock.advance(Duration::from_millis(50));
            pair.drive();
        }
    }
    assert_eq!(received, payload);
}

#[test]
fn idle_timeout_is_silent() {
    let mut pair = Pair::new(Limits {
        max_idle_timeout: Duration::from_millis(1000),
        ..Limits::default()
    });
    pair.drive();
    assert!(pair.client.is_handshake_confirmed());

    // no traffic for longer than the negotiated timeout
    pair.clock.advance(Duration::from_millis(1500));

    let mut buffer = [0u8; 1500];
    let transmission = pair.client.create_udp_payload(&mut buffer);
    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
    //= type=test
    //# an endpoint that abandons a connection due to the idle timeout is
    //# expected to do so silently
    assert_eq!(transmission.len, 0, "idle close emits nothing");
    assert!(!transmission.keep_alive, "connection is destroyed");
    assert!(matches!(
        pair.client.error(),
        Some(fjord_quic_core::connection::Error::IdleTimeout)
    ));
}

#[test]
fn application_close_reaches_the_peer() {
    let mut pair = Pair::new(limits());
    pair.drive();

    pair.client.request_close(VarInt::from_u8(42));
    pair.drive();

    match pair.server.error() {
        Some(fjord_quic_core::connection::Error::Application { code, initiator }) => {
            assert_eq!(code.as_u64(), 42);
            assert!(initiator.is_remote());
        }
        other => panic!("unexpected close state: {other:?}"),
    }

    // the closed connection refuses new work
    assert!(pair.client.open_stream(StreamType::Bidirectional).is_err());
}

#[test]
fn datagram_round_trip() {
    let mut pair = Pair::new(Limits {
        max_datagram_frame_size: VarInt::from_u16(1200),
        ..limits()
    });
    pair.drive();

    pair.client
        .datagram_send(bytes::Bytes::from_static(b"unreliable ping"))
        .unwrap();
    pair.drive();

    assert_eq!(
        pair.server.datagram_recv().expect("datagram delivered"),
        bytes::Bytes::from_static(b"unreliable ping")
    );
}

#[test]
fn key_update_round_trip() {
    let mut pair = Pair::new(limits());
    pair.drive();

    // acknowledged traffic in the initial phase permits the first update
    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    pair.client.stream_write(id, b"before").unwrap();
    pair.drive();
    pair.clock.advance(Duration::from_millis(30));
    pair.drive();

    assert_eq!(pair.client.key_generation(), 0);
    assert!(!pair.client.key_phase());

    pair.client.request_key_update().unwrap();
    assert_eq!(pair.client.key_generation(), 1);
    assert!(pair.client.key_phase());

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //= type=test
    //# An endpoint MUST NOT initiate a subsequent key update unless it
    //# has received an acknowledgment for a packet that was sent
    //# protected with keys from the current key phase.
    assert!(pair.client.request_key_update().is_err());

    // data sent under the next epoch reaches the peer, which promotes
    pair.client.stream_write(id, b"after").unwrap();
    pair.drive();
    assert_eq!(pair.server.key_generation(), 1);
    assert!(pair.server.key_phase());

    let (accepted, _) = pair.server.accept_stream().expect("stream arrives");
    let mut out = [0u8; 32];
    let (n, _) = pair.server.stream_read(accepted, &mut out).unwrap();
    assert_eq!(&out[..n], b"beforeafter");

    // the server's new-phase response decrypts at the client without a
    // second promotion
    pair.server.stream_write(accepted, b"echo").unwrap();
    pair.drive();
    let (n, _) = pair.client.stream_read(id, &mut out).unwrap();
    assert_eq!(&out[..n], b"echo");
    assert_eq!(pair.client.key_generation(), 1);

    // once a packet of the new phase is acknowledged, the next update is
    // permitted again
    pair.clock.advance(Duration::from_millis(30));
    pair.drive();
    assert!(pair.client.request_key_update().is_ok());
    assert!(pair.client.error().is_none());
    assert!(pair.server.error().is_none());
}

#[test]
fn too_frequent_key_updates_are_rejected() {
    let mut pair = Pair::new(limits());
    pair.drive();

    // eliciting traffic in the initial phase
    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    pair.client.stream_write(id, b"seed").unwrap();
    pair.drive();
    pair.clock.advance(Duration::from_millis(30));
    pair.drive();

    // the server sends data so the client will owe a bare acknowledgment
    let sid = pair.server.open_stream(StreamType::Unidirectional).unwrap();
    pair.server.stream_write(sid, b"payload").unwrap();
    pair.drive();

    // first flip: the client's only packet in the new phase is a pure ACK
    pair.client.force_key_update().unwrap();
    pair.clock.advance(Duration::from_millis(30));
    pair.drive();
    assert_eq!(pair.server.key_generation(), 1);
    assert!(pair.server.error().is_none());

    // a second flip with no ack-eliciting traffic in the phase between
    // violates the once-per-round-trip rule
    pair.client.force_key_update().unwrap();
    pair.client.stream_write(id, b"violation").unwrap();
    pair.drive();

    match pair.server.error() {
        Some(Error::Transport { code, .. }) => {
            assert_eq!(code.as_u64(), 0xe, "KEY_UPDATE_ERROR");
        }
        other => panic!("unexpected close state: {other:?}"),
    }
    // the resulting CONNECTION_CLOSE reached the client
    assert!(pair.client.error().map_or(false, |e| e.is_peer_initiated()));
}

const RETRY_SCID: [u8; 8] = [7; 8];
const RETRY_TOKEN: &[u8] = b"retry-token";

/// Creates a client, answers its first Initial with a host-crafted Retry,
/// and returns the client, the original DCID, and the retried Initial
/// datagram it produced in response.
fn drive_client_through_retry(
    clock: &testing::Clock,
) -> (Connection<testing::ToyTls>, Vec<u8>, Vec<u8>) {
    let mut client =
        Connection::new(testing::config(endpoint::Type::Client, limits(), clock)).unwrap();

    let mut buffer = vec![0u8; 1500];
    let transmission = client.create_udp_payload(&mut buffer);
    assert!(transmission.len >= 1200);

    let (odcid, client_scid) = {
        let (parsed, _) = ProtectedPacket::parse(&mut buffer[..transmission.len], 0).unwrap();
        assert_eq!(parsed.ty(), packet::Type::Initial);
        assert!(parsed.token().is_empty(), "first Initial carries no token");
        (
            parsed.destination_connection_id().to_vec(),
            parsed.source_connection_id().to_vec(),
        )
    };

    // the host of a stateless server answers with a Retry
    let mut retry = vec![0xf0];
    retry.extend_from_slice(&packet::VERSION.to_be_bytes());
    retry.push(client_scid.len() as u8);
    retry.extend_from_slice(&client_scid);
    retry.push(RETRY_SCID.len() as u8);
    retry.extend_from_slice(&RETRY_SCID);
    retry.extend_from_slice(RETRY_TOKEN);
    let tag = generate_tag(&pseudo_packet(&odcid, &retry)).unwrap();
    retry.extend_from_slice(&tag);

    client
        .parse_udp_payload(&mut retry, path::Id::ORIGINAL)
        .unwrap();

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
    //= type=test
    //# The secret used for Initial packets changes when a server sends a
    //# Retry packet to use the connection ID value selected by the server
    let transmission = client.create_udp_payload(&mut buffer);
    assert!(transmission.len >= 1200);
    {
        let (parsed, _) = ProtectedPacket::parse(&mut buffer[..transmission.len], 0).unwrap();
        assert_eq!(parsed.ty(), packet::Type::Initial);
        assert_eq!(parsed.token(), RETRY_TOKEN);
        assert_eq!(parsed.destination_connection_id(), &RETRY_SCID);
    }

    buffer.truncate(transmission.len);
    (client, odcid, buffer)
}

#[test]
fn stateless_retry_rekeys_and_carries_the_token() {
    let clock = testing::Clock::default();
    let (client, odcid, mut retried_initial) = drive_client_through_retry(&clock);

    // a server accepting the token knows the original DCID and Retry SCID
    let mut config = testing::config(endpoint::Type::Server, limits(), &clock);
    config.original_dcid = Some(ConnectionId::try_from_bytes(&odcid).unwrap());
    config.retry_scid = Some(ConnectionId::try_from_bytes(&RETRY_SCID).unwrap());
    let mut server = Connection::new(config).unwrap();
    server
        .parse_udp_payload(&mut retried_initial, path::Id::ORIGINAL)
        .unwrap();

    let mut pair = Pair {
        client,
        server,
        clock,
    };
    pair.drive();

    // the retry_source_connection_id parameter matched the Retry's SCID;
    // a mismatch would have closed the connection during the handshake
    assert!(pair.client.is_handshake_confirmed());
    assert!(pair.server.is_handshake_confirmed());
    assert!(pair.client.error().is_none());
    assert!(pair.server.error().is_none());
}

#[test]
fn missing_retry_source_connection_id_is_rejected() {
    let clock = testing::Clock::default();
    let (client, odcid, mut retried_initial) = drive_client_through_retry(&clock);

    // this server echoes the original DCID but never saw the Retry, so it
    // does not advertise retry_source_connection_id
    let mut config = testing::config(endpoint::Type::Server, limits(), &clock);
    config.original_dcid = Some(ConnectionId::try_from_bytes(&odcid).unwrap());
    let mut server = Connection::new(config).unwrap();
    server
        .parse_udp_payload(&mut retried_initial, path::Id::ORIGINAL)
        .unwrap();

    let mut pair = Pair {
        client,
        server,
        clock,
    };
    pair.drive();

    match pair.client.error() {
        Some(Error::Transport { code, initiator, .. }) => {
            assert_eq!(code.as_u64(), 0x8, "TRANSPORT_PARAMETER_ERROR");
            assert!(initiator.is_local());
        }
        other => panic!("unexpected close state: {other:?}"),
    }
}

#[test]
fn acknowledgments_prune_history() {
    let mut pair = Pair::new(limits());
    pair.drive();

    // several round trips of small writes; nothing should accumulate
    let id = pair.client.open_stream(StreamType::Bidirectional).unwrap();
    for chunk in 0..5u8 {
        pair.client.stream_write(id, &[chunk; 32]).unwrap();
        pair.drive();
        pair.clock.advance(Duration::from_millis(30));
        pair.drive();
    }

    let mut out = [0u8; 256];
    let (accepted, _) = pair.server.accept_stream().expect("stream arrives");
    let (len, _) = pair.server.stream_read(accepted, &mut out).unwrap();
    assert_eq!(len, 160);
}
