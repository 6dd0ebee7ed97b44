// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection QUIC runtime.
//!
//! A [`connection::Connection`] turns inbound UDP datagrams and
//! application intents into outbound UDP datagrams and delivered bytes.
//! The host owns the sockets and the event loop: it calls
//! [`parse_udp_payload`](connection::Connection::parse_udp_payload) for
//! every received datagram, drains
//! [`create_udp_payload`](connection::Connection::create_udp_payload)
//! until it reports nothing to send, and polls again no later than
//! [`earliest_deadline`](connection::Connection::earliest_deadline).
//!
//! A single connection is not internally synchronized; the host must
//! serialize all calls into one connection. Distinct connections share
//! nothing.

pub mod ack;
pub mod buffer;
pub mod connection;
pub mod datagram;
pub mod path;
pub mod recovery;
pub mod space;
pub mod stream;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{Config, Connection, Transmission};
