// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core types for the fjord QUIC implementation.
//!
//! This crate contains the data layer of the transport: wire codecs for
//! varints, frames and packet headers, the cryptographic key traits and
//! schedule constants, transport parameters, loss-recovery arithmetic, and
//! the stream/connection identifier types. It performs no I/O and holds no
//! connection state; that lives in `fjord-quic-transport`.

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod ack;
pub mod connection;
pub mod crypto;
pub mod endpoint;
pub mod frame;
pub mod packet;
pub mod path;
pub mod random;
pub mod recovery;
pub mod state;
pub mod stateless_reset;
pub mod stream;
pub mod time;
pub mod transport;
pub mod varint;
