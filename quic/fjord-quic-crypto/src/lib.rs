// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RFC 9001 packet protection on top of *ring*.
//!
//! The key schedule starts either from the client's initial destination
//! connection ID ([`initial`]) or from a TLS traffic secret ([`key`]);
//! both paths end in a [`key::PacketKey`] / [`key::HeaderProtectionKey`]
//! pair implementing the traits in `fjord_quic_core::crypto`.

pub mod initial;
pub mod key;
pub mod one_rtt;
pub mod retry;

pub use key::{HeaderProtectionKey, KeyPair, PacketKey, PacketProtectionKeys};
pub use one_rtt::OneRttKey;
