// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The interface between the transport and an external TLS 1.3 engine.
//!
//! The transport hands decrypted CRYPTO payloads to the engine and drives
//! it with [`Session::progress`]; the engine answers through the
//! [`Context`] callbacks with secrets, outgoing handshake bytes, and
//! completion or alerts. The engine is expected to call back into the
//! transport synchronously, so implementations of [`Context`] must be
//! re-entrant with respect to the calling connection.

use crate::transport;

#[cfg(feature = "alloc")]
use bytes::Bytes;

/// TLS encryption levels, in handshake order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Initial,
    EarlyData,
    Handshake,
    Application,
}

/// The AEAD family negotiated by TLS
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Length of the AEAD key for this suite
    #[inline]
    pub fn key_len(self) -> usize {
        match self {
            CipherSuite::Aes128Gcm => 16,
            CipherSuite::Aes256Gcm | CipherSuite::ChaCha20Poly1305 => 32,
        }
    }
}

/// A TLS session owned by one connection
#[cfg(feature = "alloc")]
pub trait Session: Send {
    /// Installs the local transport parameters for the engine to carry in
    /// its `quic_transport_parameters` extension
    fn set_transport_parameters(&mut self, params: &[u8]) -> Result<(), transport::Error>;

    /// The peer's raw transport parameters, once the engine has them
    fn peer_transport_parameters(&mut self) -> Option<Bytes>;

    /// Hands a decrypted CRYPTO payload at `level` to the engine
    fn provide_data(&mut self, level: Level, data: &[u8]) -> Result<(), transport::Error>;

    /// Lets the engine make progress: emit handshake bytes, install
    /// secrets, and signal completion through `context`
    fn progress<C: Context>(&mut self, context: &mut C) -> Result<(), transport::Error>;
}

/// Callbacks the TLS engine invokes on the transport
pub trait Context {
    /// A read (decryption) secret is available for `level`
    fn on_read_secret(
        &mut self,
        level: Level,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), transport::Error>;

    /// A write (encryption) secret is available for `level`
    fn on_write_secret(
        &mut self,
        level: Level,
        suite: CipherSuite,
        secret: &[u8],
    ) -> Result<(), transport::Error>;

    /// The engine produced handshake bytes to be carried in CRYPTO frames
    /// at `level`
    fn on_handshake_data(&mut self, level: Level, data: &[u8]) -> Result<(), transport::Error>;

    /// The engine raised a TLS alert; `code` is the one-byte alert
    /// description
    fn on_alert(&mut self, code: u8) -> Result<(), transport::Error>;

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.1
    //# The TLS handshake is considered complete when the TLS stack has
    //# reported that the handshake is complete.
    fn on_handshake_complete(&mut self) -> Result<(), transport::Error>;
}
