// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
//# CRYPTO_ERROR (0x100-0x1ff):  The cryptographic handshake failed.

/// An error sealing or opening a packet.
///
/// Decryption failures are packet-scoped and non-fatal: the packet is
/// dropped and the connection continues. Key derivation failures become
/// connection errors at the call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub reason: &'static str,
}

impl Error {
    /// The packet could not be authenticated or decrypted
    pub const DECRYPT_ERROR: Self = Self {
        reason: "decryption failed",
    };

    /// Key material could not be derived
    pub const KEY_DERIVATION_FAILURE: Self = Self {
        reason: "key derivation failed",
    };

    /// An internal crypto backend failure
    pub const INTERNAL_ERROR: Self = Self {
        reason: "internal crypto error",
    };

    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "packet protection error: {}", self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
