// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{endpoint, transport, varint::VarInt};
use core::fmt;

/// The reason a connection ended, as surfaced to the host.
///
/// Carries which side initiated the close; everything the host observes
/// after the connection enters closing or draining resolves to one of
/// these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The connection was closed without an error
    Closed { initiator: endpoint::Location },

    /// The connection was closed at the transport layer
    Transport {
        code: VarInt,
        frame_type: Option<VarInt>,
        reason: &'static str,
        initiator: endpoint::Location,
    },

    /// The connection was closed by the application protocol
    Application {
        code: VarInt,
        initiator: endpoint::Location,
    },

    /// A stateless reset was received from the peer
    StatelessReset,

    /// The negotiated idle timeout expired
    IdleTimeout,

    /// The handshake did not complete within the allowed time
    HandshakeTimeout,

    /// The peer replied with a Version Negotiation packet and no common
    /// version exists
    UnsupportedVersion,

    /// A bug or resource exhaustion inside the library.
    /// Never propagated on the wire.
    Internal { reason: &'static str },
}

impl Error {
    /// True if the peer initiated the close
    #[inline]
    pub fn is_peer_initiated(&self) -> bool {
        match self {
            Error::Closed { initiator } => initiator.is_remote(),
            Error::Transport { initiator, .. } => initiator.is_remote(),
            Error::Application { initiator, .. } => initiator.is_remote(),
            Error::StatelessReset => true,
            _ => false,
        }
    }

    /// The CONNECTION_CLOSE this error maps to, if it produces one at all.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
    //# An endpoint that receives any frame after the idle timeout silently
    //# discards connection state rather than generating packets.
    #[inline]
    pub fn close_frame(&self) -> Option<(VarInt, Option<VarInt>, &'static str)> {
        match self {
            Error::Closed { initiator } if initiator.is_local() => {
                Some((transport::Error::NO_ERROR.code, Some(VarInt::ZERO), ""))
            }
            Error::Transport {
                code,
                frame_type,
                reason,
                initiator,
            } if initiator.is_local() => Some((*code, frame_type.or(Some(VarInt::ZERO)), reason)),
            Error::Application { code, initiator } if initiator.is_local() => {
                Some((*code, None, ""))
            }
            Error::Internal { .. } => Some((
                transport::Error::INTERNAL_ERROR.code,
                Some(VarInt::ZERO),
                "",
            )),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(error: transport::Error) -> Self {
        Self::Transport {
            code: error.code,
            frame_type: error.frame_type,
            reason: error.reason,
            initiator: endpoint::Location::Local,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Closed { .. } => write!(f, "the connection was closed without an error"),
            Error::Transport { code, reason, .. } => {
                if reason.is_empty() {
                    write!(f, "transport error {code}")
                } else {
                    write!(f, "transport error {code}: {reason}")
                }
            }
            Error::Application { code, .. } => write!(f, "application error {code}"),
            Error::StatelessReset => write!(f, "a stateless reset was received"),
            Error::IdleTimeout => write!(f, "the idle timeout expired"),
            Error::HandshakeTimeout => write!(f, "the handshake timed out"),
            Error::UnsupportedVersion => write!(f, "no common QUIC version with the peer"),
            Error::Internal { reason } => write!(f, "internal error: {reason}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
