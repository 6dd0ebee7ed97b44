// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network path primitives.
//!
//! Addresses are opaque to the core: the host names each (local, remote)
//! address pair with a [`path::Id`](Id) and the transport tracks
//! validation state and anti-amplification accounting against that ID.

use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14
//# QUIC MUST NOT be used if the network path cannot support a maximum
//# datagram size of at least 1200 bytes.

/// The minimum UDP payload every QUIC path must carry
pub const MINIMUM_MTU: u16 = 1200;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//# Prior to validating the client address, servers MUST NOT send more
//# than three times as many bytes as the number of bytes they have
//# received.

/// The anti-amplification multiplier for unvalidated paths
pub const AMPLIFICATION_MULTIPLIER: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
//# The endpoint MUST use unpredictable data in every PATH_CHALLENGE
//# frame so that it can associate the peer's response with the
//# corresponding PATH_CHALLENGE.

/// Bytes of entropy in a path challenge
pub const CHALLENGE_LEN: usize = 8;

/// An opaque handle the host assigns to a (local, remote) address pair
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    /// The path the connection was created on
    pub const ORIGINAL: Self = Self(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "path::Id({})", self.0)
    }
}

impl From<u64> for Id {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Validation progress for one path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationState {
    /// Never challenged; outbound bytes are amplification-limited
    #[default]
    Unvalidated,
    /// A PATH_CHALLENGE is outstanding
    Challenged,
    /// The peer echoed the challenge data
    Validated,
}

impl ValidationState {
    #[inline]
    pub fn is_validated(self) -> bool {
        self == ValidationState::Validated
    }
}
