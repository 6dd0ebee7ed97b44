// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// The role of an endpoint on a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Client,
    Server,
}

impl Type {
    #[inline]
    pub fn is_client(self) -> bool {
        self == Type::Client
    }

    #[inline]
    pub fn is_server(self) -> bool {
        self == Type::Server
    }

    /// Returns the type of the peer endpoint
    #[inline]
    #[must_use]
    pub fn peer_type(self) -> Self {
        match self {
            Type::Client => Type::Server,
            Type::Server => Type::Client,
        }
    }
}

/// Which side of the connection caused an action, e.g. a close
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Local,
    Remote,
}

impl Location {
    #[inline]
    pub fn is_local(self) -> bool {
        self == Location::Local
    }

    #[inline]
    pub fn is_remote(self) -> bool {
        self == Location::Remote
    }
}
