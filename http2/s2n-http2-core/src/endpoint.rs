// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Enumerates endpoint types

#[cfg(any(feature = "generator", test))]
use bolero_generator::prelude::*;

/// The role an endpoint plays on a connection
///
/// The engine is symmetric; the role only decides which stream-ID parity the
/// endpoint owns and which side initiates the opening handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
pub enum Type {
    /// The endpoint is a client
    Client,
    /// The endpoint is a server
    Server,
}

impl Type {
    /// Returns true if the endpoint is a client
    #[inline]
    pub fn is_client(self) -> bool {
        self == Type::Client
    }

    /// Returns true if the endpoint is a server
    #[inline]
    pub fn is_server(self) -> bool {
        self == Type::Server
    }

    /// Returns the [`Type`] of the peer.
    /// - If called on `Client` this will return `Server`
    /// - If called on `Server` this will return `Client`
    #[inline]
    pub fn peer_type(self) -> Type {
        match self {
            Type::Client => Type::Server,
            Type::Server => Type::Client,
        }
    }
}
