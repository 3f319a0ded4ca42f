// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Kind, Tag},
    stream::StreamId,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.7
//# The PING frame (type=0x06) is a mechanism for measuring a minimal
//# round-trip time from the sender, as well as determining whether an
//# idle connection is still functional.

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.7
//# In addition to the frame header, PING frames MUST contain 8 octets of
//# opaque data in the frame payload.  A sender can include any value it
//# chooses and use those octets in any fashion.

/// The opaque payload a PING round-trips byte-exact
pub type Payload = [u8; 8];

/// A liveness / round-trip probe on the connection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ping {
    ack: bool,
    payload: Payload,
}

impl Ping {
    /// Creates a PING the peer is expected to answer
    pub fn new(payload: Payload) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    /// Creates the answer to a received PING, echoing its payload
    pub fn pong(payload: Payload) -> Ping {
        Ping { ack: true, payload }
    }

    //= https://www.rfc-editor.org/rfc/rfc9113#section-6.7
    //# ACK (0x01):
    //#    When set, the frame is a PING response.  An endpoint MUST set this
    //#    flag in PING responses.  An endpoint MUST NOT respond to PING
    //#    frames containing this flag.

    /// Returns true if the frame answers a previously sent PING
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.ack
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::Ping.tag()
    }

    /// PING frames are not associated with any individual stream
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        StreamId::CONNECTION
    }
}
