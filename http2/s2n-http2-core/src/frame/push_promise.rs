// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Kind, Tag},
    header::Pseudo,
    stream::StreamId,
};
use http::HeaderMap;

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.6
//# The PUSH_PROMISE frame (type=0x05) is used to notify the peer endpoint
//# in advance of streams the sender intends to initiate.  The
//# PUSH_PROMISE frame includes the unsigned 31-bit identifier of the
//# stream the endpoint plans to create along with a field section that
//# provides additional context for the stream.

/// A reservation of a future server-initiated stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushPromise {
    /// The stream the promise is sent on
    pub stream_id: StreamId,
    /// The stream being reserved
    pub promised_id: StreamId,
    /// The synthesized request the promised response will answer
    pub pseudo: Pseudo,
    pub fields: HeaderMap,
}

impl PushPromise {
    pub fn new(
        stream_id: StreamId,
        promised_id: StreamId,
        pseudo: Pseudo,
        fields: HeaderMap,
    ) -> Self {
        Self {
            stream_id,
            promised_id,
            pseudo,
            fields,
        }
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::PushPromise.tag()
    }

    /// Returns the stream the promise was sent on
    ///
    /// Note that the state transition the frame causes happens on
    /// [`promised_id`](Self::promised_id), not on this stream.
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}
