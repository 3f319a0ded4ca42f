// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{priority::StreamDependency, Kind, Tag},
    header::Pseudo,
    stream::StreamId,
};
use http::HeaderMap;

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.2
//# The HEADERS frame (type=0x01) is used to open a stream (Section 5.1),
//# and additionally carries a field block fragment.  Despite the name,
//# HEADERS frames can carry header sections or trailer sections.  HEADERS
//# frames can be sent on a stream in the "idle", "reserved (local)",
//# "open", or "half-closed (remote)" state.

/// A complete, decompressed field section for a stream
///
/// The HPACK codec collaborator has already reassembled CONTINUATION
/// fragments and decoded the block; what remains is the pseudo-header tuple
/// and the regular fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Headers {
    pub stream_id: StreamId,
    pub pseudo: Pseudo,
    pub fields: HeaderMap,
    /// An optional priority declaration piggybacked on the frame
    pub dependency: Option<StreamDependency>,
    pub end_stream: bool,
}

impl Headers {
    /// Creates a HEADERS frame for the given stream
    pub fn new(stream_id: StreamId, pseudo: Pseudo, fields: HeaderMap) -> Self {
        Self {
            stream_id,
            pseudo,
            fields,
            dependency: None,
            end_stream: false,
        }
    }

    /// Creates a trailer section, which carries no pseudo-headers and always
    /// ends the stream
    pub fn trailers(stream_id: StreamId, fields: HeaderMap) -> Self {
        Self {
            stream_id,
            pseudo: Pseudo::default(),
            fields,
            dependency: None,
            end_stream: true,
        }
    }

    /// Marks the frame as the last one the sender will produce on the stream
    pub fn with_end_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::Headers.tag()
    }

    /// Returns the stream the frame belongs to
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}
