// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Kind, Tag},
    stream::StreamId,
};
use bytes::Bytes;

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.1
//# DATA frames (type=0x00) convey arbitrary, variable-length sequences of
//# octets associated with a stream.  One or more DATA frames are used,
//# for instance, to carry HTTP request or response message contents.

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.1
//# DATA frames are subject to flow control and can only be sent when a
//# stream is in the "open" or "half-closed (remote)" state.  The entire
//# DATA frame payload is included in flow control, including the Pad
//# Length and Padding fields if present.

/// The payload of a stream, subject to flow control on both levels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub end_stream: bool,
}

impl Data {
    /// Creates a DATA frame for the given stream
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        Self {
            stream_id,
            data,
            end_stream,
        }
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::Data.tag()
    }

    /// Returns the stream the frame belongs to
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Returns the number of flow-controlled bytes the frame carries
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
