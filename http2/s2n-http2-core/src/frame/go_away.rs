// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::ErrorCode,
    frame::{Kind, Tag},
    stream::StreamId,
};
use bytes::Bytes;

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.8
//# The GOAWAY frame (type=0x07) is used to initiate shutdown of a
//# connection or to signal serious error conditions.  GOAWAY allows an
//# endpoint to gracefully stop accepting new streams while still
//# finishing processing of previously established streams.

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.8
//# The last stream identifier in the GOAWAY frame contains the highest-
//# numbered stream identifier for which the sender of the GOAWAY frame
//# might have taken some action on or might yet take action on.

/// The beginning of the end of a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoAway {
    /// The highest peer-initiated stream the sender may still act on
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    /// Opaque diagnostic data; carried but never interpreted
    pub debug_data: Bytes,
}

impl GoAway {
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode) -> Self {
        Self {
            last_stream_id,
            error_code,
            debug_data: Bytes::new(),
        }
    }

    /// Attaches opaque diagnostic data to the frame
    pub fn with_debug_data(mut self, debug_data: Bytes) -> Self {
        self.debug_data = debug_data;
        self
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::GoAway.tag()
    }

    /// GOAWAY frames apply to the connection as a whole
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        StreamId::CONNECTION
    }
}
