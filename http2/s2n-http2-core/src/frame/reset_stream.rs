// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::ErrorCode,
    frame::{Kind, Tag},
    stream::StreamId,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.4
//# The RST_STREAM frame (type=0x03) allows for immediate termination of a
//# stream.  RST_STREAM is sent to request cancellation of a stream or to
//# indicate that an error condition has occurred.

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.4
//# RST_STREAM frames MUST NOT be sent for a stream in the "idle" state.
//# If a RST_STREAM frame identifying an idle stream is received, the
//# recipient MUST treat this as a connection error (Section 5.4.1) of
//# type PROTOCOL_ERROR.

/// An abrupt, unidirectional stream termination
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: StreamId,
    pub error_code: ErrorCode,
}

impl ResetStream {
    pub fn new(stream_id: StreamId, error_code: ErrorCode) -> Self {
        Self {
            stream_id,
            error_code,
        }
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::ResetStream.tag()
    }

    /// Returns the stream being terminated
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}
