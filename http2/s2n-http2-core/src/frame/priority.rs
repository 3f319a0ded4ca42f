// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Kind, Tag},
    stream::StreamId,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.3
//# The PRIORITY frame (type=0x02) is deprecated; see Section 5.3.2.  A
//# PRIORITY frame can be sent in any stream state, including idle or
//# closed streams.

//= https://www.rfc-editor.org/rfc/rfc7540#section-6.3
//# The payload of a PRIORITY frame contains the following fields:
//#
//#    E: A single-bit flag indicating that the stream dependency is
//#       exclusive (see Section 5.3).
//#
//#    Stream Dependency:  A 31-bit stream identifier for the stream that
//#       this stream depends on (see Section 5.3).
//#
//#    Weight:  An unsigned 8-bit integer representing a priority weight for
//#       the stream (see Section 5.3).  Add one to the value to obtain a
//#       weight between 1 and 256.

/// A declared dependency on another stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDependency {
    /// The stream this stream depends on; the root is `StreamId::CONNECTION`
    pub dependency_id: StreamId,
    /// The wire weight; the effective weight is this value plus one
    pub weight: u8,
    /// When set, the dependent stream adopts all of the parent's children
    pub is_exclusive: bool,
}

impl StreamDependency {
    /// The wire weight assigned to streams that never declared one
    pub const DEFAULT_WEIGHT: u8 = 15;

    pub fn new(dependency_id: StreamId, weight: u8, is_exclusive: bool) -> Self {
        Self {
            dependency_id,
            weight,
            is_exclusive,
        }
    }
}

impl Default for StreamDependency {
    fn default() -> Self {
        //= https://www.rfc-editor.org/rfc/rfc7540#section-5.3.5
        //# All streams are initially assigned a non-exclusive dependency on
        //# stream 0x0.  [...] Pushed streams initially depend on their
        //# associated stream.  In both cases, streams are assigned a default
        //# weight of 16.
        Self {
            dependency_id: StreamId::CONNECTION,
            weight: Self::DEFAULT_WEIGHT,
            is_exclusive: false,
        }
    }
}

/// A standalone priority declaration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Priority {
    pub stream_id: StreamId,
    pub dependency: StreamDependency,
}

impl Priority {
    pub fn new(stream_id: StreamId, dependency: StreamDependency) -> Self {
        Self {
            stream_id,
            dependency,
        }
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::Priority.tag()
    }

    /// Returns the stream the frame applies to
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}
