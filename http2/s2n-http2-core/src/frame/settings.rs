// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Kind, Tag},
    settings::Setting,
    stream::StreamId,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5
//# The SETTINGS frame (type=0x04) conveys configuration parameters that
//# affect how endpoints communicate, such as preferences and constraints
//# on peer behavior.  The SETTINGS frame is also used to acknowledge the
//# receipt of those settings.

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5
//# ACK (0x01):
//#    When set, the frame acknowledges receipt and application of the
//#    peer's SETTINGS frame.  When this bit is set, the frame payload MUST
//#    be empty.

/// An ordered sequence of configuration parameters, or its acknowledgment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    ack: bool,
    settings: Vec<Setting>,
}

impl Settings {
    /// Creates a SETTINGS frame carrying the given parameters
    ///
    /// Order is preserved: later duplicates overwrite earlier ones when the
    /// receiver applies the frame.
    pub fn new(settings: Vec<Setting>) -> Self {
        Self {
            ack: false,
            settings,
        }
    }

    /// Creates the acknowledgment for a previously received SETTINGS frame
    pub fn ack() -> Self {
        Self {
            ack: true,
            settings: Vec::new(),
        }
    }

    /// Returns true if the frame acknowledges rather than carries settings
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.ack
    }

    /// Returns the carried parameters in wire order
    #[inline]
    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Returns the wire tag of the frame
    pub const fn tag(&self) -> Tag {
        Kind::Settings.tag()
    }

    /// SETTINGS frames always apply to the connection as a whole
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        StreamId::CONNECTION
    }
}
