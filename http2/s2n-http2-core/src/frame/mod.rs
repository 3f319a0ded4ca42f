// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The HTTP/2 frame taxonomy
//!
//! Frames are modeled as owned payloads behind a single sum type. The wire
//! representation (lengths, padding, CONTINUATION reassembly) belongs to the
//! frame codec collaborator; by the time a [`Frame`] exists, those concerns
//! are resolved.

use crate::stream::StreamId;

#[cfg(any(feature = "generator", test))]
use bolero_generator::prelude::*;

//= https://www.rfc-editor.org/rfc/rfc9113#section-4.1
//# All frames begin with a fixed 9-octet header followed by a variable-
//# length frame payload.
//#
//# HTTP Frame {
//#   Length (24),
//#   Type (8),
//#   Flags (8),
//#   Reserved (1),
//#   Stream Identifier (31),
//#   Frame Payload (..),
//# }

pub(crate) type Tag = u8;

/// The wire type of a frame
///
/// CONTINUATION is absent on purpose: the frame codec collaborator
/// reassembles header blocks before the engine sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
#[repr(u8)]
pub enum Kind {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
}

impl Kind {
    /// Returns the wire tag of the frame type
    #[inline]
    pub const fn tag(self) -> Tag {
        self as Tag
    }

    /// Maps a wire tag back to a frame type
    #[inline]
    pub fn from_tag(tag: Tag) -> Option<Kind> {
        Some(match tag {
            0x0 => Kind::Data,
            0x1 => Kind::Headers,
            0x2 => Kind::Priority,
            0x3 => Kind::ResetStream,
            0x4 => Kind::Settings,
            0x5 => Kind::PushPromise,
            0x6 => Kind::Ping,
            0x7 => Kind::GoAway,
            0x8 => Kind::WindowUpdate,
            _ => return None,
        })
    }
}

macro_rules! frames {
    ($($module:ident => $ty:ident;)*) => {
        $(
            pub mod $module;
            pub use $module::$ty;
        )*

        /// A decoded HTTP/2 frame
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Frame {
            $(
                $ty($module::$ty),
            )*
        }

        impl Frame {
            /// Returns the type of the frame
            #[inline]
            pub fn kind(&self) -> Kind {
                match self {
                    $(
                        Frame::$ty(_) => Kind::$ty,
                    )*
                }
            }

            /// Returns the stream the frame applies to
            ///
            /// Connection-scoped frames return [`StreamId::CONNECTION`].
            #[inline]
            pub fn stream_id(&self) -> StreamId {
                match self {
                    $(
                        Frame::$ty(frame) => frame.stream_id(),
                    )*
                }
            }

            /// Returns true if the frame ends its stream
            #[inline]
            pub fn is_end_stream(&self) -> bool {
                match self {
                    Frame::Data(frame) => frame.end_stream,
                    Frame::Headers(frame) => frame.end_stream,
                    _ => false,
                }
            }
        }

        $(
            impl From<$module::$ty> for Frame {
                #[inline]
                fn from(frame: $module::$ty) -> Self {
                    Frame::$ty(frame)
                }
            }
        )*
    };
}

frames! {
    data => Data;
    headers => Headers;
    priority => Priority;
    reset_stream => ResetStream;
    settings => Settings;
    push_promise => PushPromise;
    ping => Ping;
    go_away => GoAway;
    window_update => WindowUpdate;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in 0x0..=0x8 {
            let kind = Kind::from_tag(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }
        assert_eq!(Kind::from_tag(0x9), None);
    }

    #[test]
    fn frame_accessors() {
        let stream_id = StreamId::new(1).unwrap();
        let frame: Frame = Data::new(stream_id, bytes::Bytes::from_static(b"hi"), true).into();
        assert_eq!(frame.kind(), Kind::Data);
        assert_eq!(frame.stream_id(), stream_id);
        assert!(frame.is_end_stream());

        let frame: Frame = Ping::new([0; 8]).into();
        assert_eq!(frame.kind(), Kind::Ping);
        assert_eq!(frame.stream_id(), StreamId::CONNECTION);
        assert!(!frame.is_end_stream());
    }
}
