// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{error::Error, frame::Kind, http2_error, state::is};

#[cfg(any(feature = "generator", test))]
use bolero_generator::prelude::*;

macro_rules! state_debug {
    ($($args:tt)*) => {{
        #[cfg(feature = "state-tracing")]
        {
            tracing::debug!($($args)*);
        }
    }};
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
//#                               +--------+
//#                       send PP |        | recv PP
//#                      ,--------+  idle  +--------.
//#                     /         |        |         \
//#                    v          +--------+          v
//#             +----------+          |           +----------+
//#             |          |          | send H /  |          |
//#      ,------+ reserved |          | recv H    | reserved +------.
//#      |      | (local)  |          |           | (remote) |      |
//#      |      +---+------+          v           +------+---+      |
//#      |          |             +--------+             |          |
//#      |          |     recv ES |        | send ES     |          |
//#      |   send H |     ,-------+  open  +-------.     | recv H   |
//#      |          |    /        |        |        \    |          |
//#      |          v   v         +---+----+         v   v          |
//#      |      +----------+          |           +----------+      |
//#      |      |   half-  |          |           |   half-  |      |
//#      |      |  closed  |          | send R /  |  closed  |      |
//#      |      | (remote) |          | recv R    | (local)  |      |
//#      |      +----+-----+          |           +-----+----+      |
//#      |           |                |                 |           |
//#      |           | send ES /     |       recv ES / |           |
//#      |           |  send R /     v        send R / |           |
//#      |           |  recv R   +--------+   recv R   |           |
//#      |           `---------->|        |<-----------'           |
//#      |  send R /             | closed |             \  send R  |
//#      |  recv R               |        |              recv R    |
//#      `---------------------->+--------+<----------------------'

/// The state of a stream
///
/// The representation is a plain `u8` so the owning stream can keep the field
/// in an atomic and advance it with a compare-and-swap loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
#[repr(u8)]
pub enum State {
    #[default]
    Idle = 0,
    ReservedLocal = 1,
    ReservedRemote = 2,
    Open = 3,
    HalfClosedLocal = 4,
    HalfClosedRemote = 5,
    Closed = 6,
}

/// Per-stream facts a transition in the `Closed` state depends on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
pub struct Context {
    /// A RST_STREAM was sent on the stream before it closed
    pub reset_sent: bool,
    /// A RST_STREAM was received on the stream before it closed
    pub reset_received: bool,
    /// The stream closed recently enough that late peer frames are tolerated
    pub within_close_grace: bool,
}

/// The decision the state machine makes for a single frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The frame is allowed and leaves the stream in the contained state
    Next(State),
    /// The frame is discarded without any effect
    Ignore,
    /// The frame is fatal to the stream only (RST_STREAM scope)
    Stream(Error),
    /// The frame is fatal to the connection (GOAWAY scope)
    Connection(Error),
}

impl Outcome {
    is!(is_ignore, Ignore);

    /// Returns the resulting state for an allowed frame
    #[inline]
    pub fn next(self) -> Option<State> {
        match self {
            Outcome::Next(state) => Some(state),
            _ => None,
        }
    }
}

impl State {
    is!(is_idle, Idle);
    is!(is_reserved, ReservedLocal | ReservedRemote);
    is!(is_open, Open);
    is!(is_half_closed_local, HalfClosedLocal);
    is!(is_half_closed_remote, HalfClosedRemote);
    is!(is_closed, Closed);
    is!(
        /// Returns true if the stream counts against the concurrent-stream limit
        is_active,
        Open | HalfClosedLocal | HalfClosedRemote
    );
    is!(
        /// Returns true if the peer can no longer produce data on the stream
        is_recv_closed,
        HalfClosedRemote | Closed
    );
    is!(
        /// Returns true if the local endpoint can no longer produce data on the stream
        is_send_closed,
        HalfClosedLocal | Closed
    );

    /// Returns the atomic representation of the state
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Recovers a state from its atomic representation
    #[inline]
    pub fn from_u8(value: u8) -> Option<State> {
        Some(match value {
            0 => State::Idle,
            1 => State::ReservedLocal,
            2 => State::ReservedRemote,
            3 => State::Open,
            4 => State::HalfClosedLocal,
            5 => State::HalfClosedRemote,
            6 => State::Closed,
            _ => return None,
        })
    }

    /// Decides the effect of a frame arriving from the peer.
    ///
    /// `end_stream` is only honored for the frames that can carry the
    /// END_STREAM flag (DATA and HEADERS).
    pub fn recv(self, kind: Kind, end_stream: bool, cx: &Context) -> Outcome {
        use Kind::*;
        use State::*;

        let next = match (self, kind) {
            //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
            //# idle:
            //#    Receiving any frame other than HEADERS or PRIORITY on a stream
            //#    in this state MUST be treated as a connection error
            //#    (Section 5.4.1) of type PROTOCOL_ERROR.
            (Idle, Headers) => Open,
            (Idle, PushPromise) => ReservedRemote,
            (Idle, Priority) => Idle,
            (Idle, _) => {
                return Outcome::Connection(http2_error!(
                    PROTOCOL_ERROR,
                    "frame received on idle stream"
                ))
            }

            //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
            //# reserved (local):
            //#    An endpoint may receive PRIORITY or WINDOW_UPDATE frames in
            //#    this state.
            (ReservedLocal, Priority | WindowUpdate) => ReservedLocal,
            (ReservedLocal, ResetStream) => Closed,
            (ReservedLocal, _) => {
                return Outcome::Connection(http2_error!(
                    PROTOCOL_ERROR,
                    "frame received on reserved stream"
                ))
            }

            //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
            //# reserved (remote):
            //#    Receiving any other type of frame than HEADERS, RST_STREAM, or
            //#    PRIORITY MUST be treated as a connection error (Section 5.4.1)
            //#    of type PROTOCOL_ERROR.
            (ReservedRemote, Headers) => HalfClosedLocal,
            (ReservedRemote, Priority) => ReservedRemote,
            (ReservedRemote, ResetStream) => Closed,
            (ReservedRemote, _) => {
                return Outcome::Connection(http2_error!(
                    PROTOCOL_ERROR,
                    "frame received on reserved stream"
                ))
            }

            // Either endpoint can send any frame while the stream is open; a
            // reset wins over everything else.
            (Open | HalfClosedLocal, ResetStream) => Closed,
            (state @ (Open | HalfClosedLocal), _) => state,

            //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
            //# half-closed (remote):
            //#    If an endpoint receives additional frames, other than
            //#    WINDOW_UPDATE, PRIORITY, or RST_STREAM, for a stream that is in
            //#    this state, it MUST respond with a stream error (Section 5.4.2)
            //#    of type STREAM_CLOSED.
            (HalfClosedRemote, ResetStream) => Closed,
            (HalfClosedRemote, Priority | WindowUpdate) => HalfClosedRemote,
            (HalfClosedRemote, _) => {
                return Outcome::Connection(http2_error!(
                    STREAM_CLOSED,
                    "frame received on half-closed stream"
                ))
            }

            // Late frames are tolerated for a short while after closing; the
            // tolerance differs by frame type and by who reset the stream.
            (Closed, Priority) => Closed,
            (Closed, WindowUpdate | ResetStream) => {
                return if cx.within_close_grace {
                    Outcome::Ignore
                } else {
                    Outcome::Connection(http2_error!(
                        PROTOCOL_ERROR,
                        "frame received on closed stream"
                    ))
                }
            }
            (Closed, _) => {
                return if cx.reset_received {
                    Outcome::Stream(http2_error!(STREAM_CLOSED))
                } else if cx.reset_sent {
                    if cx.within_close_grace {
                        Outcome::Ignore
                    } else {
                        Outcome::Stream(http2_error!(STREAM_CLOSED))
                    }
                } else {
                    Outcome::Connection(http2_error!(
                        PROTOCOL_ERROR,
                        "frame received on closed stream"
                    ))
                }
            }
        };

        let next = if end_stream && matches!(kind, Data | Headers) {
            next.recv_end_stream()
        } else {
            next
        };

        state_debug!(dir = "recv", prev = ?self, frame = ?kind, end_stream, next = ?next);

        Outcome::Next(next)
    }

    /// Decides the effect of a frame submitted by the local endpoint.
    ///
    /// Errors on this path are returned to the submitting caller; they never
    /// produce RST_STREAM or GOAWAY emissions.
    pub fn send(self, kind: Kind, end_stream: bool) -> Outcome {
        use Kind::*;
        use State::*;

        let next = match (self, kind) {
            (Idle, Headers) => Open,
            (Idle, PushPromise) => ReservedLocal,
            (Idle, Priority) => Idle,
            (Idle, _) => {
                return Outcome::Stream(http2_error!(INTERNAL_ERROR, "frame sent on idle stream"))
            }

            (ReservedLocal, Headers) => HalfClosedRemote,
            (ReservedLocal, Priority) => ReservedLocal,
            (ReservedLocal, ResetStream) => Closed,
            (ReservedLocal, _) => {
                return Outcome::Stream(http2_error!(
                    INTERNAL_ERROR,
                    "frame sent on reserved stream"
                ))
            }

            (ReservedRemote, Priority | WindowUpdate) => ReservedRemote,
            (ReservedRemote, ResetStream) => Closed,
            (ReservedRemote, _) => {
                return Outcome::Stream(http2_error!(
                    INTERNAL_ERROR,
                    "frame sent on reserved stream"
                ))
            }

            (Open | HalfClosedRemote, ResetStream) => Closed,
            (state @ (Open | HalfClosedRemote), _) => state,

            (HalfClosedLocal, ResetStream) => Closed,
            (HalfClosedLocal, Priority | WindowUpdate) => HalfClosedLocal,
            (HalfClosedLocal, _) => {
                return Outcome::Stream(http2_error!(STREAM_CLOSED, "stream is send-closed"))
            }

            // The stream is already being torn down; a second reset is not an
            // error, everything else is a bug in the caller.
            (Closed, ResetStream) => return Outcome::Ignore,
            (Closed, Priority) => Closed,
            (Closed, _) => {
                return Outcome::Stream(http2_error!(STREAM_CLOSED, "stream is closed"))
            }
        };

        let next = if end_stream && matches!(kind, Data | Headers) {
            next.send_end_stream()
        } else {
            next
        };

        state_debug!(dir = "send", prev = ?self, frame = ?kind, end_stream, next = ?next);

        Outcome::Next(next)
    }

    //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
    //# [...] an endpoint that sends a frame with the END_STREAM flag set or a
    //# server that sends a final response causes the stream to become
    //# "half-closed (local)"; an endpoint that receives a frame with the
    //# END_STREAM flag set [...] causes the stream to become "half-closed
    //# (remote)".

    fn recv_end_stream(self) -> State {
        match self {
            State::Open => State::HalfClosedRemote,
            State::HalfClosedLocal => State::Closed,
            state => state,
        }
    }

    fn send_end_stream(self) -> State {
        match self {
            State::Open => State::HalfClosedLocal,
            State::HalfClosedRemote => State::Closed,
            state => state,
        }
    }
}
