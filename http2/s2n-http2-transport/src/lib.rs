// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The HTTP/2 multiplexing engine
//!
//! This crate owns the per-connection state that multiplexes concurrent
//! streams over one byte-oriented transport: the per-stream state machines,
//! the two-level flow controllers, the stream registry with its dependency
//! tree, and the outbound scheduler.
//!
//! The engine is symmetric between clients and servers and does no I/O of
//! its own. A reader task decodes frames with an external codec and feeds
//! [`Connection::recv_frame`]; a writer task drains
//! [`Connection::poll_transmit`] into the codec; producers write through
//! [`Stream`] handles and suspend on flow-control credit.

pub mod connection;
pub mod flow_control;
pub mod stream;
pub mod sync;

pub use connection::{Accept, Config, Connection, Incoming, RoundTrip};
pub use stream::{Fields, Read, Stream, Write};
