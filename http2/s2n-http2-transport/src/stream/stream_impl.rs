// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    flow_control::{RecvFlowController, SendFlowController},
    sync::{lock, CloseSignal},
};
use bytes::Bytes;
use core::{
    task::{Context, Poll, Waker},
    time::Duration,
};
use http::HeaderMap;
use s2n_http2_core::{
    error::{Error, ErrorCode},
    frame::Kind,
    header::Pseudo,
    http2_error,
    stream::{state, State, StreamId},
    time::Timestamp,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Mutex,
    },
};

/// A dispatch failure scoped to either one stream or the whole connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Fatal to the stream; converted into a RST_STREAM emission
    Stream(Error),
    /// Fatal to the connection; converted into GOAWAY and teardown
    Connection(Error),
}

/// The observable effect of a committed state transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Advance {
    pub previous: State,
    pub next: State,
}

impl Advance {
    /// The stream started counting against the concurrency limit
    pub fn activated(&self) -> bool {
        !self.previous.is_active() && self.next.is_active()
    }

    /// The stream stopped counting against the concurrency limit
    pub fn deactivated(&self) -> bool {
        self.previous.is_active() && !self.next.is_active()
    }
}

/// A tolerated dispatch result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Advanced(Advance),
    /// The frame was dropped without any effect (close-grace tolerance)
    Ignored,
}

/// The engine-facing half of a stream
///
/// The state field is advanced with a compare-and-swap loop so the reader
/// task, producers, and the application handle all observe one linearizable
/// transition sequence. Everything else is either set-once atomics or
/// lock-guarded buffers.
#[derive(Debug)]
pub(crate) struct StreamInner {
    id: StreamId,
    state: AtomicU8,
    reset_sent: AtomicBool,
    reset_received: AtomicBool,
    closed_at: Mutex<Option<Timestamp>>,
    close_signal: CloseSignal,
    error: Mutex<Option<Error>>,
    pub(crate) recv_flow: Mutex<RecvFlowController>,
    pub(crate) send_flow: SendFlowController,
    recv: Mutex<RecvBuffer>,
}

#[derive(Debug, Default)]
struct RecvBuffer {
    fields: Option<(Pseudo, HeaderMap)>,
    trailers: Option<HeaderMap>,
    chunks: VecDeque<Bytes>,
    end_of_stream: bool,
    waker: Option<Waker>,
}

impl StreamInner {
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: AtomicU8::new(State::Idle.as_u8()),
            reset_sent: AtomicBool::new(false),
            reset_received: AtomicBool::new(false),
            closed_at: Mutex::new(None),
            close_signal: CloseSignal::new(),
            error: Mutex::new(None),
            recv_flow: Mutex::new(RecvFlowController::new(recv_window)),
            send_flow: SendFlowController::new(send_window),
            recv: Mutex::new(RecvBuffer::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(State::Closed)
    }

    pub fn error(&self) -> Option<Error> {
        *lock(&self.error)
    }

    fn set_error(&self, error: Error) {
        let mut slot = lock(&self.error);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn closed_at(&self) -> Option<Timestamp> {
        *lock(&self.closed_at)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.close_signal.is_set()
    }

    pub fn poll_closed(&self, cx: &mut Context) -> Poll<()> {
        self.close_signal.poll_set(cx)
    }

    fn grace_context(&self, now: Timestamp, linger: Duration) -> state::Context {
        let within_close_grace = self
            .closed_at()
            .map_or(false, |at| now.saturating_duration_since(at) <= linger);
        state::Context {
            reset_sent: self.reset_sent.load(Ordering::Acquire),
            reset_received: self.reset_received.load(Ordering::Acquire),
            within_close_grace,
        }
    }

    /// Commits `current -> next`, running `pre` before the closure effects
    /// become observable. Returns false if another transition won the race.
    fn commit(
        &self,
        current: State,
        next: State,
        now: Timestamp,
        pre: impl FnOnce(),
    ) -> bool {
        if next == current {
            return true;
        }

        if self
            .state
            .compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        pre();
        if next.is_closed() {
            self.on_closed(now);
        }
        true
    }

    fn on_closed(&self, now: Timestamp) {
        {
            let mut closed_at = lock(&self.closed_at);
            if closed_at.is_none() {
                *closed_at = Some(now);
            }
        }

        let error = self
            .error()
            .unwrap_or_else(|| http2_error!(STREAM_CLOSED, "stream closed"));
        self.send_flow.close(error);
        self.close_signal.set();

        // readers observe end-of-stream or the latched error
        if let Some(waker) = lock(&self.recv).waker.take() {
            waker.wake();
        }
    }

    /// Applies a receive-direction transition for a frame from the peer
    pub fn transition_recv(
        &self,
        kind: Kind,
        end_stream: bool,
        now: Timestamp,
        linger: Duration,
    ) -> Result<Transition, Fault> {
        loop {
            let current = self.state();
            match current.recv(kind, end_stream, &self.grace_context(now, linger)) {
                state::Outcome::Ignore => return Ok(Transition::Ignored),
                state::Outcome::Stream(error) => return Err(Fault::Stream(error)),
                state::Outcome::Connection(error) => return Err(Fault::Connection(error)),
                state::Outcome::Next(next) => {
                    if self.commit(current, next, now, || {}) {
                        return Ok(Transition::Advanced(Advance {
                            previous: current,
                            next,
                        }));
                    }
                }
            }
        }
    }

    /// Applies a send-direction transition for a locally submitted frame
    pub fn transition_send(
        &self,
        kind: Kind,
        end_stream: bool,
        now: Timestamp,
    ) -> Result<Transition, Fault> {
        loop {
            let current = self.state();
            match current.send(kind, end_stream) {
                state::Outcome::Ignore => return Ok(Transition::Ignored),
                state::Outcome::Stream(error) => return Err(Fault::Stream(error)),
                state::Outcome::Connection(error) => return Err(Fault::Connection(error)),
                state::Outcome::Next(next) => {
                    if self.commit(current, next, now, || {}) {
                        return Ok(Transition::Advanced(Advance {
                            previous: current,
                            next,
                        }));
                    }
                }
            }
        }
    }

    /// Records a RST_STREAM from the peer and closes the stream
    pub fn recv_reset(
        &self,
        error_code: ErrorCode,
        now: Timestamp,
        linger: Duration,
    ) -> Result<Transition, Fault> {
        loop {
            let current = self.state();
            match current.recv(Kind::ResetStream, false, &self.grace_context(now, linger)) {
                state::Outcome::Ignore => return Ok(Transition::Ignored),
                state::Outcome::Stream(error) => return Err(Fault::Stream(error)),
                state::Outcome::Connection(error) => return Err(Fault::Connection(error)),
                state::Outcome::Next(next) => {
                    let committed = self.commit(current, next, now, || {
                        self.set_error(Error::new(error_code, "stream reset by peer"));
                        self.reset_received.store(true, Ordering::Release);
                    });
                    if committed {
                        return Ok(Transition::Advanced(Advance {
                            previous: current,
                            next,
                        }));
                    }
                }
            }
        }
    }

    /// Applies a locally requested RST_STREAM
    pub fn send_reset(&self, error_code: ErrorCode, now: Timestamp) -> Result<Transition, Fault> {
        loop {
            let current = self.state();
            match current.send(Kind::ResetStream, false) {
                state::Outcome::Ignore => return Ok(Transition::Ignored),
                state::Outcome::Stream(error) => return Err(Fault::Stream(error)),
                state::Outcome::Connection(error) => return Err(Fault::Connection(error)),
                state::Outcome::Next(next) => {
                    let committed = self.commit(current, next, now, || {
                        self.set_error(Error::new(error_code, "stream reset locally"));
                        self.reset_sent.store(true, Ordering::Release);
                    });
                    if committed {
                        return Ok(Transition::Advanced(Advance {
                            previous: current,
                            next,
                        }));
                    }
                }
            }
        }
    }

    /// Closes the stream without emitting anything on the wire
    ///
    /// Used for teardown paths where the peer will not process a RST_STREAM
    /// anyway (connection failure, GOAWAY refusals).
    pub fn shutdown(&self, error: Error, now: Timestamp) -> Option<Advance> {
        loop {
            let current = self.state();
            if current.is_closed() {
                return None;
            }
            let committed = self.commit(current, State::Closed, now, || {
                self.set_error(error);
            });
            if committed {
                return Some(Advance {
                    previous: current,
                    next: State::Closed,
                });
            }
        }
    }

    /// Queues received payload for the application
    pub fn deliver_data(&self, data: Bytes, end_stream: bool) {
        let mut recv = lock(&self.recv);
        if !data.is_empty() {
            recv.chunks.push_back(data);
        }
        if end_stream {
            recv.end_of_stream = true;
        }
        if let Some(waker) = recv.waker.take() {
            waker.wake();
        }
    }

    /// Queues a received field section (initial headers or trailers)
    pub fn deliver_fields(&self, pseudo: Pseudo, fields: HeaderMap, end_stream: bool) {
        let mut recv = lock(&self.recv);
        if recv.fields.is_none() && !pseudo.is_empty() {
            recv.fields = Some((pseudo, fields));
        } else {
            recv.trailers = Some(fields);
        }
        if end_stream {
            recv.end_of_stream = true;
        }
        if let Some(waker) = recv.waker.take() {
            waker.wake();
        }
    }

    /// Drops buffered payload and reports how many connection-level octets
    /// the discard frees up
    pub fn discard_recv_buffer(&self) -> usize {
        let mut recv = lock(&self.recv);
        let total = recv.chunks.iter().map(Bytes::len).sum();
        recv.chunks.clear();
        total
    }

    pub fn poll_read(&self, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        let mut recv = lock(&self.recv);

        if let Some(error) = self.error() {
            return Poll::Ready(Err(error));
        }
        if let Some(chunk) = recv.chunks.pop_front() {
            return Poll::Ready(Ok(Some(chunk)));
        }
        if recv.end_of_stream {
            return Poll::Ready(Ok(None));
        }

        recv.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub fn poll_fields(&self, cx: &mut Context) -> Poll<Result<(Pseudo, HeaderMap), Error>> {
        let mut recv = lock(&self.recv);

        if let Some(fields) = recv.fields.take() {
            return Poll::Ready(Ok(fields));
        }
        if let Some(error) = self.error() {
            return Poll::Ready(Err(error));
        }
        if recv.end_of_stream {
            return Poll::Ready(Err(http2_error!(
                STREAM_CLOSED,
                "stream ended without a field section"
            )));
        }

        recv.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Takes the trailer section, once the stream has ended
    pub fn take_trailers(&self) -> Option<HeaderMap> {
        lock(&self.recv).trailers.take()
    }
}
