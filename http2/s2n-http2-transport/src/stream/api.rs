// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::Shared,
    stream::{Fault, StreamInner, Transition},
    sync::lock,
};
use bytes::Bytes;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use http::HeaderMap;
use s2n_http2_core::{
    error::{Error, ErrorCode},
    frame::{self, Frame, Kind},
    header::Pseudo,
    http2_error,
    stream::{State, StreamId},
    time::Timestamp,
};
use std::{collections::VecDeque, sync::Arc};

/// The application's handle to one stream
///
/// Handles are cheap to clone; readers and writers may live on different
/// tasks.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
    shared: Arc<Shared>,
}

impl core::fmt::Debug for Stream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn new(inner: Arc<StreamInner>, shared: Arc<Shared>) -> Self {
        Self { inner, shared }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.inner.id()
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// The terminal stream error, if one has occurred
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Completes once the stream has fully closed
    pub fn poll_closed(&self, cx: &mut Context) -> Poll<()> {
        self.inner.poll_closed(cx)
    }

    /// Resolves with the peer's opening field section
    pub fn fields(&self) -> Fields<'_> {
        Fields { stream: self }
    }

    /// Takes the trailer section, available once the stream has ended
    pub fn take_trailers(&self) -> Option<HeaderMap> {
        self.inner.take_trailers()
    }

    /// Resolves with the next chunk of payload, `None` at end-of-stream
    pub fn read(&self) -> Read<'_> {
        Read { stream: self }
    }

    /// Sends payload, suspending until both flow-control levels grant credit
    /// and the outbound queue admits the frames
    pub fn write(&self, data: Bytes, end_stream: bool, now: Timestamp) -> Write<'_> {
        Write {
            stream: self,
            data,
            end_stream,
            now,
            stream_credit: 0,
            conn_credit: 0,
            queued: VecDeque::new(),
            end_sent: false,
        }
    }

    /// Sends a field section (a response, or trailers when `pseudo` is empty)
    pub fn send_headers(
        &self,
        pseudo: Pseudo,
        fields: HeaderMap,
        end_stream: bool,
        now: Timestamp,
    ) -> Result<(), Error> {
        if pseudo.is_empty() && !end_stream {
            return Err(http2_error!(
                INTERNAL_ERROR,
                "trailers must end the stream"
            ));
        }

        match self.inner.transition_send(Kind::Headers, end_stream, now) {
            Ok(Transition::Advanced(advance)) => {
                self.shared.apply_advance(self.id(), advance);
            }
            Ok(Transition::Ignored) => {
                return Err(http2_error!(STREAM_CLOSED, "stream closed"))
            }
            Err(Fault::Stream(error)) | Err(Fault::Connection(error)) => return Err(error),
        }

        let mut headers = frame::Headers::new(self.id(), pseudo, fields);
        headers.end_stream = end_stream;
        self.shared.queue.push_control(headers.into());
        Ok(())
    }

    /// Abruptly terminates the stream
    ///
    /// After this returns, readers and writers observe the given code and no
    /// further events surface on the stream.
    pub fn reset(&self, error_code: ErrorCode, now: Timestamp) -> Result<(), Error> {
        match self.inner.send_reset(error_code, now) {
            Ok(Transition::Advanced(advance)) => {
                self.shared.apply_advance(self.id(), advance);
                // buffered payload is dropped; free the connection window
                let freed = self.inner.discard_recv_buffer();
                self.shared.return_connection_bytes(freed as u32);
                self.shared
                    .queue
                    .push_control(frame::ResetStream::new(self.id(), error_code).into());
                Ok(())
            }
            // the stream was already torn down
            Ok(Transition::Ignored) => Ok(()),
            Err(Fault::Stream(error)) | Err(Fault::Connection(error)) => Err(error),
        }
    }
}

/// Resolves with the peer's opening field section
pub struct Fields<'a> {
    stream: &'a Stream,
}

impl Future for Fields<'_> {
    type Output = Result<(Pseudo, HeaderMap), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        self.stream.inner.poll_fields(cx)
    }
}

/// Resolves with the next chunk of payload
pub struct Read<'a> {
    stream: &'a Stream,
}

impl Future for Read<'_> {
    type Output = Result<Option<Bytes>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        match self.stream.inner.poll_read(cx) {
            Poll::Ready(Ok(Some(chunk))) => {
                let len = chunk.len() as u32;
                // the consumed octets go back as credit on both levels
                if let Some(increment) = lock(&self.stream.inner.recv_flow).return_bytes(len) {
                    self.stream.shared.queue.push_control(
                        frame::WindowUpdate::new(self.stream.id(), increment).into(),
                    );
                }
                self.stream.shared.return_connection_bytes(len);
                Poll::Ready(Ok(Some(chunk)))
            }
            other => other,
        }
    }
}

/// Writes payload once both flow-control levels have granted credit
///
/// Dropping the future mid-flight returns every claimed-but-unspent octet of
/// credit to its controller.
pub struct Write<'a> {
    stream: &'a Stream,
    data: Bytes,
    end_stream: bool,
    now: Timestamp,
    stream_credit: u32,
    conn_credit: u32,
    /// Frames that already own credit and only await queue admission
    queued: VecDeque<Frame>,
    end_sent: bool,
}

impl Write<'_> {
    fn transition(&self, kind: Kind, end_stream: bool) -> Result<(), Error> {
        match self.stream.inner.transition_send(kind, end_stream, self.now) {
            Ok(Transition::Advanced(advance)) => {
                self.stream.shared.apply_advance(self.stream.id(), advance);
                Ok(())
            }
            Ok(Transition::Ignored) => Err(http2_error!(STREAM_CLOSED, "stream closed")),
            Err(Fault::Stream(error)) | Err(Fault::Connection(error)) => Err(error),
        }
    }
}

impl Future for Write<'_> {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = &mut *self;

        loop {
            // flush frames that already hold their credit
            while let Some(frame) = this.queued.pop_front() {
                let mut slot = Some(frame);
                match this.stream.shared.queue.poll_push_data(cx, &mut slot) {
                    Poll::Ready(()) => {}
                    Poll::Pending => {
                        if let Some(frame) = slot {
                            this.queued.push_front(frame);
                        }
                        return Poll::Pending;
                    }
                }
            }

            if this.data.is_empty() {
                if this.end_stream && !this.end_sent {
                    // a bare END_STREAM costs no credit
                    if let Err(error) = this.transition(Kind::Data, true) {
                        return Poll::Ready(Err(error));
                    }
                    this.end_sent = true;
                    this.queued
                        .push_back(frame::Data::new(this.stream.id(), Bytes::new(), true).into());
                    continue;
                }
                return Poll::Ready(Ok(()));
            }

            // losing the stream while parked must not strand the producer
            if this.stream.inner.poll_closed(cx).is_ready() {
                let error = this
                    .stream
                    .inner
                    .error()
                    .unwrap_or_else(|| http2_error!(STREAM_CLOSED, "stream closed"));
                return Poll::Ready(Err(error));
            }

            // refuse early when the send direction is already shut
            if let Err(error) = this.transition(Kind::Data, false) {
                return Poll::Ready(Err(error));
            }

            // claim credit on the stream first, then on the connection; the
            // fixed order keeps producers from deadlocking across the levels
            if this.stream_credit == 0 {
                match this.stream.inner.send_flow.poll_credit(cx) {
                    Poll::Ready(Ok(credit)) => this.stream_credit = credit,
                    Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            if this.conn_credit == 0 {
                match this.stream.shared.conn_send_flow.poll_credit(cx) {
                    Poll::Ready(Ok(credit)) => this.conn_credit = credit,
                    Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                    // stream credit stays claimed; `Drop` hands it back if
                    // the await is abandoned
                    Poll::Pending => return Poll::Pending,
                }
            }

            let grant = (this.data.len() as u64)
                .min(this.stream_credit as u64)
                .min(this.conn_credit as u64) as u32;

            // hand back whatever the grant does not cover
            this.stream
                .inner
                .send_flow
                .return_credit(this.stream_credit - grant);
            this.stream
                .shared
                .conn_send_flow
                .return_credit(this.conn_credit - grant);
            this.stream_credit = grant;
            this.conn_credit = grant;

            // settle the end-of-stream transition before any credit moves
            // into frames, so a failure leaves the accounting exact
            let finishes = this.end_stream && grant as usize == this.data.len();
            if finishes {
                if let Err(error) = this.transition(Kind::Data, true) {
                    return Poll::Ready(Err(error));
                }
                this.end_sent = true;
            }

            // cut the grant into frames the peer is willing to parse
            let max_frame_size = this.stream.shared.max_frame_size() as usize;
            let mut remaining = grant as usize;
            while remaining > 0 {
                let len = remaining.min(max_frame_size);
                let chunk = this.data.split_to(len);
                remaining -= len;

                let ends = finishes && this.data.is_empty();
                this.queued
                    .push_back(frame::Data::new(this.stream.id(), chunk, ends).into());
            }

            // the frames own the credit from here on
            this.stream_credit = 0;
            this.conn_credit = 0;
        }
    }
}

impl Drop for Write<'_> {
    fn drop(&mut self) {
        // frames that never reached the queue still hold credit
        let unspent: usize = self
            .queued
            .iter()
            .map(|frame| match frame {
                Frame::Data(data) => data.len(),
                _ => 0,
            })
            .sum();
        let unspent = unspent as u32;

        self.stream
            .inner
            .send_flow
            .return_credit(self.stream_credit.saturating_add(unspent));
        self.stream
            .shared
            .conn_send_flow
            .return_credit(self.conn_credit.saturating_add(unspent));
    }
}
