// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection engine
//!
//! One reader task feeds [`Connection::recv_frame`], one writer task drains
//! [`Connection::poll_transmit`], and any number of producers write through
//! [`Stream`] handles. The connection owns the settings snapshots, the stream
//! registry, the connection-level flow controllers and the outbound queue.

mod send_queue;

#[cfg(test)]
mod tests;

use crate::{
    flow_control::{RecvFlowController, SendFlowController},
    stream::{Fault, Stream, StreamInner, StreamManager, Transition},
    sync::{lock, CloseSignal},
};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
    time::Duration,
};
use futures_channel::oneshot;
use http::HeaderMap;
use s2n_http2_core::{
    endpoint,
    error::{Error, ErrorCode},
    frame::{self, ping, Frame, Kind},
    header::Pseudo,
    http2_error,
    settings::Settings,
    stream::{state, State, StreamId},
    time::Timestamp,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

pub(crate) use send_queue::SendQueue;

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.9.2
//# When an HTTP/2 connection is first established, new streams are
//# created with an initial flow-control window size of 65,535 octets.
//# The connection flow-control window is also 65,535 octets.
const DEFAULT_WINDOW: u32 = 65_535;

/// Tunables for one connection
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub endpoint_type: endpoint::Type,
    /// The settings announced to the peer when the connection starts
    pub local_settings: Settings,
    /// How long a closed stream tolerates late WINDOW_UPDATE / RST_STREAM
    /// frames before they become a protocol error
    pub closed_stream_linger: Duration,
    /// How long a graceful close waits for active streams to finish
    pub drain_timeout: Duration,
    /// How long an announced SETTINGS may stay unacknowledged
    pub settings_ack_timeout: Duration,
    /// DATA frames admitted to the outbound queue before producers park
    pub send_queue_capacity: usize,
}

impl Config {
    pub fn new(endpoint_type: endpoint::Type) -> Self {
        Self {
            endpoint_type,
            local_settings: Settings::default(),
            closed_stream_linger: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            settings_ack_timeout: Duration::from_secs(10),
            send_queue_capacity: 32,
        }
    }
}

struct LocalSettings {
    /// The snapshot the peer has acknowledged
    applied: Settings,
    /// Announced but not acknowledged yet
    pending: Option<Settings>,
    sent_at: Option<Timestamp>,
}

#[derive(Default)]
struct AcceptQueue {
    streams: VecDeque<Stream>,
    waker: Option<Waker>,
}

struct PendingPing {
    payload: ping::Payload,
    sent_at: Timestamp,
    reply: oneshot::Sender<Duration>,
}

pub(crate) struct Shared {
    config: Config,
    local: Mutex<LocalSettings>,
    remote: Mutex<Settings>,
    pub(crate) streams: StreamManager,
    pub(crate) queue: SendQueue,
    pub(crate) conn_recv_flow: Mutex<RecvFlowController>,
    pub(crate) conn_send_flow: SendFlowController,
    next_local_id: AtomicU32,
    /// The highest peer-initiated stream id observed
    max_peer_id: AtomicU32,
    goaway_sent: Mutex<Option<StreamId>>,
    goaway_received: Mutex<Option<StreamId>>,
    error: Mutex<Option<Error>>,
    close_signal: CloseSignal,
    drain_deadline: Mutex<Option<Timestamp>>,
    accept: Mutex<AcceptQueue>,
    pings: Mutex<VecDeque<PendingPing>>,
}

impl Shared {
    /// The frame ceiling the peer is willing to receive
    pub(crate) fn max_frame_size(&self) -> u32 {
        *lock(&self.remote).max_frame_size
    }

    /// Re-extends connection-level credit for octets the application consumed
    /// (or that will never be delivered)
    pub(crate) fn return_connection_bytes(&self, len: u32) {
        if len == 0 {
            return;
        }
        if let Some(increment) = lock(&self.conn_recv_flow).return_bytes(len) {
            self.queue
                .push_control(frame::WindowUpdate::new(StreamId::CONNECTION, increment).into());
        }
    }

    pub(crate) fn apply_advance(&self, id: StreamId, advance: crate::stream::Advance) {
        self.streams
            .apply_advance(id, advance, self.config.endpoint_type);
    }

    fn last_peer_id(&self) -> StreamId {
        StreamId::new(self.max_peer_id.load(Ordering::Acquire)).unwrap_or(StreamId::CONNECTION)
    }
}

/// One HTTP/2 connection
///
/// The handle is cheap to clone and is shared by the reader task, the writer
/// task, and the application.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates the engine and queues the opening SETTINGS announcement
    ///
    /// The announced settings bind the peer only once it acknowledges them;
    /// until then the protocol defaults stay in effect.
    pub fn new(config: Config, now: Timestamp) -> Self {
        let announced = config.local_settings.to_vec();

        let shared = Arc::new(Shared {
            local: Mutex::new(LocalSettings {
                applied: Settings::default(),
                pending: Some(config.local_settings),
                sent_at: Some(now),
            }),
            remote: Mutex::new(Settings::default()),
            streams: StreamManager::new(),
            queue: SendQueue::new(config.send_queue_capacity),
            conn_recv_flow: Mutex::new(RecvFlowController::new(DEFAULT_WINDOW)),
            conn_send_flow: SendFlowController::new(DEFAULT_WINDOW),
            next_local_id: AtomicU32::new(StreamId::initial(config.endpoint_type).as_u32()),
            max_peer_id: AtomicU32::new(0),
            goaway_sent: Mutex::new(None),
            goaway_received: Mutex::new(None),
            error: Mutex::new(None),
            close_signal: CloseSignal::new(),
            drain_deadline: Mutex::new(None),
            accept: Mutex::new(AcceptQueue::default()),
            pings: Mutex::new(VecDeque::new()),
            config,
        });

        shared
            .queue
            .push_control(frame::Settings::new(announced).into());

        Self { shared }
    }

    pub fn endpoint_type(&self) -> endpoint::Type {
        self.shared.config.endpoint_type
    }

    /// The highest peer-initiated stream id observed so far
    pub fn last_peer_stream_id(&self) -> StreamId {
        self.shared.last_peer_id()
    }

    /// The settings currently binding the peer (acknowledged local snapshot)
    pub fn local_settings(&self) -> Settings {
        lock(&self.shared.local).applied
    }

    /// The settings the peer announced
    pub fn remote_settings(&self) -> Settings {
        *lock(&self.shared.remote)
    }

    /// The terminal connection error, if one has occurred
    pub fn error(&self) -> Option<Error> {
        *lock(&self.shared.error)
    }

    /// Completes once the connection has fully shut down
    pub fn poll_closed(&self, cx: &mut Context) -> Poll<()> {
        self.shared.close_signal.poll_set(cx)
    }

    /// Hands the writer task the next outbound frame
    ///
    /// Returns `None` once the connection has shut down and the queue is
    /// drained.
    pub fn poll_transmit(&self, cx: &mut Context) -> Poll<Option<Frame>> {
        self.shared.queue.poll_pop(cx)
    }

    /// Dispatches one decoded inbound frame
    ///
    /// Stream-scoped failures are converted into RST_STREAM emissions and the
    /// call still succeeds; a returned error is fatal to the connection (a
    /// GOAWAY has already been queued) and the reader should stop.
    pub fn recv_frame(&self, frame: Frame, now: Timestamp) -> Result<(), Error> {
        if let Some(error) = self.error() {
            return Err(error);
        }

        let kind = frame.kind();
        let stream_id = frame.stream_id();
        tracing::trace!(frame = ?kind, stream = %stream_id, "recv");

        match self.dispatch(frame, now) {
            Ok(()) => Ok(()),
            Err(Fault::Stream(error)) => {
                tracing::debug!(stream = %stream_id, %error, "stream error");
                self.reset_stream(stream_id, error, now);
                Ok(())
            }
            Err(Fault::Connection(error)) => {
                tracing::debug!(%error, "connection error");
                self.connection_error(error, now);
                Err(error)
            }
        }
    }

    fn dispatch(&self, frame: Frame, now: Timestamp) -> Result<(), Fault> {
        match frame {
            Frame::Data(frame) => self.on_data(frame, now),
            Frame::Headers(frame) => self.on_headers(frame, now),
            Frame::Priority(frame) => self.on_priority(frame),
            Frame::ResetStream(frame) => self.on_reset_stream(frame, now),
            Frame::Settings(frame) => self.on_settings(frame, now),
            Frame::PushPromise(frame) => self.on_push_promise(frame, now),
            Frame::Ping(frame) => self.on_ping(frame, now),
            Frame::GoAway(frame) => self.on_go_away(frame, now),
            Frame::WindowUpdate(frame) => self.on_window_update(frame, now),
        }
    }

    fn linger(&self) -> Duration {
        self.shared.config.closed_stream_linger
    }

    /// Classifies a frame for a stream the registry does not know
    ///
    /// An id at or below the relevant high-water mark belongs to a stream
    /// that closed and was recycled; reaping only happens after the grace
    /// lapses, so such frames are judged with the tolerance spent.
    fn forgotten_or_idle(&self, id: StreamId, kind: Kind, end_stream: bool) -> Result<(), Fault> {
        let outcome = if self.is_forgotten(id) {
            let cx = state::Context {
                reset_sent: true,
                reset_received: false,
                within_close_grace: false,
            };
            State::Closed.recv(kind, end_stream, &cx)
        } else if id.initiator() == self.shared.config.endpoint_type {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "peer used a locally owned stream id"
            )));
        } else {
            State::Idle.recv(kind, end_stream, &state::Context::default())
        };

        match outcome {
            state::Outcome::Next(_) | state::Outcome::Ignore => Ok(()),
            state::Outcome::Stream(error) => Err(Fault::Stream(error)),
            state::Outcome::Connection(error) => Err(Fault::Connection(error)),
        }
    }

    fn is_forgotten(&self, id: StreamId) -> bool {
        if id.initiator() == self.shared.config.endpoint_type {
            id.as_u32() < self.shared.next_local_id.load(Ordering::Acquire)
        } else {
            id.as_u32() <= self.shared.max_peer_id.load(Ordering::Acquire)
        }
    }

    fn on_data(&self, frame: frame::Data, now: Timestamp) -> Result<(), Fault> {
        let id = frame.stream_id;
        if id.is_zero() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "DATA on the connection stream"
            )));
        }
        let len = frame.len() as u32;

        // the connection-level charge covers the frame no matter what happens
        // to the stream
        lock(&self.shared.conn_recv_flow)
            .consume(len)
            .map_err(Fault::Connection)?;

        let Some(stream) = self.shared.streams.lookup(id) else {
            let result = self.forgotten_or_idle(id, Kind::Data, frame.end_stream);
            self.shared.return_connection_bytes(len);
            return result;
        };

        match stream.transition_recv(Kind::Data, frame.end_stream, now, self.linger()) {
            Ok(Transition::Advanced(advance)) => {
                self.shared.apply_advance(id, advance);
                if let Err(error) = lock(&stream.recv_flow).consume(len) {
                    self.shared.return_connection_bytes(len);
                    return Err(Fault::Stream(error));
                }
                stream.deliver_data(frame.data, frame.end_stream);
                Ok(())
            }
            Ok(Transition::Ignored) => {
                self.shared.return_connection_bytes(len);
                Ok(())
            }
            Err(fault) => {
                self.shared.return_connection_bytes(len);
                Err(fault)
            }
        }
    }

    fn on_headers(&self, frame: frame::Headers, now: Timestamp) -> Result<(), Fault> {
        let id = frame.stream_id;
        if id.is_zero() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "HEADERS on the connection stream"
            )));
        }

        if let Some(dependency) = frame.dependency {
            self.shared
                .streams
                .reparent(id, dependency)
                .map_err(Fault::Stream)?;
        }

        if let Some(stream) = self.shared.streams.lookup(id) {
            let advance =
                match stream.transition_recv(Kind::Headers, frame.end_stream, now, self.linger())? {
                    Transition::Advanced(advance) => advance,
                    Transition::Ignored => return Ok(()),
                };
            self.shared.apply_advance(id, advance);

            //= https://www.rfc-editor.org/rfc/rfc9113#section-8.1
            //# The HEADERS frame containing the trailer section MUST set the
            //# END_STREAM flag.
            if frame.pseudo.is_empty() && !frame.end_stream {
                return Err(Fault::Stream(http2_error!(
                    PROTOCOL_ERROR,
                    "trailers without END_STREAM"
                )));
            }
            self.validate_pseudo(&frame.pseudo)?;

            stream.deliver_fields(frame.pseudo, frame.fields, frame.end_stream);
            return Ok(());
        }

        // a fresh peer-initiated stream opens here
        if id.initiator() == self.shared.config.endpoint_type.peer_type()
            && id.as_u32() > self.shared.max_peer_id.load(Ordering::Acquire)
        {
            return self.accept_peer_stream(frame, now);
        }

        self.forgotten_or_idle(id, Kind::Headers, frame.end_stream)
    }

    fn accept_peer_stream(&self, frame: frame::Headers, now: Timestamp) -> Result<(), Fault> {
        let id = frame.stream_id;

        // the high-water mark moves even when the stream ends up refused
        self.shared.max_peer_id.store(id.as_u32(), Ordering::Release);

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.8
        //# Once the GOAWAY is sent, the sender will ignore frames sent on
        //# streams initiated by the receiver if the stream has an identifier
        //# higher than the included last stream identifier.
        if let Some(last) = *lock(&self.shared.goaway_sent) {
            if id > last {
                return Err(Fault::Stream(http2_error!(
                    REFUSED_STREAM,
                    "connection is shutting down"
                )));
            }
        }

        if frame.pseudo.is_empty() {
            return Err(Fault::Stream(http2_error!(
                PROTOCOL_ERROR,
                "opening section without pseudo-headers"
            )));
        }
        self.validate_pseudo(&frame.pseudo)?;

        let stream = Arc::new(StreamInner::new(
            id,
            *lock(&self.shared.remote).initial_window_size,
            *lock(&self.shared.local).applied.initial_window_size,
        ));

        match stream.transition_recv(Kind::Headers, frame.end_stream, now, self.linger())? {
            Transition::Advanced(_) => {}
            Transition::Ignored => return Ok(()),
        }

        let limit = *lock(&self.shared.local).applied.max_concurrent_streams;
        self.shared
            .streams
            .insert(stream.clone(), limit, self.shared.config.endpoint_type)
            .map_err(Fault::Stream)?;

        stream.deliver_fields(frame.pseudo, frame.fields, frame.end_stream);

        let handle = Stream::new(stream, self.shared.clone());
        let mut accept = lock(&self.shared.accept);
        accept.streams.push_back(handle);
        if let Some(waker) = accept.waker.take() {
            waker.wake();
        }

        Ok(())
    }

    fn validate_pseudo(&self, pseudo: &Pseudo) -> Result<(), Fault> {
        // trailer sections carry no pseudo-headers at all
        if pseudo.is_empty() {
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.1.1
        //# Malformed requests or responses that are detected MUST be treated
        //# as a stream error (Section 5.4.2) of type PROTOCOL_ERROR.
        let result = if self.shared.config.endpoint_type.is_server() {
            pseudo.validate_request()
        } else {
            pseudo.validate_response()
        };
        result.map_err(Fault::Stream)
    }

    fn on_priority(&self, frame: frame::Priority) -> Result<(), Fault> {
        let id = frame.stream_id;
        if id.is_zero() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "PRIORITY on the connection stream"
            )));
        }
        // the tree records declared priorities for any id, live or not
        self.shared
            .streams
            .reparent(id, frame.dependency)
            .map_err(Fault::Stream)
    }

    fn on_reset_stream(&self, frame: frame::ResetStream, now: Timestamp) -> Result<(), Fault> {
        let id = frame.stream_id;
        if id.is_zero() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "RST_STREAM on the connection stream"
            )));
        }

        let Some(stream) = self.shared.streams.lookup(id) else {
            return self.forgotten_or_idle(id, Kind::ResetStream, false);
        };

        match stream.recv_reset(frame.error_code, now, self.linger())? {
            Transition::Advanced(advance) => {
                self.shared.apply_advance(id, advance);
                // buffered payload will never be read; free the connection
                // window it still occupies
                let freed = stream.discard_recv_buffer();
                self.shared.return_connection_bytes(freed as u32);
                Ok(())
            }
            Transition::Ignored => Ok(()),
        }
    }

    fn on_settings(&self, frame: frame::Settings, now: Timestamp) -> Result<(), Fault> {
        if frame.is_ack() {
            let mut local = lock(&self.shared.local);
            let Some(pending) = local.pending.take() else {
                // a stray ACK; nothing was in flight
                return Ok(());
            };
            local.sent_at = None;
            let previous = *local.applied.initial_window_size;
            local.applied = pending;
            let next = *local.applied.initial_window_size;
            drop(local);

            if previous != next {
                // our receive windows adopt the acknowledged initial size
                let _ = self.shared.streams.for_each(|stream| {
                    lock(&stream.recv_flow).set_initial_window(next);
                    Ok(())
                });
            }
            tracing::debug!("settings acknowledged");
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.3
        //# The values in the SETTINGS frame MUST be processed in the order
        //# they appear [...] Once all values have been processed, the
        //# recipient MUST immediately emit a SETTINGS frame with the ACK flag
        //# set.
        let mut remote = lock(&self.shared.remote);
        let previous = *remote.initial_window_size;
        remote.apply(frame.settings()).map_err(Fault::Connection)?;
        let next = *remote.initial_window_size;
        drop(remote);

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.9.2
        //# When the value of SETTINGS_INITIAL_WINDOW_SIZE changes, a receiver
        //# MUST adjust the size of all stream flow-control windows that it
        //# maintains by the difference between the new value and the old
        //# value.
        let delta = next as i64 - previous as i64;
        if delta != 0 {
            self.shared
                .streams
                .for_each(|stream| stream.send_flow.increment_window(delta))
                .map_err(Fault::Connection)?;
        }

        self.shared.queue.push_control(frame::Settings::ack().into());
        Ok(())
    }

    fn on_push_promise(&self, frame: frame::PushPromise, now: Timestamp) -> Result<(), Fault> {
        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.4
        //# A client cannot push.  Thus, servers MUST treat the receipt of a
        //# PUSH_PROMISE frame as a connection error (Section 5.4.1) of type
        //# PROTOCOL_ERROR.
        if self.shared.config.endpoint_type.is_server() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "client sent PUSH_PROMISE"
            )));
        }

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.6
        //# PUSH_PROMISE MUST NOT be sent if the SETTINGS_ENABLE_PUSH setting
        //# of the peer endpoint is set to 0.
        if !lock(&self.shared.local).applied.enable_push.is_enabled() {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "push is disabled"
            )));
        }

        // the promise rides an existing stream; judge it there
        let Some(carrier) = self.shared.streams.lookup(frame.stream_id) else {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "PUSH_PROMISE on an unknown stream"
            )));
        };
        match carrier.transition_recv(Kind::PushPromise, false, now, self.linger())? {
            Transition::Advanced(_) => {}
            Transition::Ignored => return Ok(()),
        }

        let promised = frame.promised_id;
        let fresh = promised.initiator() == self.shared.config.endpoint_type.peer_type()
            && promised.as_u32() > self.shared.max_peer_id.load(Ordering::Acquire);
        if !fresh {
            return Err(Fault::Connection(http2_error!(
                PROTOCOL_ERROR,
                "promised stream id is not new"
            )));
        }
        self.shared
            .max_peer_id
            .store(promised.as_u32(), Ordering::Release);

        let stream = Arc::new(StreamInner::new(
            promised,
            *lock(&self.shared.remote).initial_window_size,
            *lock(&self.shared.local).applied.initial_window_size,
        ));
        match stream.transition_recv(Kind::PushPromise, false, now, self.linger())? {
            Transition::Advanced(_) => {}
            Transition::Ignored => return Ok(()),
        }

        let limit = *lock(&self.shared.local).applied.max_concurrent_streams;
        self.shared
            .streams
            .insert(stream.clone(), limit, self.shared.config.endpoint_type)
            .map_err(Fault::Stream)?;

        // the synthesized request the promised response will answer
        stream.deliver_fields(frame.pseudo, frame.fields, false);

        let handle = Stream::new(stream, self.shared.clone());
        let mut accept = lock(&self.shared.accept);
        accept.streams.push_back(handle);
        if let Some(waker) = accept.waker.take() {
            waker.wake();
        }

        Ok(())
    }

    fn on_ping(&self, frame: frame::Ping, now: Timestamp) -> Result<(), Fault> {
        if frame.is_ack() {
            let mut pings = lock(&self.shared.pings);
            if let Some(position) = pings
                .iter()
                .position(|ping| ping.payload == *frame.payload())
            {
                if let Some(ping) = pings.remove(position) {
                    let _ = ping.reply.send(now.saturating_duration_since(ping.sent_at));
                }
            }
            // unsolicited acknowledgments are ignored
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.7
        //# Receivers of a PING frame that does not include an ACK flag MUST
        //# send a PING frame with the ACK flag set in response, with an
        //# identical frame payload.
        self.shared
            .queue
            .push_control(frame::Ping::pong(*frame.payload()).into());
        Ok(())
    }

    fn on_go_away(&self, frame: frame::GoAway, now: Timestamp) -> Result<(), Fault> {
        tracing::debug!(last = %frame.last_stream_id, code = %frame.error_code, "goaway received");
        *lock(&self.shared.goaway_received) = Some(frame.last_stream_id);

        // locally initiated streams above the cutoff will never complete
        let mut orphans = Vec::new();
        let _ = self.shared.streams.for_each(|stream| {
            if stream.id().initiator() == self.shared.config.endpoint_type
                && stream.id() > frame.last_stream_id
            {
                orphans.push(stream.clone());
            }
            Ok(())
        });
        for stream in orphans {
            if let Some(advance) =
                stream.shutdown(http2_error!(REFUSED_STREAM, "refused by GOAWAY"), now)
            {
                self.shared.apply_advance(stream.id(), advance);
            }
        }

        if frame.error_code != ErrorCode::NO_ERROR {
            self.fail(Error::new(frame.error_code, "closed by peer"), now);
            return Ok(());
        }

        // graceful: finish the surviving streams against the drain deadline
        let mut deadline = lock(&self.shared.drain_deadline);
        if deadline.is_none() {
            *deadline = Some(now + self.shared.config.drain_timeout);
        }
        Ok(())
    }

    fn on_window_update(&self, frame: frame::WindowUpdate, now: Timestamp) -> Result<(), Fault> {
        let id = frame.stream_id;

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.9
        //# A receiver MUST treat the receipt of a WINDOW_UPDATE frame with a
        //# flow-control window increment of 0 as a stream error
        //# (Section 5.4.2) of type PROTOCOL_ERROR; errors on the connection
        //# flow-control window MUST be treated as a connection error
        //# (Section 5.4.1).
        if frame.increment == 0 {
            let error = http2_error!(PROTOCOL_ERROR, "WINDOW_UPDATE with a zero increment");
            return if id.is_zero() {
                Err(Fault::Connection(error))
            } else {
                Err(Fault::Stream(error))
            };
        }

        if id.is_zero() {
            return self
                .shared
                .conn_send_flow
                .increment_window(frame.increment as i64)
                .map_err(Fault::Connection);
        }

        let Some(stream) = self.shared.streams.lookup(id) else {
            return self.forgotten_or_idle(id, Kind::WindowUpdate, false);
        };

        match stream.transition_recv(Kind::WindowUpdate, false, now, self.linger())? {
            Transition::Advanced(_) => stream
                .send_flow
                .increment_window(frame.increment as i64)
                .map_err(Fault::Stream),
            Transition::Ignored => Ok(()),
        }
    }

    /// Converts a stream fault into the RST_STREAM the peer will see
    fn reset_stream(&self, id: StreamId, error: Error, now: Timestamp) {
        if let Some(stream) = self.shared.streams.lookup(id) {
            if let Ok(Transition::Advanced(advance)) = stream.send_reset(error.code, now) {
                self.shared.apply_advance(id, advance);
            }
            let freed = stream.discard_recv_buffer();
            self.shared.return_connection_bytes(freed as u32);
        }
        self.shared
            .queue
            .push_control(frame::ResetStream::new(id, error.code).into());
    }

    /// Queues GOAWAY for a locally detected fatal error and tears down
    fn connection_error(&self, error: Error, now: Timestamp) {
        if lock(&self.shared.error).is_some() {
            return;
        }
        let last = self.shared.last_peer_id();
        *lock(&self.shared.goaway_sent) = Some(last);
        self.shared
            .queue
            .push_control(frame::GoAway::new(last, error.code).into());
        self.fail(error, now);
    }

    /// Latches the terminal error and releases everything that waits
    fn fail(&self, error: Error, now: Timestamp) {
        {
            let mut slot = lock(&self.shared.error);
            if slot.is_some() {
                return;
            }
            *slot = Some(error);
        }

        for stream in self.shared.streams.drain() {
            stream.shutdown(error, now);
        }
        self.shared.conn_send_flow.close(error);
        self.shared.close_signal.set();

        {
            let mut accept = lock(&self.shared.accept);
            if let Some(waker) = accept.waker.take() {
                waker.wake();
            }
        }
        // dropped reply slots surface the failure to ping callers
        lock(&self.shared.pings).clear();

        self.shared.queue.close();
    }

    /// Opens a locally initiated stream by queueing its HEADERS
    pub fn open_stream(
        &self,
        pseudo: Pseudo,
        fields: HeaderMap,
        end_stream: bool,
        now: Timestamp,
    ) -> Result<Stream, Error> {
        if let Some(error) = self.error() {
            return Err(error);
        }

        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.8
        //# After sending a GOAWAY frame, the sender can discard frames for
        //# streams initiated by the receiver with identifiers higher than the
        //# identified last stream.
        if lock(&self.shared.goaway_received).is_some() {
            return Err(http2_error!(REFUSED_STREAM, "peer is shutting down"));
        }

        pseudo.validate_request()?;

        let raw = self.shared.next_local_id.fetch_add(2, Ordering::AcqRel);
        let id = match StreamId::new(raw) {
            Some(id) if !id.is_zero() => id,
            _ => return Err(http2_error!(REFUSED_STREAM, "stream ids exhausted")),
        };

        let stream = Arc::new(StreamInner::new(
            id,
            *lock(&self.shared.remote).initial_window_size,
            *lock(&self.shared.local).applied.initial_window_size,
        ));

        match stream.transition_send(Kind::Headers, end_stream, now) {
            Ok(Transition::Advanced(_)) => {}
            Ok(Transition::Ignored) => {
                return Err(http2_error!(INTERNAL_ERROR, "fresh stream refused HEADERS"))
            }
            Err(Fault::Stream(error)) | Err(Fault::Connection(error)) => return Err(error),
        }

        // the peer's announced limit caps how many streams we may run
        let limit = *lock(&self.shared.remote).max_concurrent_streams;
        self.shared
            .streams
            .insert(stream.clone(), limit, self.shared.config.endpoint_type)?;

        let mut headers = frame::Headers::new(id, pseudo, fields);
        headers.end_stream = end_stream;
        self.shared.queue.push_control(headers.into());

        Ok(Stream::new(stream, self.shared.clone()))
    }

    /// Yields the next peer-opened stream
    pub fn poll_accept(&self, cx: &mut Context) -> Poll<Option<Stream>> {
        let mut accept = lock(&self.shared.accept);
        if let Some(stream) = accept.streams.pop_front() {
            return Poll::Ready(Some(stream));
        }
        if self.shared.close_signal.is_set() {
            return Poll::Ready(None);
        }
        accept.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub fn accept(&self) -> Accept<'_> {
        Accept { connection: self }
    }

    /// The peer-opened streams as an asynchronous sequence
    pub fn incoming(&self) -> Incoming<'_> {
        Incoming { connection: self }
    }

    /// Sends a PING and resolves with the measured round-trip time
    pub fn ping(&self, payload: ping::Payload, now: Timestamp) -> RoundTrip {
        let (reply, rx) = oneshot::channel();

        if self.error().is_none() {
            lock(&self.shared.pings).push_back(PendingPing {
                payload,
                sent_at: now,
                reply,
            });
            self.shared
                .queue
                .push_control(frame::Ping::new(payload).into());
        }
        // a dropped reply slot resolves the future with an error

        RoundTrip { rx }
    }

    /// Announces GOAWAY and starts the graceful drain
    ///
    /// Streams at or below `last_stream_id` keep running until they finish or
    /// the drain deadline fires; new peer-initiated streams are refused.
    pub fn close(&self, error_code: ErrorCode, last_stream_id: StreamId, now: Timestamp) {
        {
            let mut sent = lock(&self.shared.goaway_sent);
            if sent.is_none() {
                *sent = Some(last_stream_id);
            }
        }
        self.shared
            .queue
            .push_control(frame::GoAway::new(last_stream_id, error_code).into());

        let mut deadline = lock(&self.shared.drain_deadline);
        if deadline.is_none() {
            *deadline = Some(now + self.shared.config.drain_timeout);
        }
    }

    /// Announces a new local settings snapshot; it binds once the peer ACKs
    pub fn update_settings(&self, settings: Settings, now: Timestamp) -> Result<(), Error> {
        let mut local = lock(&self.shared.local);
        if local.pending.is_some() {
            return Err(http2_error!(
                INTERNAL_ERROR,
                "a SETTINGS exchange is already in flight"
            ));
        }
        local.pending = Some(settings);
        local.sent_at = Some(now);
        drop(local);

        self.shared
            .queue
            .push_control(frame::Settings::new(settings.to_vec()).into());
        Ok(())
    }

    /// Drives the connection's deadlines: SETTINGS acknowledgment, closed
    /// stream recycling, and the graceful-close drain
    pub fn on_timeout(&self, now: Timestamp) {
        let settings_expired = {
            let local = lock(&self.shared.local);
            local.sent_at.map_or(false, |at| {
                now.saturating_duration_since(at) > self.shared.config.settings_ack_timeout
            })
        };
        if settings_expired {
            //= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.3
            //# If the sender of a SETTINGS frame does not receive an
            //# acknowledgment within a reasonable amount of time, it MAY issue a
            //# connection error (Section 5.4.1) of type SETTINGS_TIMEOUT.
            self.connection_error(
                http2_error!(SETTINGS_TIMEOUT, "SETTINGS was never acknowledged"),
                now,
            );
            return;
        }

        self.shared
            .streams
            .reap(now, self.shared.config.closed_stream_linger);

        let deadline = *lock(&self.shared.drain_deadline);
        if let Some(deadline) = deadline {
            if now >= deadline {
                // the drain expired: cancel the survivors and finish
                for stream in self.shared.streams.drain() {
                    if !stream.is_closed() {
                        stream.shutdown(http2_error!(CANCEL, "connection drain expired"), now);
                        self.shared.queue.push_control(
                            frame::ResetStream::new(stream.id(), ErrorCode::CANCEL).into(),
                        );
                    }
                }
                self.shared.close_signal.set();
                self.shared.queue.close();
            } else if !self.shared.streams.has_open_streams() {
                self.shared.close_signal.set();
                self.shared.queue.close();
            }
        }
    }
}

/// Resolves with the next peer-opened stream, or `None` at shutdown
pub struct Accept<'a> {
    connection: &'a Connection,
}

impl Future for Accept<'_> {
    type Output = Option<Stream>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        self.connection.poll_accept(cx)
    }
}

/// Yields peer-opened streams until the connection shuts down
pub struct Incoming<'a> {
    connection: &'a Connection,
}

impl futures_core::Stream for Incoming<'_> {
    type Item = Stream;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Stream>> {
        self.connection.poll_accept(cx)
    }
}

/// Resolves with the round-trip time measured by a PING exchange
pub struct RoundTrip {
    rx: oneshot::Receiver<Duration>,
}

impl Future for RoundTrip {
    type Output = Result<Duration, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| http2_error!(CANCEL, "connection closed")))
    }
}
