// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sync::lock;
use atomic_waker::AtomicWaker;
use core::task::{Context, Poll, Waker};
use s2n_http2_core::frame::Frame;
use smallvec::SmallVec;
use std::{collections::VecDeque, sync::Mutex};

/// The single outbound FIFO feeding the writer task
///
/// Control frames (everything that is not DATA) drain ahead of DATA and are
/// never refused; DATA admission is bounded so producers feel back-pressure
/// once the writer falls behind. Credit has already been claimed by the time
/// a DATA frame is offered here, so the bound limits memory, not fairness.
#[derive(Debug)]
pub(crate) struct SendQueue {
    inner: Mutex<Inner>,
    /// There is exactly one writer task; it parks here
    writer: AtomicWaker,
}

#[derive(Debug)]
struct Inner {
    control: VecDeque<Frame>,
    data: VecDeque<Frame>,
    capacity: usize,
    producers: SmallVec<[Waker; 4]>,
    closed: bool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                control: VecDeque::new(),
                data: VecDeque::new(),
                capacity: capacity.max(1),
                producers: SmallVec::new(),
                closed: false,
            }),
            writer: AtomicWaker::new(),
        }
    }

    /// Enqueues a frame on the head-of-queue lane
    pub fn push_control(&self, frame: Frame) {
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return;
            }
            inner.control.push_back(frame);
        }
        self.writer.wake();
    }

    /// Offers a DATA frame, parking the producer while the lane is full
    ///
    /// The frame stays in `slot` when the queue has no room yet.
    pub fn poll_push_data(&self, cx: &mut Context, slot: &mut Option<Frame>) -> Poll<()> {
        {
            let mut inner = lock(&self.inner);

            if inner.closed {
                // the writer is gone; drop the frame so producers observe the
                // stream or connection error instead of hanging
                slot.take();
                return Poll::Ready(());
            }

            if inner.data.len() < inner.capacity {
                if let Some(frame) = slot.take() {
                    inner.data.push_back(frame);
                }
            } else {
                if !inner
                    .producers
                    .iter()
                    .any(|waker| waker.will_wake(cx.waker()))
                {
                    inner.producers.push(cx.waker().clone());
                }
                return Poll::Pending;
            }
        }

        self.writer.wake();
        Poll::Ready(())
    }

    /// Hands the writer the next frame, control lane first
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn poll_pop(&self, cx: &mut Context) -> Poll<Option<Frame>> {
        if let Some(frame) = self.try_pop() {
            return Poll::Ready(Some(frame));
        }

        self.writer.register(cx.waker());

        // a frame pushed between the first check and the registration would
        // have missed the waker; look again
        if let Some(frame) = self.try_pop() {
            return Poll::Ready(Some(frame));
        }
        if lock(&self.inner).closed {
            return Poll::Ready(None);
        }
        Poll::Pending
    }

    /// Pops without parking; teardown sweeps and tests use this directly
    pub fn try_pop(&self) -> Option<Frame> {
        let mut inner = lock(&self.inner);
        let frame = inner.control.pop_front();
        let frame = frame.or_else(|| inner.data.pop_front());
        if frame.is_some() {
            if let Some(waker) = inner.producers.pop() {
                waker.wake();
            }
        }
        frame
    }

    /// Stops admission; the writer drains what is left and then observes the
    /// end of the queue
    pub fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            for waker in inner.producers.drain(..) {
                waker.wake();
            }
        }
        self.writer.wake();
    }
}
