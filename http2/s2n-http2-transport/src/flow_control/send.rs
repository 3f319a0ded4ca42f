// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{flow_control::MAX_WINDOW, sync::lock};
use core::task::{Context, Poll, Waker};
use s2n_http2_core::{error::Error, http2_error};
use smallvec::SmallVec;
use std::sync::Mutex;

/// The producer's rendezvous with remote-granted credit
///
/// Credit arrives on the reader task through WINDOW_UPDATE frames and is
/// handed to one waiting producer at a time. Delivery always hands over the
/// entire positive window; the producer returns whatever it does not spend,
/// including from its `Drop` when an await is abandoned.
#[derive(Debug)]
pub struct SendFlowController {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    window: i64,
    waiters: SmallVec<[Waker; 2]>,
    error: Option<Error>,
}

impl SendFlowController {
    pub fn new(initial_window: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                window: initial_window as i64,
                waiters: SmallVec::new(),
                error: None,
            }),
        }
    }

    /// The currently unclaimed credit
    ///
    /// Negative values occur after the peer shrinks INITIAL_WINDOW_SIZE while
    /// data is in flight; producers stay parked until the window recovers.
    pub fn window(&self) -> i64 {
        lock(&self.inner).window
    }

    /// Adds remote-granted credit (or subtracts, for a settings shrink)
    pub fn increment_window(&self, delta: i64) -> Result<(), Error> {
        let mut inner = lock(&self.inner);

        let next = inner.window + delta;
        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.9.1
        //# If a sender receives a WINDOW_UPDATE that causes a flow-control
        //# window to exceed this maximum, it MUST terminate either the stream
        //# or the connection, as appropriate.
        if next > MAX_WINDOW {
            return Err(http2_error!(
                FLOW_CONTROL_ERROR,
                "flow-control window overflow"
            ));
        }
        inner.window = next;

        if next > 0 {
            if let Some(waker) = inner.waiters.pop() {
                waker.wake();
            }
        }

        Ok(())
    }

    /// Takes the entire available credit, or parks the caller until some
    /// arrives
    pub fn poll_credit(&self, cx: &mut Context) -> Poll<Result<u32, Error>> {
        let mut inner = lock(&self.inner);

        if let Some(error) = inner.error {
            return Poll::Ready(Err(error));
        }

        if inner.window > 0 {
            let credit = inner.window.min(MAX_WINDOW) as u32;
            inner.window = 0;
            return Poll::Ready(Ok(credit));
        }

        if !inner.waiters.iter().any(|waker| waker.will_wake(cx.waker())) {
            inner.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }

    /// Hands back credit a producer claimed but did not spend
    pub fn return_credit(&self, credit: u32) {
        if credit == 0 {
            return;
        }

        let mut inner = lock(&self.inner);
        inner.window += credit as i64;
        if inner.window > 0 {
            if let Some(waker) = inner.waiters.pop() {
                waker.wake();
            }
        }
    }

    /// Latches a terminal error and releases every parked producer
    pub fn close(&self, error: Error) {
        let mut inner = lock(&self.inner);
        if inner.error.is_none() {
            inner.error = Some(error);
        }
        for waker in inner.waiters.drain(..) {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_test::task::new_count_waker;
    use s2n_http2_core::error::ErrorCode;

    #[test]
    fn delivers_the_entire_window() {
        let flow = SendFlowController::new(65_535);
        let (waker, _count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);

        match flow.poll_credit(&mut cx) {
            Poll::Ready(Ok(credit)) => assert_eq!(credit, 65_535),
            other => panic!("unexpected poll result {other:?}"),
        }
        assert_eq!(flow.window(), 0);
        assert!(flow.poll_credit(&mut cx).is_pending());
    }

    #[test]
    fn wakes_a_parked_producer_on_credit() {
        let flow = SendFlowController::new(0);
        let (waker, count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(flow.poll_credit(&mut cx).is_pending());
        assert_eq!(count, 0);

        flow.increment_window(1024).unwrap();
        assert_eq!(count, 1);

        match flow.poll_credit(&mut cx) {
            Poll::Ready(Ok(credit)) => assert_eq!(credit, 1024),
            other => panic!("unexpected poll result {other:?}"),
        }
    }

    #[test]
    fn negative_windows_hold_producers_back() {
        let flow = SendFlowController::new(65_535);
        flow.increment_window(1024 - 65_535).unwrap();
        assert_eq!(flow.window(), 1024);

        flow.increment_window(-2048).unwrap();
        assert_eq!(flow.window(), -1024);

        let (waker, count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(flow.poll_credit(&mut cx).is_pending());

        // recovering to a non-positive window must not wake anyone
        flow.increment_window(1024).unwrap();
        assert_eq!(count, 0);

        flow.increment_window(1).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn overflow_is_a_flow_control_error() {
        let flow = SendFlowController::new(65_535);
        let err = flow.increment_window(MAX_WINDOW).unwrap_err();
        assert_eq!(err.code, ErrorCode::FLOW_CONTROL_ERROR);

        // the failed increment must not have been applied
        assert_eq!(flow.window(), 65_535);
    }

    #[test]
    fn abandoned_awaits_preserve_credit() {
        let flow = SendFlowController::new(4096);
        let (waker, _count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);

        let credit = match flow.poll_credit(&mut cx) {
            Poll::Ready(Ok(credit)) => credit,
            other => panic!("unexpected poll result {other:?}"),
        };

        // the producer only spent half before being cancelled
        flow.return_credit(credit - 2048);
        assert_eq!(flow.window(), 2048);
    }

    #[test]
    fn close_releases_parked_producers() {
        let flow = SendFlowController::new(0);
        let (waker, count) = new_count_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(flow.poll_credit(&mut cx).is_pending());
        flow.close(http2_error!(CANCEL, "stream reset"));
        assert_eq!(count, 1);

        match flow.poll_credit(&mut cx) {
            Poll::Ready(Err(error)) => assert_eq!(error.code, ErrorCode::CANCEL),
            other => panic!("unexpected poll result {other:?}"),
        }
    }
}
