// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sync::lock;
use core::task::{Context, Poll, Waker};
use smallvec::SmallVec;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// A one-shot signal observed by any number of waiters
///
/// Waiters register their waker and then re-check the flag, so a `set` that
/// races the registration can never be missed.
#[derive(Debug, Default)]
pub struct CloseSignal {
    is_set: AtomicBool,
    wakers: Mutex<SmallVec<[Waker; 2]>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal and wakes every waiter; repeated calls are no-ops
    pub fn set(&self) {
        if self.is_set.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut wakers = lock(&self.wakers);
        for waker in wakers.drain(..) {
            waker.wake();
        }
    }

    /// Returns true if the signal has fired
    #[inline]
    pub fn is_set(&self) -> bool {
        self.is_set.load(Ordering::Acquire)
    }

    /// Completes once the signal has fired
    pub fn poll_set(&self, cx: &mut Context) -> Poll<()> {
        if self.is_set() {
            return Poll::Ready(());
        }

        let mut wakers = lock(&self.wakers);
        if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        drop(wakers);

        if self.is_set() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
