// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Synchronization primitives shared by the engine tasks

mod close_signal;

pub use close_signal::CloseSignal;

/// Acquires a mutex, disregarding poisoning
///
/// Every critical section in the engine restores its invariants before
/// unlocking, so a panic mid-section cannot leave observable partial state.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
