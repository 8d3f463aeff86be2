// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Scheduler hooks for suspending and resuming lock waiters.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::trx::TrxId;

/// The scheduler as seen by the lock subsystem.
///
/// `wake` is called with the kernel mutex held, so it must not block. `park`
/// is called without it.
pub trait LockWaitHandler: Send + Sync {
    /// Returns true if the query thread of `trx` is already being stopped,
    /// in which case no wait is enqueued.
    fn is_stopped(&self, _trx: TrxId) -> bool {
        false
    }

    /// Resumes `trx` after its lock was granted or cancelled.
    fn wake(&self, trx: TrxId);

    /// Blocks the caller until `trx` is woken or `timeout` elapses. Returns
    /// true if woken.
    fn park(&self, trx: TrxId, timeout: Option<Duration>) -> bool;

    /// Returns true if the embedder asked to abandon the wait of `trx`.
    fn is_interrupted(&self, _trx: TrxId) -> bool {
        false
    }

    /// Drops any wake or interrupt still pending for `trx`. Called once its
    /// wait is over and when it ends.
    fn forget(&self, _trx: TrxId) {}
}

#[derive(Debug, Default)]
struct ParkState {
    woken: HashSet<TrxId>,
    interrupted: HashSet<TrxId>,
    /// Transactions with a thread inside `park`.
    parked: HashSet<TrxId>,
}

/// Parks OS threads on a condition variable, one wake token per transaction.
///
/// A wake that arrives before the waiter parks is kept and consumed by the
/// next `park`, so the kernel mutex can be dropped before parking.
#[derive(Debug, Default)]
pub struct ThreadParker {
    state: Mutex<ParkState>,
    cond: Condvar,
}

impl ThreadParker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the waiter of `trx` to give up. Consumed by `is_interrupted`.
    pub fn interrupt(&self, trx: TrxId) {
        self.state.lock().interrupted.insert(trx);
        self.cond.notify_all();
    }

    /// Number of transactions with a wake or interrupt not yet consumed.
    pub fn n_pending(&self) -> usize {
        let state = self.state.lock();
        state.woken.union(&state.interrupted).count()
    }
}

impl LockWaitHandler for ThreadParker {
    fn wake(&self, trx: TrxId) {
        self.state.lock().woken.insert(trx);
        self.cond.notify_all();
    }

    fn park(&self, trx: TrxId, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        state.parked.insert(trx);
        let woken = loop {
            if state.woken.remove(&trx) {
                break true;
            }
            if state.interrupted.contains(&trx) {
                break false;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break state.woken.remove(&trx);
                    }
                }
                None => self.cond.wait(&mut state),
            }
        };
        state.parked.remove(&trx);
        woken
    }

    fn is_interrupted(&self, trx: TrxId) -> bool {
        self.state.lock().interrupted.remove(&trx)
    }

    fn forget(&self, trx: TrxId) {
        let mut state = self.state.lock();
        // A thread still parked on `trx` consumes its own token.
        if !state.parked.contains(&trx) {
            state.woken.remove(&trx);
            state.interrupted.remove(&trx);
        }
    }
}
