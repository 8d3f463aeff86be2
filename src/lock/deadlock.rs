// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Deadlock detection over the waits-for graph.
//!
//! A search starts from a transaction that just enqueued a waiting lock and
//! follows, depth first, every lock the wait lock has to wait for. Reaching
//! the starting transaction again closes a cycle. The lighter of the two
//! transactions at the closing edge is rolled back: either the starter, which
//! then gets `DEADLOCK` from its request, or the other one, whose wait is
//! cancelled before the search restarts.

use std::fmt::Write;

use tracing::{debug, error};

use crate::trx::{QueState, TrxId};

use super::kernel::Kernel;
use super::object::LockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
    NotFound,
    VictimIsStart,
    VictimIsOther,
    ExceededMaxDepth,
}

impl Kernel {
    /// Returns true if the waiting lock `wait_lock` of `trx` closes a cycle
    /// and `trx` has to be rolled back. Other transactions chosen as victims
    /// along the way have their waits cancelled.
    pub(crate) fn deadlock_occurs(&mut self, wait_lock: LockId, trx: TrxId) -> bool {
        debug_assert_eq!(self.locks[wait_lock].trx, trx);

        let outcome = loop {
            for id in self.trx_sys.trx_list().collect::<Vec<_>>() {
                self.trx_sys[id].deadlock_mark = false;
            }
            let mut cost = 0;
            match self.deadlock_recursive(trx, trx, wait_lock, &mut cost, 0) {
                Search::VictimIsOther => continue,
                outcome => break outcome,
            }
        };

        match outcome {
            Search::ExceededMaxDepth => {
                error!(
                    target: "lock",
                    trx = %trx,
                    "deadlock search too deep or too long, rolling back the requesting transaction"
                );
                let mut report = String::from(
                    "TOO DEEP OR LONG SEARCH IN THE LOCK TABLE WAITS-FOR GRAPH, WE WILL ROLL BACK FOLLOWING TRANSACTION \n\n*** TRANSACTION:\n",
                );
                let _ = self.trx_print(&mut report, trx);
                report.push_str("*** WAITING FOR THIS LOCK TO BE GRANTED:\n");
                let _ = self.lock_print(&mut report, wait_lock);
                self.latest_deadlock = report;
            }
            Search::VictimIsStart => {
                debug!(target: "lock", trx = %trx, "deadlock found, rolling back the requesting transaction");
                self.latest_deadlock.push_str("*** WE ROLL BACK TRANSACTION (2)\n");
            }
            Search::NotFound | Search::VictimIsOther => return false,
        }
        self.deadlock_found = true;
        true
    }

    fn deadlock_recursive(
        &mut self,
        start: TrxId,
        trx: TrxId,
        wait_lock: LockId,
        cost: &mut usize,
        depth: usize,
    ) -> Search {
        if self.trx_sys[trx].deadlock_mark {
            // Already searched from this transaction without finding a cycle.
            return Search::NotFound;
        }
        *cost += 1;

        for lock in self.waited_for(wait_lock) {
            if !self.locks[wait_lock].has_to_wait(&self.locks[lock]) {
                continue;
            }
            let too_far = depth > self.config.max_depth || *cost > self.config.max_steps;
            let holder = self.locks[lock].trx;

            if holder == start {
                self.write_cycle_report(start, wait_lock, lock);
                let waiter = self.locks[wait_lock].trx;
                if self.trx_sys[waiter].weight() >= self.trx_sys[start].weight() {
                    return Search::VictimIsStart;
                }

                self.deadlock_found = true;
                self.latest_deadlock.push_str("*** WE ROLL BACK TRANSACTION (1)\n");
                debug!(target: "lock", victim = %waiter, start = %start, "deadlock found, cancelling the lighter waiter");
                self.trx_sys[waiter].was_chosen_as_deadlock_victim = true;
                self.note_deadlock_victim(waiter, wait_lock);
                self.cancel_waiting_and_release(wait_lock);
                return Search::VictimIsOther;
            }

            if too_far {
                return Search::ExceededMaxDepth;
            }

            if self.trx_sys[holder].que_state == QueState::LockWait {
                if let Some(next_wait) = self.trx_sys[holder].wait_lock {
                    let found = self.deadlock_recursive(start, holder, next_wait, cost, depth + 1);
                    if found != Search::NotFound {
                        return found;
                    }
                }
            }
        }

        self.trx_sys[trx].deadlock_mark = true;
        Search::NotFound
    }

    /// Locks queued ahead of `wait_lock` on its record or table.
    fn waited_for(&self, wait_lock: LockId) -> Vec<LockId> {
        let mut out = Vec::new();
        let lock = &self.locks[wait_lock];
        if lock.is_record() {
            let Some(heap_no) = lock.find_set_bit() else {
                return out;
            };
            let mut cur = self.rec_first_on_page(lock.rec().page);
            while let Some(id) = cur {
                if id == wait_lock {
                    break;
                }
                if self.locks[id].rec_bit(heap_no) {
                    out.push(id);
                }
                cur = self.rec_next_on_page(id);
            }
        } else {
            let mut cur = self.table_prev(wait_lock);
            while let Some(id) = cur {
                out.push(id);
                cur = self.table_prev(id);
            }
        }
        out
    }

    fn write_cycle_report(&mut self, start: TrxId, wait_lock: LockId, held: LockId) {
        let mut report = String::new();
        let waiter = self.locks[wait_lock].trx;
        let holder = self.locks[held].trx;

        report.push_str("\n*** (1) TRANSACTION:\n");
        let _ = self.trx_print(&mut report, waiter);
        report.push_str("*** (1) WAITING FOR THIS LOCK TO BE GRANTED:\n");
        let _ = self.lock_print(&mut report, wait_lock);
        report.push_str("*** (2) TRANSACTION:\n");
        let _ = self.trx_print(&mut report, holder);
        report.push_str("*** (2) HOLDS THE LOCK(S):\n");
        let _ = self.lock_print(&mut report, held);
        report.push_str("*** (2) WAITING FOR THIS LOCK TO BE GRANTED:\n");
        if let Some(start_wait) = self.trx_sys[start].wait_lock {
            let _ = self.lock_print(&mut report, start_wait);
        }
        let _ = writeln!(report);
        self.latest_deadlock = report;
    }
}
