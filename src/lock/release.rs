// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Bulk release at transaction end, wait cancellation and table drops.

use parking_lot::MutexGuard;

use crate::dict::TableId;
use crate::trx::TrxId;

use super::arena::TrxChain;
use super::kernel::Kernel;
use super::mode::LockMode;
use super::object::LockId;

impl Kernel {
    /// Releases every lock of `trx`, newest first, and returns the arena
    /// slots. The kernel mutex is yielded every `release_interval` locks so
    /// waiters are not starved by a large transaction.
    pub(crate) fn release_off_kernel(kernel: &mut MutexGuard<'_, Kernel>, trx: TrxId) {
        let interval = kernel.config.release_interval.max(1);
        let mut count = 0;

        while let Some(id) = kernel.trx_sys[trx].locks.last() {
            if kernel.locks[id].is_record() {
                kernel.rec_dequeue_from_page(id);
            } else {
                kernel.table_dequeue(id);
            }
            count += 1;
            if count == interval {
                MutexGuard::bump(kernel);
                count = 0;
            }
        }

        let slots = std::mem::take(&mut kernel.trx_sys[trx].lock_heap);
        for id in slots {
            kernel.locks.release(id);
        }
    }

    /// Cancels a waiting lock, removes it from its queue and resumes its
    /// transaction.
    pub fn cancel_waiting_and_release(&mut self, id: LockId) {
        debug_assert!(self.locks[id].is_wait());
        if self.locks[id].is_record() {
            self.rec_dequeue_from_page(id);
        } else {
            self.table_dequeue(id);
        }
        self.reset_lock_and_trx_wait(id);
        let trx = self.locks[id].trx;
        self.end_lock_wait(trx);
    }

    /// Removes the locks of `trx` on `table` and on the table's records,
    /// leaving table-level S and X locks in place unless `remove_sx`.
    fn remove_all_on_table_for_trx(&mut self, table: TableId, trx: TrxId, remove_sx: bool) {
        let mut cur = self.trx_sys[trx].locks.last();
        while let Some(id) = cur {
            let prev = self.locks.prev::<TrxChain>(id);
            let lock = &self.locks[id];
            if lock.is_record() && lock.table_id() == table {
                if lock.is_wait() {
                    self.fatal("removing a waiting record lock on a dropped table");
                }
                self.rec_discard(id);
            } else if lock.is_table()
                && lock.table_id() == table
                && (remove_sx || !matches!(lock.mode(), LockMode::S | LockMode::X))
            {
                if lock.is_wait() {
                    self.fatal("removing a waiting table lock on a dropped table");
                }
                self.table_remove_low(id);
            }
            cur = prev;
        }
    }

    /// Removes the locks of every transaction on `table` and its records.
    /// Table-level S and X locks survive unless `remove_sx`.
    ///
    /// A waiting lock met on the way is skipped when `remove_sx` is false
    /// and is fatal otherwise.
    pub fn remove_all_on_table(&mut self, table: TableId, remove_sx: bool) {
        let mut cur = self.table_queue(table).first();
        while let Some(lock) = cur {
            let prev = self.table_prev(lock);
            let l = &self.locks[lock];

            if (remove_sx || !matches!(l.mode(), LockMode::S | LockMode::X)) && l.is_wait() {
                if remove_sx {
                    self.fatal("waiting lock found while removing all locks on a table");
                }
                cur = self.table_next(lock);
                continue;
            }

            let trx = l.trx;
            self.remove_all_on_table_for_trx(table, trx, remove_sx);

            cur = match prev {
                None => {
                    let first = self.table_queue(table).first();
                    if first == Some(lock) {
                        // Not removed.
                        self.table_next(lock)
                    } else {
                        first
                    }
                }
                Some(prev) if self.table_next(prev) != Some(lock) => self.table_next(prev),
                Some(_) => self.table_next(lock),
            };
        }
    }
}
