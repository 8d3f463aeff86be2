// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! State guarded by the kernel mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::dict::TableId;
use crate::page::PageId;
use crate::trx::{QueState, TrxId, TrxSys};

use super::arena::{ListBase, LockArena, TableChain, TrxChain};
use super::config::LockSysConfig;
use super::hash::RecLockHash;
use super::mode::LockFlags;
use super::object::{Lock, LockId};
use super::wait::LockWaitHandler;

/// Everything the kernel mutex protects: the lock arena, the record lock
/// hash, the table queues and the transaction registry.
///
/// Methods on `Kernel` assume the caller holds the mutex, which is what
/// owning a `&mut Kernel` through the guard proves.
pub struct Kernel {
    pub(crate) locks: LockArena,
    pub(crate) rec_hash: RecLockHash,
    pub(crate) tables: HashMap<TableId, ListBase>,
    pub(crate) trx_sys: TrxSys,
    /// Set once any deadlock has been resolved; enables the report.
    pub(crate) deadlock_found: bool,
    pub(crate) latest_deadlock: String,
    pub(crate) config: LockSysConfig,
    pub(crate) waits: Arc<dyn LockWaitHandler>,
}

impl Kernel {
    pub(crate) fn new(config: LockSysConfig, waits: Arc<dyn LockWaitHandler>) -> Self {
        Self {
            locks: LockArena::new(),
            rec_hash: RecLockHash::new(config.n_cells),
            tables: HashMap::new(),
            trx_sys: TrxSys::new(),
            deadlock_found: false,
            latest_deadlock: String::new(),
            config,
            waits,
        }
    }

    #[inline]
    pub fn trx_sys(&self) -> &TrxSys {
        &self.trx_sys
    }

    #[inline]
    pub fn trx_sys_mut(&mut self) -> &mut TrxSys {
        &mut self.trx_sys
    }

    #[inline]
    pub fn config(&self) -> &LockSysConfig {
        &self.config
    }

    /// Returns the lock behind a handle.
    #[inline]
    pub fn lock(&self, id: LockId) -> &Lock {
        &self.locks[id]
    }

    /// Returns true if a deadlock has been resolved since startup.
    #[inline]
    pub fn deadlock_found(&self) -> bool {
        self.deadlock_found
    }

    /// Returns the report of the most recent deadlock.
    #[inline]
    pub fn latest_deadlock(&self) -> &str {
        &self.latest_deadlock
    }

    /// Reports a fatal invariant violation and hands control to the hook.
    pub(crate) fn fatal(&self, msg: &str) -> ! {
        error!(target: "lock", "{msg}");
        (self.config.panic_hook)(msg)
    }

    // ---------------------------------------------------------------------
    // record lock hash

    /// Appends a record lock to the end of its page's hash chain.
    pub(crate) fn rec_hash_insert(&mut self, id: LockId) {
        let cell = self.rec_hash.cell_of(self.locks[id].rec().page);
        self.locks[id].rec_mut().hash_next = None;
        let Some(mut cur) = self.rec_hash.head(cell) else {
            self.rec_hash.set_head(cell, Some(id));
            return;
        };
        while let Some(next) = self.locks[cur].rec().hash_next {
            cur = next;
        }
        self.locks[cur].rec_mut().hash_next = Some(id);
    }

    pub(crate) fn rec_hash_remove(&mut self, id: LockId) {
        let cell = self.rec_hash.cell_of(self.locks[id].rec().page);
        let next = self.locks[id].rec().hash_next;
        if self.rec_hash.head(cell) == Some(id) {
            self.rec_hash.set_head(cell, next);
        } else {
            let mut cur = self.rec_hash.head(cell);
            while let Some(c) = cur {
                let after = self.locks[c].rec().hash_next;
                if after == Some(id) {
                    self.locks[c].rec_mut().hash_next = next;
                    break;
                }
                cur = after;
            }
        }
        self.locks[id].rec_mut().hash_next = None;
    }

    /// Returns the first record lock on a page.
    pub fn rec_first_on_page(&self, page: PageId) -> Option<LockId> {
        let mut cur = self.rec_hash.head(self.rec_hash.cell_of(page));
        while let Some(id) = cur {
            let rec = self.locks[id].rec();
            if rec.page == page {
                return Some(id);
            }
            cur = rec.hash_next;
        }
        None
    }

    /// Returns the next record lock on the same page.
    pub fn rec_next_on_page(&self, id: LockId) -> Option<LockId> {
        let page = self.locks[id].rec().page;
        let mut cur = self.locks[id].rec().hash_next;
        while let Some(next) = cur {
            let rec = self.locks[next].rec();
            if rec.page == page {
                return Some(next);
            }
            cur = rec.hash_next;
        }
        None
    }

    /// Returns the first lock on a page with bit `heap_no` set.
    pub fn rec_first(&self, page: PageId, heap_no: usize) -> Option<LockId> {
        let mut cur = self.rec_first_on_page(page);
        while let Some(id) = cur {
            if self.locks[id].rec_bit(heap_no) {
                return Some(id);
            }
            cur = self.rec_next_on_page(id);
        }
        None
    }

    /// Returns the next lock after `id` on the same page with bit `heap_no`.
    pub fn rec_next(&self, heap_no: usize, id: LockId) -> Option<LockId> {
        let mut cur = self.rec_next_on_page(id);
        while let Some(next) = cur {
            if self.locks[next].rec_bit(heap_no) {
                return Some(next);
            }
            cur = self.rec_next_on_page(next);
        }
        None
    }

    /// Returns the lock before `id` in the queue of record `heap_no`.
    pub fn rec_prev(&self, id: LockId, heap_no: usize) -> Option<LockId> {
        let page = self.locks[id].rec().page;
        let mut found = None;
        let mut cur = self.rec_first_on_page(page);
        while let Some(lock) = cur {
            if lock == id {
                return found;
            }
            if self.locks[lock].rec_bit(heap_no) {
                found = Some(lock);
            }
            cur = self.rec_next_on_page(lock);
        }
        None
    }

    /// Collects the locks on a page in queue order.
    pub fn page_locks(&self, page: PageId) -> Vec<LockId> {
        let mut out = Vec::new();
        let mut cur = self.rec_first_on_page(page);
        while let Some(id) = cur {
            out.push(id);
            cur = self.rec_next_on_page(id);
        }
        out
    }

    /// Collects the locks on one record in queue order.
    pub fn bit_locks(&self, page: PageId, heap_no: usize) -> Vec<LockId> {
        self.page_locks(page)
            .into_iter()
            .filter(|id| self.locks[*id].rec_bit(heap_no))
            .collect()
    }

    /// Returns the number of record locks in the hash.
    pub fn n_rec_locks(&self) -> usize {
        (0..self.rec_hash.n_cells())
            .map(|cell| {
                let mut n = 0;
                let mut cur = self.rec_hash.head(cell);
                while let Some(id) = cur {
                    n += 1;
                    cur = self.locks[id].rec().hash_next;
                }
                n
            })
            .sum()
    }

    // ---------------------------------------------------------------------
    // table queues and transaction lists

    /// Returns a table's lock queue.
    pub fn table_queue(&self, table: TableId) -> ListBase {
        self.tables.get(&table).copied().unwrap_or_default()
    }

    /// Collects a table's locks in queue order.
    pub fn table_locks(&self, table: TableId) -> Vec<LockId> {
        match self.tables.get(&table) {
            Some(base) => self.locks.iter::<TableChain>(base).collect(),
            None => Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn table_next(&self, id: LockId) -> Option<LockId> {
        self.locks.next::<TableChain>(id)
    }

    #[inline]
    pub(crate) fn table_prev(&self, id: LockId) -> Option<LockId> {
        self.locks.prev::<TableChain>(id)
    }

    /// Collects a transaction's locks in creation order.
    pub fn trx_locks(&self, trx: TrxId) -> Vec<LockId> {
        match self.trx_sys.get(trx) {
            Some(t) => self.locks.iter::<TrxChain>(&t.locks).collect(),
            None => Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // wait state

    /// Marks a lock as waiting and makes it its transaction's wait lock.
    pub(crate) fn set_lock_and_trx_wait(&mut self, id: LockId) {
        let trx = self.locks[id].trx;
        debug_assert!(self.trx_sys[trx].wait_lock.is_none());
        self.trx_sys[trx].wait_lock = Some(id);
        self.locks[id].type_mode = self.locks[id].type_mode.with(LockFlags::WAIT);
    }

    /// Clears the wait flag of a lock and its transaction's back pointer.
    pub(crate) fn reset_lock_and_trx_wait(&mut self, id: LockId) {
        let trx = self.locks[id].trx;
        debug_assert_eq!(self.trx_sys[trx].wait_lock, Some(id));
        if self.trx_sys[trx].wait_lock == Some(id) {
            self.trx_sys[trx].wait_lock = None;
        }
        self.locks[id].type_mode = self.locks[id].type_mode.without(LockFlags::WAIT);
    }

    /// Moves a transaction out of lock wait and wakes it.
    pub(crate) fn end_lock_wait(&mut self, trx: TrxId) {
        let t = &mut self.trx_sys[trx];
        t.que_state = QueState::Running;
        if self.config.print_waits {
            let waited = t.wait_started.map(|s| Instant::now().duration_since(s));
            debug!(target: "lock", trx = %trx, ?waited, "lock wait ends");
        }
        self.waits.wake(trx);
    }
}
