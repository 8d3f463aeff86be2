// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Record lock queues: creation, acquisition, grant and release.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::dict::Index;
use crate::page::{Block, PageId, PAGE_HEAP_NO_SUPREMUM};
use crate::trx::{DictOp, ErrorInfo, QueState, TrxId};

use super::arena::TrxChain;
use super::bitmap::LockBitmap;
use super::error::{ErrorCode, LockError, LockStatus};
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode, TypeMode};
use super::object::{rec_has_to_wait, Lock, LockId, LockKind, RecLock};

impl Kernel {
    #[inline]
    pub(crate) fn rec_set_bit(&mut self, id: LockId, heap_no: usize) {
        self.locks[id].rec_mut().bitmap.set(heap_no);
    }

    #[inline]
    pub(crate) fn rec_reset_bit(&mut self, id: LockId, heap_no: usize) {
        self.locks[id].rec_mut().bitmap.clear(heap_no);
    }

    /// Creates a record lock for one record and links it into the page hash
    /// chain and the transaction's lock list.
    pub(crate) fn rec_create(
        &mut self,
        type_mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> LockId {
        let mut type_mode = type_mode.with(LockFlags::REC);
        if heap_no == PAGE_HEAP_NO_SUPREMUM {
            // Only the gap exists on the supremum.
            type_mode = type_mode.without(LockFlags::GAP | LockFlags::REC_NOT_GAP);
        }

        let mut bitmap = LockBitmap::new(block.n_heap().max(heap_no + 1), self.config.bitmap_margin);
        bitmap.set(heap_no);

        let id = self.locks.alloc(Lock {
            trx,
            type_mode: type_mode.without(LockFlags::WAIT),
            trx_link: Default::default(),
            kind: LockKind::Rec(RecLock {
                page: block.id(),
                index: Arc::clone(index),
                bitmap,
                hash_next: None,
            }),
        });

        let owner = &mut self.trx_sys[trx];
        owner.lock_heap.push(id);
        self.locks.push_back::<TrxChain>(&mut owner.locks, id);
        self.rec_hash_insert(id);

        if type_mode.is_wait() {
            self.set_lock_and_trx_wait(id);
        }
        id
    }

    /// Finds a lock of `trx` on the page with exactly `type_mode` whose
    /// bitmap can hold `heap_no`.
    fn rec_find_similar_on_page(
        &self,
        type_mode: TypeMode,
        page: PageId,
        heap_no: usize,
        trx: TrxId,
    ) -> Option<LockId> {
        let mut cur = self.rec_first_on_page(page);
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx == trx && lock.type_mode == type_mode && lock.rec().n_bits() > heap_no {
                return Some(id);
            }
            cur = self.rec_next_on_page(id);
        }
        None
    }

    /// Returns a granted lock of `trx` on the record that is at least as
    /// strong as `precise_mode`, gap semantics included.
    pub(crate) fn rec_has_expl(
        &self,
        precise_mode: TypeMode,
        page: PageId,
        heap_no: usize,
        trx: TrxId,
    ) -> Option<LockId> {
        let on_supremum = heap_no == PAGE_HEAP_NO_SUPREMUM;
        let mut cur = self.rec_first(page, heap_no);
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx == trx
                && lock.mode().is_stronger_or_eq(precise_mode.mode())
                && !lock.is_wait()
                && (!lock.is_rec_not_gap() || precise_mode.is_rec_not_gap() || on_supremum)
                && (!lock.is_gap() || precise_mode.is_gap() || on_supremum)
                && !lock.is_insert_intention()
            {
                return Some(id);
            }
            cur = self.rec_next(heap_no, id);
        }
        None
    }

    /// Returns a lock of another transaction on the record at least as strong
    /// as `mode`. With `gap` false, gap and supremum locks are ignored; with
    /// `wait` false, waiting locks are ignored.
    pub(crate) fn rec_other_has_expl_req(
        &self,
        mode: LockMode,
        gap: bool,
        wait: bool,
        page: PageId,
        heap_no: usize,
        trx: TrxId,
    ) -> Option<LockId> {
        let mut cur = self.rec_first(page, heap_no);
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx != trx
                && (gap || !(lock.is_gap() || heap_no == PAGE_HEAP_NO_SUPREMUM))
                && (wait || !lock.is_wait())
                && lock.mode().is_stronger_or_eq(mode)
            {
                return Some(id);
            }
            cur = self.rec_next(heap_no, id);
        }
        None
    }

    /// Returns a lock of another transaction that a request of `type_mode`
    /// would have to wait for.
    pub(crate) fn rec_other_has_conflicting(
        &self,
        type_mode: TypeMode,
        page: PageId,
        heap_no: usize,
        trx: TrxId,
    ) -> Option<LockId> {
        let on_supremum = heap_no == PAGE_HEAP_NO_SUPREMUM;
        let mut cur = self.rec_first(page, heap_no);
        while let Some(id) = cur {
            if rec_has_to_wait(trx, type_mode, &self.locks[id], on_supremum) {
                return Some(id);
            }
            cur = self.rec_next(heap_no, id);
        }
        None
    }

    /// Adds a lock request to the record queue, reusing a lock of the same
    /// transaction and type when nobody waits on the record.
    pub(crate) fn rec_add_to_queue(
        &mut self,
        type_mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> LockId {
        let mut type_mode = type_mode.with(LockFlags::REC);
        if heap_no == PAGE_HEAP_NO_SUPREMUM {
            type_mode = type_mode.without(LockFlags::GAP | LockFlags::REC_NOT_GAP);
        }

        let page = block.id();
        let somebody_waits = self
            .page_locks(page)
            .into_iter()
            .any(|id| self.locks[id].is_wait() && self.locks[id].rec_bit(heap_no));

        if !somebody_waits && !type_mode.is_wait() {
            if let Some(similar) = self.rec_find_similar_on_page(type_mode, page, heap_no, trx) {
                self.rec_set_bit(similar, heap_no);
                return similar;
            }
        }
        self.rec_create(type_mode, block, heap_no, index, trx)
    }

    /// The common case: no lock on the page, or only one lock, of this
    /// transaction and type, with room for the bit.
    fn rec_lock_fast(
        &mut self,
        implicit: bool,
        mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> bool {
        let Some(first) = self.rec_first_on_page(block.id()) else {
            if !implicit {
                self.rec_create(mode, block, heap_no, index, trx);
            }
            return true;
        };
        if self.rec_next_on_page(first).is_some() {
            return false;
        }
        let lock = &self.locks[first];
        if lock.trx != trx
            || lock.type_mode != mode.with(LockFlags::REC)
            || lock.rec().n_bits() <= heap_no
        {
            return false;
        }
        if !implicit && !lock.rec_bit(heap_no) {
            self.rec_set_bit(first, heap_no);
        }
        true
    }

    fn rec_lock_slow(
        &mut self,
        implicit: bool,
        mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let page = block.id();
        if self.rec_has_expl(mode, page, heap_no, trx).is_some() {
            return Ok(LockStatus::Granted);
        }
        if self.rec_other_has_conflicting(mode, page, heap_no, trx).is_some() {
            return self.rec_enqueue_waiting(mode, block, heap_no, index, trx);
        }
        if !implicit {
            self.rec_add_to_queue(mode.with(LockFlags::REC), block, heap_no, index, trx);
        }
        Ok(LockStatus::Granted)
    }

    /// Locks a record for `trx`, or enqueues a waiting request.
    ///
    /// With `implicit`, an implicit lock is enough: no lock object is created
    /// unless the request has to wait.
    pub fn rec_lock(
        &mut self,
        implicit: bool,
        mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        if self.rec_lock_fast(implicit, mode, block, heap_no, index, trx) {
            return Ok(LockStatus::Granted);
        }
        self.rec_lock_slow(implicit, mode, block, heap_no, index, trx)
    }

    /// Enqueues a waiting record lock and runs deadlock detection.
    ///
    /// Returns `Granted` if resolving a deadlock among other transactions
    /// happened to grant the new request.
    pub(crate) fn rec_enqueue_waiting(
        &mut self,
        type_mode: TypeMode,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        if self.waits.is_stopped(trx) {
            error!(target: "lock", trx = %trx, "query thread stopped before a record lock wait");
            return Err(LockError::Suspended);
        }
        if self.trx_sys[trx].dict_operation != DictOp::None {
            warn!(
                target: "lock",
                trx = %trx,
                index = index.display_name(),
                table = index.table().name(),
                "a record lock wait happens in a dictionary operation"
            );
        }

        let lock = self.rec_create(type_mode.with(LockFlags::WAIT), block, heap_no, index, trx);

        if self.deadlock_occurs(lock, trx) {
            self.note_deadlock_victim(trx, lock);
            self.reset_lock_and_trx_wait(lock);
            self.rec_reset_bit(lock, heap_no);
            return Err(LockError::Deadlock);
        }

        if self.trx_sys[trx].wait_lock.is_none() {
            // A victim's cancellation granted this request.
            return Ok(LockStatus::Granted);
        }

        self.begin_lock_wait(trx);
        if self.config.print_waits {
            debug!(
                target: "lock",
                trx = %trx,
                space = block.space(),
                page_no = block.page_no(),
                heap_no,
                index = index.display_name(),
                "lock wait for record lock begins"
            );
        }
        Ok(LockStatus::Waiting)
    }

    pub(crate) fn begin_lock_wait(&mut self, trx: TrxId) {
        let t = &mut self.trx_sys[trx];
        t.que_state = QueState::LockWait;
        t.was_chosen_as_deadlock_victim = false;
        t.wait_started = Some(Instant::now());
    }

    /// Records the `(table, index)` of the lock a deadlock victim waited for.
    pub(crate) fn note_deadlock_victim(&mut self, trx: TrxId, lock: LockId) {
        let info = ErrorInfo {
            table: Arc::clone(self.locks[lock].table()),
            index: self.locks[lock].index().cloned(),
        };
        let t = &mut self.trx_sys[trx];
        t.error_state = ErrorCode::Deadlock;
        t.error_info = Some(info);
    }

    /// Returns true if a waiting record lock still has a conflicting lock
    /// ahead of it.
    pub(crate) fn rec_has_to_wait_in_queue(&self, wait_lock: LockId) -> bool {
        let wait = &self.locks[wait_lock];
        debug_assert!(wait.is_wait());
        let Some(heap_no) = wait.find_set_bit() else {
            return false;
        };
        let mut cur = self.rec_first_on_page(wait.rec().page);
        while let Some(id) = cur {
            if id == wait_lock {
                break;
            }
            let lock = &self.locks[id];
            if lock.rec_bit(heap_no) && wait.has_to_wait(lock) {
                return true;
            }
            cur = self.rec_next_on_page(id);
        }
        false
    }

    /// Grants a waiting lock and resumes its transaction.
    pub(crate) fn grant(&mut self, id: LockId) {
        self.reset_lock_and_trx_wait(id);
        let trx = self.locks[id].trx;
        if self.trx_sys[trx].que_state == QueState::LockWait {
            self.end_lock_wait(trx);
        }
    }

    /// Cancels a waiting record lock and resumes its transaction.
    pub(crate) fn rec_cancel(&mut self, id: LockId) {
        if let Some(heap_no) = self.locks[id].find_set_bit() {
            self.rec_reset_bit(id, heap_no);
        }
        self.reset_lock_and_trx_wait(id);
        let trx = self.locks[id].trx;
        self.end_lock_wait(trx);
    }

    /// Unlinks a record lock and grants the waiters on its page that no
    /// longer conflict with anything ahead of them.
    pub(crate) fn rec_dequeue_from_page(&mut self, id: LockId) {
        let trx = self.locks[id].trx;
        let page = self.locks[id].rec().page;
        self.rec_hash_remove(id);
        self.locks.remove::<TrxChain>(&mut self.trx_sys[trx].locks, id);

        for lock in self.page_locks(page) {
            if self.locks[lock].is_wait() && !self.rec_has_to_wait_in_queue(lock) {
                self.grant(lock);
            }
        }
    }

    /// Unlinks a record lock without waking anyone.
    pub(crate) fn rec_discard(&mut self, id: LockId) {
        let trx = self.locks[id].trx;
        self.rec_hash_remove(id);
        self.locks.remove::<TrxChain>(&mut self.trx_sys[trx].locks, id);
    }

    /// Discards every lock of a page that is being freed.
    pub(crate) fn rec_free_all_from_discard_page(&mut self, page: PageId) {
        for id in self.page_locks(page) {
            debug_assert!(self.locks[id].find_set_bit().is_none());
            debug_assert!(!self.locks[id].is_wait());
            self.rec_discard(id);
        }
    }

    /// Clears bit `heap_no` in every lock, cancelling waiting requests.
    pub(crate) fn rec_reset_and_release_wait(&mut self, page: PageId, heap_no: usize) {
        for id in self.bit_locks(page, heap_no) {
            if self.locks[id].is_wait() {
                self.rec_cancel(id);
            } else {
                self.rec_reset_bit(id, heap_no);
            }
        }
    }

    /// Releases the last granted lock of `trx` in `mode` on a record and
    /// grants waiters that can now proceed. Returns false if none is found.
    pub fn rec_unlock(&mut self, trx: TrxId, block: &Block, heap_no: usize, mode: LockMode) -> bool {
        let page = block.id();
        let mut release = None;
        let mut cur = self.rec_first(page, heap_no);
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx == trx && lock.mode() == mode {
                if lock.is_wait() {
                    self.fatal("unlock row found a waiting lock of the same transaction");
                }
                release = Some(id);
            }
            cur = self.rec_next(heap_no, id);
        }

        let Some(release) = release else {
            warn!(
                target: "lock",
                trx = %trx,
                "unlock row could not find a {mode} mode lock on the record"
            );
            return false;
        };
        self.rec_reset_bit(release, heap_no);

        for id in self.bit_locks(page, heap_no) {
            if self.locks[id].is_wait() && !self.rec_has_to_wait_in_queue(id) {
                self.grant(id);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::Table;
    use crate::lock::config::LockSysConfig;
    use crate::lock::wait::ThreadParker;
    use crate::trx::IsolationLevel;

    struct Fixture {
        kernel: Kernel,
        block: Block,
        index: Arc<Index>,
    }

    fn fixture() -> Fixture {
        let mut block = Block::new(0, 10);
        for key in ["a", "b", "c", "d", "e", "f"] {
            block.insert(key, TrxId(0));
        }
        let table = Table::new(1, "test/t1");
        Fixture {
            kernel: Kernel::new(LockSysConfig::default(), Arc::new(ThreadParker::new())),
            block,
            index: Index::clustered(1, "PRIMARY", &table),
        }
    }

    impl Fixture {
        fn begin(&mut self) -> TrxId {
            self.kernel.trx_sys.begin(IsolationLevel::RepeatableRead)
        }

        fn lock(&mut self, trx: TrxId, mode: TypeMode, heap_no: usize) -> Result<LockStatus, LockError> {
            self.kernel
                .rec_lock(false, mode, &self.block, heap_no, &self.index, trx)
        }
    }

    #[test]
    fn test_fast_path_reuses_lock() {
        let mut f = fixture();
        let t1 = f.begin();
        let s = LockMode::S | LockFlags::REC_NOT_GAP;
        assert_eq!(f.lock(t1, s, 2).unwrap(), LockStatus::Granted);
        assert_eq!(f.lock(t1, s, 3).unwrap(), LockStatus::Granted);

        let locks = f.kernel.page_locks(f.block.id());
        assert_eq!(locks.len(), 1);
        let lock = f.kernel.lock(locks[0]);
        assert!(lock.rec_bit(2) && lock.rec_bit(3));
        assert_eq!(f.kernel.trx_sys[t1].n_locks(), 1);
    }

    #[test]
    fn test_conflict_enqueues_wait() {
        let mut f = fixture();
        let t1 = f.begin();
        let t2 = f.begin();
        f.lock(t1, LockMode::X | LockFlags::REC_NOT_GAP, 4).unwrap();
        let status = f.lock(t2, LockMode::S | LockFlags::REC_NOT_GAP, 4).unwrap();
        assert_eq!(status, LockStatus::Waiting);

        let wait = f.kernel.trx_sys[t2].wait_lock().unwrap();
        let lock = f.kernel.lock(wait);
        assert!(lock.is_wait());
        assert_eq!(lock.find_set_bit(), Some(4));
        assert_eq!(f.kernel.trx_sys[t2].que_state(), QueState::LockWait);
        assert!(f.kernel.rec_has_to_wait_in_queue(wait));
    }

    #[test]
    fn test_implicit_creates_nothing() {
        let mut f = fixture();
        let t1 = f.begin();
        let x = LockMode::X | LockFlags::REC_NOT_GAP;
        let status = f
            .kernel
            .rec_lock(true, x, &f.block, 3, &f.index, t1)
            .unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert!(f.kernel.rec_first_on_page(f.block.id()).is_none());
    }

    #[test]
    fn test_stronger_lock_satisfies_request() {
        let mut f = fixture();
        let t1 = f.begin();
        let t2 = f.begin();
        f.lock(t2, LockMode::S | LockFlags::GAP, 5).unwrap();
        f.lock(t1, LockMode::X.into(), 5).unwrap();
        let before = f.kernel.trx_sys[t1].n_locks();
        f.lock(t1, LockMode::S | LockFlags::REC_NOT_GAP, 5).unwrap();
        assert_eq!(f.kernel.trx_sys[t1].n_locks(), before);
    }

    #[test]
    fn test_supremum_drops_gap_flags() {
        let mut f = fixture();
        let t1 = f.begin();
        f.lock(t1, LockMode::X | LockFlags::GAP, PAGE_HEAP_NO_SUPREMUM)
            .unwrap();
        let id = f.kernel.rec_first(f.block.id(), PAGE_HEAP_NO_SUPREMUM).unwrap();
        assert!(!f.kernel.lock(id).is_gap());
        assert_eq!(f.kernel.lock(id).mode(), LockMode::X);
    }

    #[test]
    fn test_unlock_grants_waiter() {
        let mut f = fixture();
        let t1 = f.begin();
        let t2 = f.begin();
        f.lock(t1, LockMode::S | LockFlags::REC_NOT_GAP, 2).unwrap();
        assert_eq!(
            f.lock(t2, LockMode::X | LockFlags::REC_NOT_GAP, 2).unwrap(),
            LockStatus::Waiting
        );
        assert!(f.kernel.rec_unlock(t1, &f.block, 2, LockMode::S));
        assert!(f.kernel.trx_sys[t2].wait_lock().is_none());
        assert_eq!(f.kernel.trx_sys[t2].que_state(), QueState::Running);

        assert!(!f.kernel.rec_unlock(t1, &f.block, 2, LockMode::S));
    }

    #[test]
    fn test_rec_prev() {
        let mut f = fixture();
        let t1 = f.begin();
        let t2 = f.begin();
        f.lock(t1, LockMode::S | LockFlags::REC_NOT_GAP, 3).unwrap();
        f.lock(t2, LockMode::S | LockFlags::REC_NOT_GAP, 3).unwrap();
        let locks = f.kernel.bit_locks(f.block.id(), 3);
        assert_eq!(locks.len(), 2);
        assert_eq!(f.kernel.rec_prev(locks[1], 3), Some(locks[0]));
        assert_eq!(f.kernel.rec_prev(locks[0], 3), None);
    }
}
