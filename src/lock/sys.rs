// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The lock system handle.

use std::fmt::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::dict::{Index, Table, TableId};
use crate::page::{Block, PageId, Rec};
use crate::trx::{ConcState, DictOp, ErrorInfo, IsolationLevel, QueState, ReadView, TrxId};

use super::config::LockSysConfig;
use super::error::{ErrorCode, LockError, LockStatus};
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode, OpFlags};
use super::row::{ImplicitCtx, NoRowVersions, RowVersions};
use super::visibility::{clust_rec_cons_read_sees, sec_rec_cons_read_sees};
use super::wait::{LockWaitHandler, ThreadParker};

/// The lock subsystem: every lock queue and the transaction registry behind
/// one kernel mutex.
///
/// All methods take the mutex for their duration, except the consistent
/// read checks, which callers run while holding a page latch. Methods that
/// can enqueue a wait return [`LockStatus::Waiting`]; the caller then drops
/// its page latches and calls [`LockSys::wait_for_grant`].
pub struct LockSys {
    pub(crate) kernel: Mutex<Kernel>,
    recovery: AtomicBool,
    versions: Arc<dyn RowVersions>,
}

impl LockSys {
    /// Creates a lock system whose waiters park their OS threads.
    pub fn create(config: LockSysConfig) -> Self {
        Self::with_handler(config, Arc::new(ThreadParker::new()))
    }

    /// Creates a lock system that suspends and resumes waiters through
    /// `waits`.
    pub fn with_handler(config: LockSysConfig, waits: Arc<dyn LockWaitHandler>) -> Self {
        let kernel = Kernel::new(config, waits);
        info!(
            target: "lock",
            n_cells = kernel.rec_hash.n_cells(),
            max_depth = kernel.config.max_depth,
            max_steps = kernel.config.max_steps,
            "lock system created"
        );
        Self {
            kernel: Mutex::new(kernel),
            recovery: AtomicBool::new(false),
            versions: Arc::new(NoRowVersions),
        }
    }

    /// Sets where implicit locks on secondary index records are looked up.
    pub fn with_row_versions(mut self, versions: Arc<dyn RowVersions>) -> Self {
        self.versions = versions;
        self
    }

    /// Shuts the lock system down.
    pub fn close(self) {
        let kernel = self.kernel.into_inner();
        info!(
            target: "lock",
            live_locks = kernel.locks.live(),
            transactions = kernel.trx_sys.client_list().count(),
            "lock system closed"
        );
    }

    /// Enters the kernel mutex.
    #[inline]
    pub fn kernel(&self) -> MutexGuard<'_, Kernel> {
        self.kernel.lock()
    }

    /// Marks whether crash recovery is replaying the log. Page watermarks
    /// are not trusted while it is.
    pub fn set_recovery(&self, on: bool) {
        self.recovery.store(on, Ordering::Release);
    }

    #[inline]
    pub fn is_recovery(&self) -> bool {
        self.recovery.load(Ordering::Acquire)
    }

    fn ctx(&self) -> ImplicitCtx<'_> {
        ImplicitCtx {
            recovery: self.is_recovery(),
            versions: self.versions.as_ref(),
        }
    }

    // ---------------------------------------------------------------------
    // transactions

    /// Creates and starts a transaction.
    pub fn trx_begin(&self, isolation: IsolationLevel) -> TrxId {
        self.kernel().trx_sys.begin(isolation)
    }

    /// Creates a transaction handle that is not started yet.
    pub fn trx_create(&self, isolation: IsolationLevel) -> TrxId {
        self.kernel().trx_sys.create(isolation)
    }

    pub fn trx_start(&self, trx: TrxId) -> Result<(), LockError> {
        self.kernel().trx_sys.start(trx)
    }

    pub fn trx_prepare(&self, trx: TrxId) -> Result<(), LockError> {
        self.kernel().trx_sys.prepare(trx)
    }

    /// Adds `n` undo records to the rollback cost of `trx`.
    pub fn trx_add_undo(&self, trx: TrxId, n: u64) {
        self.kernel().trx_sys.add_undo(trx, n);
    }

    /// Opens, or returns, the consistent read view of `trx`.
    pub fn open_read_view(&self, trx: TrxId) -> Option<ReadView> {
        self.kernel().trx_sys.open_read_view(trx).cloned()
    }

    /// Drops the read view of `trx`; the next consistent read opens a fresh
    /// one, as read committed does per statement.
    pub fn close_read_view(&self, trx: TrxId) {
        self.kernel().trx_sys.close_read_view(trx);
    }

    /// Marks `trx` as running a dictionary operation. Lock waits in such a
    /// transaction are logged.
    pub fn trx_set_dict_operation(&self, trx: TrxId, op: DictOp) {
        self.kernel().trx_sys.set_dict_operation(trx, op);
    }

    /// Commits `trx`: releases all of its locks and takes it off the list of
    /// started transactions.
    pub fn commit(&self, trx: TrxId) -> Result<(), LockError> {
        let mut kernel = self.kernel();
        let t = kernel.trx_sys.get_on_id(trx).ok_or(LockError::UnknownTrx(trx))?;
        if t.wait_lock().is_some() {
            return Err(LockError::Generic(format!(
                "transaction {trx} cannot commit while waiting for a lock"
            )));
        }
        kernel.trx_sys[trx].conc_state = ConcState::CommittedInMemory;
        Kernel::release_off_kernel(&mut kernel, trx);
        kernel.trx_sys.finish(trx);
        kernel.waits.forget(trx);
        Ok(())
    }

    /// Rolls back `trx`: cancels its lock wait, if any, releases all of its
    /// locks and takes it off the list of started transactions.
    pub fn rollback(&self, trx: TrxId) -> Result<(), LockError> {
        let mut kernel = self.kernel();
        let t = kernel.trx_sys.get_on_id(trx).ok_or(LockError::UnknownTrx(trx))?;
        if let Some(wait_lock) = t.wait_lock() {
            kernel.cancel_waiting_and_release(wait_lock);
        }
        kernel.trx_sys[trx].que_state = QueState::RollingBack;
        Kernel::release_off_kernel(&mut kernel, trx);
        kernel.trx_sys.finish(trx);
        kernel.waits.forget(trx);
        Ok(())
    }

    /// Drops a transaction handle that is not started.
    pub fn trx_free(&self, trx: TrxId) -> Result<(), LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.free(trx)?;
        kernel.waits.forget(trx);
        Ok(())
    }

    /// Blocks until the lock `trx` waits for is granted or the wait ends
    /// otherwise. Returns immediately if `trx` is not waiting.
    ///
    /// On timeout or interrupt the waiting lock is cancelled before the
    /// error is returned.
    pub fn wait_for_grant(&self, trx: TrxId, timeout: Option<Duration>) -> Result<(), LockError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let waits = {
                let mut kernel = self.kernel();
                let t = kernel.trx_sys.get(trx).ok_or(LockError::UnknownTrx(trx))?;
                let (que_state, victim, wait_lock) =
                    (t.que_state(), t.was_chosen_as_deadlock_victim(), t.wait_lock());

                if que_state != QueState::LockWait {
                    // A grant that landed before we parked left its token.
                    kernel.waits.forget(trx);
                    return if victim {
                        Err(LockError::Deadlock)
                    } else {
                        Ok(())
                    };
                }
                if kernel.waits.is_interrupted(trx) {
                    if let Some(wait_lock) = wait_lock {
                        kernel.cancel_waiting_and_release(wait_lock);
                    }
                    kernel.trx_sys[trx].error_state = ErrorCode::Interrupted;
                    kernel.waits.forget(trx);
                    return Err(LockError::Interrupted);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    if let Some(wait_lock) = wait_lock {
                        kernel.cancel_waiting_and_release(wait_lock);
                    }
                    kernel.trx_sys[trx].error_state = ErrorCode::LockWaitTimeout;
                    kernel.waits.forget(trx);
                    return Err(LockError::WaitTimeout);
                }
                Arc::clone(&kernel.waits)
            };
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            waits.park(trx, remaining);
        }
    }

    /// Cancels the lock wait of `trx`. Returns false if it was not waiting.
    pub fn cancel_waiting(&self, trx: TrxId) -> bool {
        let mut kernel = self.kernel();
        let wait_lock = kernel.trx_sys.get(trx).and_then(|t| t.wait_lock());
        match wait_lock {
            Some(wait_lock) => {
                kernel.cancel_waiting_and_release(wait_lock);
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // lock requests

    /// Locks a table, or enqueues a waiting request.
    #[instrument(level = "trace", skip(self, table), fields(table = table.name()))]
    pub fn lock_table(
        &self,
        flags: OpFlags,
        table: &Arc<Table>,
        mode: LockMode,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.lock_table(flags, table, mode, trx)
    }

    /// Checks for a conflicting gap lock before inserting a record after
    /// `rec_heap_no`. The flag tells whether the new record must inherit
    /// gap locks from its successor once inserted.
    #[instrument(level = "trace", skip(self, block, index), fields(page = %block.id(), index = index.name()))]
    pub fn rec_insert_check_and_lock(
        &self,
        flags: OpFlags,
        block: &mut Block,
        rec_heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<(LockStatus, bool), LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.rec_insert_check_and_lock(flags, block, rec_heap_no, index, trx)
    }

    /// Locks a clustered index record that is about to be modified.
    #[instrument(level = "trace", skip(self, block, index), fields(page = %block.id(), index = index.name()))]
    pub fn clust_rec_modify_check_and_lock(
        &self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.clust_rec_modify_check_and_lock(flags, block, heap_no, index, trx, self.ctx())
    }

    /// Locks a secondary index record that is about to be delete-marked.
    #[instrument(level = "trace", skip(self, block, index), fields(page = %block.id(), index = index.name()))]
    pub fn sec_rec_modify_check_and_lock(
        &self,
        flags: OpFlags,
        block: &mut Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.sec_rec_modify_check_and_lock(flags, block, heap_no, index, trx)
    }

    /// Locks a secondary index record for a locking read. `gap_mode` is one
    /// of `ORDINARY`, `GAP` or `REC_NOT_GAP`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "trace", skip(self, block, index), fields(page = %block.id(), index = index.name()))]
    pub fn sec_rec_read_check_and_lock(
        &self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        mode: LockMode,
        gap_mode: LockFlags,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.sec_rec_read_check_and_lock(
            flags,
            block,
            heap_no,
            index,
            mode,
            gap_mode,
            trx,
            self.ctx(),
        )
    }

    /// Locks a clustered index record for a locking read. `gap_mode` is one
    /// of `ORDINARY`, `GAP` or `REC_NOT_GAP`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "trace", skip(self, block, index), fields(page = %block.id(), index = index.name()))]
    pub fn clust_rec_read_check_and_lock(
        &self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        mode: LockMode,
        gap_mode: LockFlags,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.clust_rec_read_check_and_lock(
            flags,
            block,
            heap_no,
            index,
            mode,
            gap_mode,
            trx,
            self.ctx(),
        )
    }

    /// Locks a record directly, without implicit lock conversion.
    pub fn rec_lock(
        &self,
        mode: LockMode,
        gap_mode: LockFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        let mut kernel = self.kernel();
        kernel.trx_sys.try_get(trx)?;
        kernel.rec_lock(false, mode | gap_mode, block, heap_no, index, trx)
    }

    /// Releases a record lock early, as semi-consistent reads do for rows
    /// that did not match.
    pub fn rec_unlock(&self, trx: TrxId, block: &Block, heap_no: usize, mode: LockMode) -> bool {
        self.kernel().rec_unlock(trx, block, heap_no, mode)
    }

    /// Removes the locks on a table and its records when it is dropped or
    /// truncated.
    pub fn remove_all_on_table(&self, table: TableId, remove_sx: bool) {
        self.kernel().remove_all_on_table(table, remove_sx);
    }

    // ---------------------------------------------------------------------
    // page events

    pub fn update_split_right(&self, right_block: &Block, left_block: &Block) {
        self.kernel().update_split_right(right_block, left_block);
    }

    pub fn update_split_left(&self, right_block: &Block, left_block: &Block) {
        self.kernel().update_split_left(right_block, left_block);
    }

    pub fn update_merge_right(&self, right_block: &Block, orig_succ_heap_no: usize, left_block: &Block) {
        self.kernel()
            .update_merge_right(right_block, orig_succ_heap_no, left_block);
    }

    pub fn update_merge_left(&self, left_block: &Block, orig_pred_heap_no: usize, right_block: &Block) {
        self.kernel()
            .update_merge_left(left_block, orig_pred_heap_no, right_block);
    }

    pub fn update_root_raise(&self, block: &Block, root: &Block) {
        self.kernel().update_root_raise(block, root);
    }

    pub fn update_copy_and_discard(&self, new_block: &Block, block: &Block) {
        self.kernel().update_copy_and_discard(new_block, block);
    }

    pub fn update_discard(&self, heir_block: &Block, heir_heap_no: usize, block: &Block) {
        self.kernel().update_discard(heir_block, heir_heap_no, block);
    }

    pub fn rec_reset_and_inherit_gap_locks(
        &self,
        heir_block: &Block,
        block: &Block,
        heir_heap_no: usize,
        heap_no: usize,
    ) {
        self.kernel()
            .rec_reset_and_inherit_gap_locks(heir_block, block, heir_heap_no, heap_no);
    }

    pub fn update_insert(&self, block: &Block, heap_no: usize) {
        self.kernel().update_insert(block, heap_no);
    }

    pub fn update_delete(&self, block: &Block, heap_no: usize) {
        self.kernel().update_delete(block, heap_no);
    }

    pub fn move_reorganize_page(&self, block: &Block, oblock: &Block) {
        self.kernel().move_reorganize_page(block, oblock);
    }

    pub fn move_rec_list_end(&self, new_block: &Block, block: &Block, rec_heap_no: usize) {
        self.kernel().move_rec_list_end(new_block, block, rec_heap_no);
    }

    pub fn move_rec_list_start(&self, new_block: &Block, block: &Block, rec_heap_no: usize, old_end_heap_no: usize) {
        self.kernel()
            .move_rec_list_start(new_block, block, rec_heap_no, old_end_heap_no);
    }

    pub fn rec_store_on_page_infimum(&self, block: &Block, heap_no: usize) {
        self.kernel().rec_store_on_page_infimum(block, heap_no);
    }

    pub fn rec_restore_from_page_infimum(&self, block: &Block, heap_no: usize, donator: &Block) {
        self.kernel()
            .rec_restore_from_page_infimum(block, heap_no, donator);
    }

    // ---------------------------------------------------------------------
    // queries

    /// Returns true if the clustered record version is visible in `view`.
    /// Does not take the kernel mutex.
    #[inline]
    pub fn clust_rec_cons_read_sees(&self, rec: &Rec, view: &ReadView) -> bool {
        clust_rec_cons_read_sees(rec, view)
    }

    /// Returns true if the secondary record is known to be visible in
    /// `view`. Does not take the kernel mutex.
    #[inline]
    pub fn sec_rec_cons_read_sees(&self, block: &Block, view: &ReadView) -> bool {
        sec_rec_cons_read_sees(block, view, self.is_recovery())
    }

    pub fn get_src_table(&self, trx: TrxId, dest: &Arc<Table>) -> Option<(Arc<Table>, Option<LockMode>)> {
        self.kernel().get_src_table(trx, dest)
    }

    pub fn is_table_exclusive(&self, table: TableId, trx: TrxId) -> bool {
        self.kernel().is_table_exclusive(table, trx)
    }

    pub fn number_of_rows_locked(&self, trx: TrxId) -> usize {
        self.kernel().number_of_rows_locked(trx)
    }

    pub fn rec_expl_exist_on_page(&self, page: PageId) -> bool {
        self.kernel().rec_expl_exist_on_page(page)
    }

    /// Returns the `(table, index)` of the lock `trx` waited for when it was
    /// chosen as a deadlock victim.
    pub fn deadlock_info(&self, trx: TrxId) -> Option<ErrorInfo> {
        self.kernel().trx_sys.deadlock_info(trx).cloned()
    }

    /// Returns the `(table, index)` of the last duplicate key error of `trx`.
    pub fn duplicate_key(&self, trx: TrxId) -> Option<ErrorInfo> {
        self.kernel().trx_sys.duplicate_key(trx).cloned()
    }

    pub fn set_duplicate_key(&self, trx: TrxId, table: &Arc<Table>, index: &Arc<Index>) {
        self.kernel().trx_sys.set_duplicate_key(trx, table, index);
    }

    /// Returns the report of the most recent deadlock.
    pub fn latest_deadlock(&self) -> String {
        self.kernel().latest_deadlock.clone()
    }

    // ---------------------------------------------------------------------
    // diagnostics

    /// Checks every lock queue.
    pub fn validate(&self) -> Result<(), LockError> {
        self.kernel().validate()
    }

    /// Writes the transaction section header of the monitor output. With
    /// `nowait`, gives up if the kernel mutex is busy and returns false.
    pub fn print_info_summary(&self, out: &mut impl Write, nowait: bool) -> Result<bool, fmt::Error> {
        let kernel = if nowait {
            match self.kernel.try_lock() {
                Some(kernel) => kernel,
                None => {
                    out.write_str("FAIL TO OBTAIN KERNEL MUTEX, SKIP LOCK INFO PRINTING\n")?;
                    return Ok(false);
                }
            }
        } else {
            self.kernel()
        };
        kernel.print_info_summary(out)?;
        Ok(true)
    }

    /// Writes every transaction and, with the lock monitor on, its locks.
    pub fn print_info_all_transactions(&self, out: &mut impl Write) -> fmt::Result {
        self.kernel().print_info_all_transactions(out)
    }
}

impl Default for LockSys {
    fn default() -> Self {
        Self::create(LockSysConfig::default())
    }
}
