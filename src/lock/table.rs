// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Table lock queues.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::dict::{Table, TableId};
use crate::trx::{DictOp, TrxId};

use super::arena::{TableChain, TrxChain};
use super::error::{LockError, LockStatus};
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode, OpFlags, TypeMode};
use super::object::{Lock, LockId, LockKind, TableLock};

impl Kernel {
    /// Creates a table lock at the tail of the table's queue.
    pub(crate) fn table_create(&mut self, table: &Arc<Table>, type_mode: TypeMode, trx: TrxId) -> LockId {
        let id = self.locks.alloc(Lock {
            trx,
            type_mode: type_mode.with(LockFlags::TABLE).without(LockFlags::WAIT),
            trx_link: Default::default(),
            kind: LockKind::Table(TableLock {
                table: Arc::clone(table),
                link: Default::default(),
            }),
        });

        let owner = &mut self.trx_sys[trx];
        owner.lock_heap.push(id);
        self.locks.push_back::<TrxChain>(&mut owner.locks, id);

        let queue = self.tables.entry(table.id()).or_default();
        self.locks.push_back::<TableChain>(queue, id);

        if type_mode.is_wait() {
            self.set_lock_and_trx_wait(id);
        }
        id
    }

    /// Unlinks a table lock from its transaction and table without waking
    /// anyone.
    pub(crate) fn table_remove_low(&mut self, id: LockId) {
        let trx = self.locks[id].trx;
        let table = self.locks[id].table_id();
        self.locks.remove::<TrxChain>(&mut self.trx_sys[trx].locks, id);

        let now_empty = match self.tables.get_mut(&table) {
            Some(queue) => {
                self.locks.remove::<TableChain>(queue, id);
                queue.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.tables.remove(&table);
        }
    }

    /// Enqueues a waiting table lock and runs deadlock detection.
    pub(crate) fn table_enqueue_waiting(
        &mut self,
        mode: LockMode,
        table: &Arc<Table>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        if self.waits.is_stopped(trx) {
            error!(target: "lock", trx = %trx, table = table.name(), "query thread stopped before a table lock wait");
            return Err(LockError::Suspended);
        }
        if self.trx_sys[trx].dict_operation != DictOp::None {
            warn!(
                target: "lock",
                trx = %trx,
                table = table.name(),
                "a table lock wait happens in a dictionary operation"
            );
        }

        let lock = self.table_create(table, mode | LockFlags::WAIT, trx);

        if self.deadlock_occurs(lock, trx) {
            self.note_deadlock_victim(trx, lock);
            self.table_remove_low(lock);
            self.reset_lock_and_trx_wait(lock);
            return Err(LockError::Deadlock);
        }

        if self.trx_sys[trx].wait_lock.is_none() {
            // A victim's cancellation granted this request.
            return Ok(LockStatus::Granted);
        }

        self.begin_lock_wait(trx);
        if self.config.print_waits {
            debug!(target: "lock", trx = %trx, table = table.name(), %mode, "lock wait for table lock begins");
        }
        Ok(LockStatus::Waiting)
    }

    /// Returns true if `trx` holds a lock on the table at least as strong as
    /// `mode`. Searches from the tail, where stronger locks tend to be.
    pub(crate) fn table_has(&self, trx: TrxId, table: TableId, mode: LockMode) -> bool {
        let mut cur = self.table_queue(table).last();
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx == trx && lock.mode().is_stronger_or_eq(mode) {
                debug_assert!(!lock.is_wait());
                return true;
            }
            cur = self.table_prev(id);
        }
        false
    }

    /// Returns a lock of another transaction on the table that is
    /// incompatible with `mode`. Waiting locks count only with `wait`.
    pub(crate) fn table_other_has_incompatible(
        &self,
        trx: TrxId,
        wait: bool,
        table: TableId,
        mode: LockMode,
    ) -> Option<LockId> {
        let mut cur = self.table_queue(table).last();
        while let Some(id) = cur {
            let lock = &self.locks[id];
            if lock.trx != trx && !lock.mode().is_compatible(mode) && (wait || !lock.is_wait()) {
                return Some(id);
            }
            cur = self.table_prev(id);
        }
        None
    }

    /// Locks a table in `mode` for `trx`, or enqueues a waiting request.
    pub fn lock_table(
        &mut self,
        flags: OpFlags,
        table: &Arc<Table>,
        mode: LockMode,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        if flags.no_locking() {
            return Ok(LockStatus::Granted);
        }
        if self.table_has(trx, table.id(), mode) {
            return Ok(LockStatus::Granted);
        }
        if self
            .table_other_has_incompatible(trx, true, table.id(), mode)
            .is_some()
        {
            return self.table_enqueue_waiting(mode, table, trx);
        }
        self.table_create(table, mode.into(), trx);
        Ok(LockStatus::Granted)
    }

    /// Returns true if a waiting table lock has an incompatible lock ahead
    /// of it.
    pub(crate) fn table_has_to_wait_in_queue(&self, wait_lock: LockId) -> bool {
        let wait = &self.locks[wait_lock];
        debug_assert!(wait.is_wait());
        let mut cur = self.table_queue(wait.table_id()).first();
        while let Some(id) = cur {
            if id == wait_lock {
                break;
            }
            if wait.has_to_wait(&self.locks[id]) {
                return true;
            }
            cur = self.table_next(id);
        }
        false
    }

    /// Removes a table lock and grants the waiters behind it that no longer
    /// have to wait.
    pub(crate) fn table_dequeue(&mut self, id: LockId) {
        debug_assert!(self.locks[id].is_table());
        let mut cur = self.table_next(id);
        self.table_remove_low(id);

        while let Some(lock) = cur {
            if self.locks[lock].is_wait() && !self.table_has_to_wait_in_queue(lock) {
                self.grant(lock);
            }
            cur = self.table_next(lock);
        }
    }

    /// Finds the table `trx` is copying rows from into `dest`, for
    /// `ALTER TABLE`-style copies.
    ///
    /// Returns `None` when the transaction locks more than one other table,
    /// the source table is locked by anyone else, or the source carries both
    /// IS and IX. Returns `dest` itself when no other table is locked. The
    /// mode is the IS or IX lock found on the source, if any.
    pub fn get_src_table(&self, trx: TrxId, dest: &Arc<Table>) -> Option<(Arc<Table>, Option<LockMode>)> {
        let mut src: Option<Arc<Table>> = None;
        let mut mode = None;

        for id in self.trx_locks(trx) {
            let lock = &self.locks[id];
            if !lock.is_table() || lock.table_id() == dest.id() {
                continue;
            }
            match &src {
                None => {
                    let queue = self.table_queue(lock.table_id());
                    if queue.len() != 1 || queue.first() != Some(id) {
                        return None;
                    }
                    src = Some(Arc::clone(lock.table()));
                }
                Some(table) if table.id() != lock.table_id() => return None,
                Some(_) => {}
            }
            if matches!(lock.mode(), LockMode::IX | LockMode::IS) {
                if mode.is_some_and(|m| m != lock.mode()) {
                    return None;
                }
                mode = Some(lock.mode());
            }
        }

        Some((src.unwrap_or_else(|| Arc::clone(dest)), mode))
    }

    /// Returns true if `trx` is the only transaction locking `table` and
    /// holds it in IX, possibly with an AUTO_INC lock besides.
    pub fn is_table_exclusive(&self, table: TableId, trx: TrxId) -> bool {
        let mut ok = false;
        for id in self.table_locks(table) {
            let lock = &self.locks[id];
            if lock.trx != trx {
                return false;
            }
            match lock.mode() {
                LockMode::IX => ok = true,
                LockMode::AutoInc => {}
                _ => return false,
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::config::LockSysConfig;
    use crate::lock::wait::ThreadParker;
    use crate::trx::{IsolationLevel, QueState};

    fn kernel() -> Kernel {
        Kernel::new(LockSysConfig::default(), Arc::new(ThreadParker::new()))
    }

    #[test]
    fn test_compatible_intentions_granted() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap(),
            LockStatus::Granted
        );
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::IS, t2).unwrap(),
            LockStatus::Granted
        );
        assert_eq!(k.table_queue(table.id()).len(), 2);
    }

    #[test]
    fn test_already_held_is_reused() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::X, t1).unwrap();
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        assert_eq!(k.table_queue(table.id()).len(), 1);
        assert_eq!(k.trx_sys[t1].n_locks(), 1);
    }

    #[test]
    fn test_no_locking_flag() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let status = k
            .lock_table(OpFlags::NO_LOCKING, &table, LockMode::X, t1)
            .unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert!(k.table_queue(table.id()).is_empty());
    }

    #[test]
    fn test_dequeue_grants_waiters_in_order() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t3 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::X, t1).unwrap();
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::IS, t2).unwrap(),
            LockStatus::Waiting
        );
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::IX, t3).unwrap(),
            LockStatus::Waiting
        );

        let held = k.table_queue(table.id()).first().unwrap();
        k.table_dequeue(held);

        for trx in [t2, t3] {
            assert!(k.trx_sys[trx].wait_lock().is_none());
            assert_eq!(k.trx_sys[trx].que_state(), QueState::Running);
        }
        assert_eq!(k.table_queue(table.id()).len(), 2);
    }

    #[test]
    fn test_waiter_blocks_later_incompatible_request() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t3 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::IS, t1).unwrap();
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::X, t2).unwrap(),
            LockStatus::Waiting
        );
        // IX is compatible with the granted IS but not with the waiting X.
        assert_eq!(
            k.lock_table(OpFlags::NONE, &table, LockMode::IX, t3).unwrap(),
            LockStatus::Waiting
        );
        assert!(k
            .table_other_has_incompatible(t3, false, table.id(), LockMode::IX)
            .is_none());
    }

    #[test]
    fn test_get_src_table() {
        let mut k = kernel();
        let src = Table::new(1, "test/src");
        let dest = Table::new(2, "test/dest");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);

        let (found, mode) = k.get_src_table(t1, &dest).unwrap();
        assert_eq!(found.id(), dest.id());
        assert_eq!(mode, None);

        k.lock_table(OpFlags::NONE, &dest, LockMode::X, t1).unwrap();
        k.lock_table(OpFlags::NONE, &src, LockMode::IS, t1).unwrap();
        let (found, mode) = k.get_src_table(t1, &dest).unwrap();
        assert_eq!(found.id(), src.id());
        assert_eq!(mode, Some(LockMode::IS));

        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &src, LockMode::IS, t2).unwrap();
        assert!(k.get_src_table(t1, &dest).is_none());
    }

    #[test]
    fn test_is_table_exclusive() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        assert!(!k.is_table_exclusive(table.id(), t1));

        k.lock_table(OpFlags::NONE, &table, LockMode::AutoInc, t1).unwrap();
        assert!(!k.is_table_exclusive(table.id(), t1));
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        assert!(k.is_table_exclusive(table.id(), t1));

        k.lock_table(OpFlags::NONE, &table, LockMode::IS, t2).unwrap();
        assert!(!k.is_table_exclusive(table.id(), t1));
    }
}
