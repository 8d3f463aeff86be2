// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Consistency checks over the lock queues.

use std::collections::BTreeSet;

use crate::dict::{Index, TableId};
use crate::page::{Block, PageId, PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_USER_LOW};
use crate::trx::{ConcState, TrxId};

use super::error::LockError;
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode};
use super::object::LockId;

impl Kernel {
    /// Checks that the owner of a lock is started and registered.
    fn validate_owner(&self, id: LockId) -> Result<(), LockError> {
        let trx = self.locks[id].trx;
        let Some(t) = self.trx_sys.get_on_id(trx) else {
            return Err(LockError::invariant(format!(
                "lock {id} belongs to transaction {trx}, which is not started"
            )));
        };
        match t.conc_state() {
            ConcState::Active | ConcState::Prepared | ConcState::CommittedInMemory => Ok(()),
            ConcState::NotStarted => Err(LockError::invariant(format!(
                "lock {id} belongs to transaction {trx}, which is not started"
            ))),
        }
    }

    /// Checks that granted table locks are compatible with every other
    /// granted lock, and that waiting ones really have to wait.
    pub fn table_queue_validate(&self, table: TableId) -> Result<(), LockError> {
        for id in self.table_locks(table) {
            self.validate_owner(id)?;
            let lock = &self.locks[id];
            if !lock.is_wait() {
                if let Some(other) = self.table_other_has_incompatible(lock.trx, false, table, lock.mode()) {
                    return Err(LockError::invariant(format!(
                        "granted table lock {id} conflicts with granted lock {other}"
                    )));
                }
            } else if !self.table_has_to_wait_in_queue(id) {
                return Err(LockError::invariant(format!(
                    "table lock {id} is waiting with nothing to wait for"
                )));
            }
        }
        Ok(())
    }

    /// Checks the explicit locks on one record.
    fn rec_queue_validate_locks(
        &self,
        page: PageId,
        heap_no: usize,
        index: Option<&Index>,
    ) -> Result<(), LockError> {
        let user_rec = heap_no >= PAGE_HEAP_NO_USER_LOW;
        for id in self.bit_locks(page, heap_no) {
            self.validate_owner(id)?;
            let lock = &self.locks[id];
            if let Some(index) = index {
                if lock.rec().index.id() != index.id() {
                    return Err(LockError::invariant(format!(
                        "lock {id} on {page} heap no {heap_no} is on index {}, expected {}",
                        lock.rec().index.name(),
                        index.name()
                    )));
                }
            }

            if !user_rec {
                if lock.is_wait() && !self.rec_has_to_wait_in_queue(id) {
                    return Err(LockError::invariant(format!(
                        "record lock {id} is waiting with nothing to wait for"
                    )));
                }
                continue;
            }

            if !lock.is_gap() && !lock.is_wait() {
                let conflicting = match lock.mode() {
                    LockMode::S => LockMode::X,
                    _ => LockMode::S,
                };
                if let Some(other) =
                    self.rec_other_has_expl_req(conflicting, false, false, page, heap_no, lock.trx)
                {
                    return Err(LockError::invariant(format!(
                        "granted record lock {id} conflicts with granted lock {other} on heap no {heap_no}"
                    )));
                }
            } else if lock.is_wait() && !lock.is_gap() && !self.rec_has_to_wait_in_queue(id) {
                return Err(LockError::invariant(format!(
                    "record lock {id} is waiting with nothing to wait for"
                )));
            }
        }
        Ok(())
    }

    /// Checks the lock queue of one record.
    ///
    /// On a clustered index record modified by an active transaction that
    /// others wait for, the modifier must hold an explicit lock. The same
    /// rule is not checked for secondary indexes: a transaction may update a
    /// clustered record and then legitimately wait on a secondary one.
    pub fn rec_queue_validate(&self, block: &Block, heap_no: usize, index: Option<&Index>) -> Result<(), LockError> {
        let page = block.id();
        if block.is_user_rec(heap_no) && index.is_some_and(Index::is_clustered) {
            if let Some(impl_trx) = self.clust_rec_some_has_impl(block, heap_no) {
                self.validate_implicit_holder(page, heap_no, impl_trx)?;
            }
        }
        self.rec_queue_validate_locks(page, heap_no, index)
    }

    fn validate_implicit_holder(&self, page: PageId, heap_no: usize, impl_trx: TrxId) -> Result<(), LockError> {
        let waited_on = self
            .rec_other_has_expl_req(LockMode::S, false, true, page, heap_no, impl_trx)
            .is_some();
        let x_rec = LockMode::X | LockFlags::REC_NOT_GAP;
        if waited_on && self.rec_has_expl(x_rec, page, heap_no, impl_trx).is_none() {
            return Err(LockError::invariant(format!(
                "transaction {impl_trx} holds an implicit lock on {page} heap no {heap_no} that others wait for"
            )));
        }
        Ok(())
    }

    /// Checks every record queue on a page that has a lock bit set, plus the
    /// supremum.
    pub fn rec_validate_page(&self, block: &Block) -> Result<(), LockError> {
        for id in self.page_locks(block.id()) {
            self.validate_owner(id)?;
            let rec = self.locks[id].rec();
            for heap_no in 0..rec.n_bits() {
                if heap_no != PAGE_HEAP_NO_SUPREMUM && !rec.bitmap.get(heap_no) {
                    continue;
                }
                if block.rec(heap_no).is_none() {
                    return Err(LockError::invariant(format!(
                        "lock {id} covers heap no {heap_no}, which is not on {}",
                        block.id()
                    )));
                }
                self.rec_queue_validate(block, heap_no, Some(&rec.index))?;
            }
        }
        Ok(())
    }

    /// Checks every table queue reachable from a started transaction and
    /// every record queue in the hash.
    pub fn validate(&self) -> Result<(), LockError> {
        let mut tables = BTreeSet::new();
        for trx in self.trx_sys.trx_list() {
            for id in self.trx_locks(trx) {
                let lock = &self.locks[id];
                if lock.is_table() {
                    tables.insert(lock.table_id());
                }
            }
        }
        for table in tables {
            self.table_queue_validate(table)?;
        }

        let mut pages = BTreeSet::new();
        for cell in 0..self.rec_hash.n_cells() {
            let mut cur = self.rec_hash.head(cell);
            while let Some(id) = cur {
                let rec = self.locks[id].rec();
                pages.insert(rec.page);
                cur = rec.hash_next;
            }
        }
        for page in pages {
            for id in self.page_locks(page) {
                self.validate_owner(id)?;
                for heap_no in self.locks[id].rec().bitmap.iter_ones() {
                    self.rec_queue_validate_locks(page, heap_no, None)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dict::Table;
    use crate::lock::config::LockSysConfig;
    use crate::lock::error::LockStatus;
    use crate::lock::mode::OpFlags;
    use crate::lock::wait::ThreadParker;
    use crate::trx::IsolationLevel;

    struct Fixture {
        k: Kernel,
        table: Arc<Table>,
        index: Arc<Index>,
        block: Block,
    }

    fn fixture() -> Fixture {
        let table = Table::new(1, "test/t1");
        let index = Index::clustered(1, "PRIMARY", &table);
        let mut block = Block::new(0, 10);
        for key in ["a", "b", "c"] {
            block.insert(key, TrxId(0));
        }
        Fixture {
            k: Kernel::new(LockSysConfig::default(), Arc::new(ThreadParker::new())),
            table,
            index,
            block,
        }
    }

    #[test]
    fn test_valid_queues() {
        let Fixture {
            mut k,
            table,
            index,
            block,
        } = fixture();
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t2).unwrap();
        k.rec_lock(false, LockMode::X.into(), &block, 2, &index, t1)
            .unwrap();
        let status = k
            .rec_lock(false, LockMode::S | LockFlags::REC_NOT_GAP, &block, 2, &index, t2)
            .unwrap();
        assert_eq!(status, LockStatus::Waiting);

        k.validate().unwrap();
        k.rec_validate_page(&block).unwrap();
        k.table_queue_validate(table.id()).unwrap();
    }

    #[test]
    fn test_conflicting_granted_record_locks() {
        let Fixture {
            mut k, index, block, ..
        } = fixture();
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.rec_lock(false, LockMode::X | LockFlags::REC_NOT_GAP, &block, 3, &index, t1)
            .unwrap();
        // Bypass the queue to plant a conflicting grant.
        k.rec_create(LockMode::S | LockFlags::REC_NOT_GAP, &block, 3, &index, t2);

        assert!(matches!(k.validate(), Err(LockError::Invariant { .. })));
        assert!(k.rec_queue_validate(&block, 3, Some(&index)).is_err());
    }

    #[test]
    fn test_conflicting_granted_table_locks() {
        let Fixture { mut k, table, .. } = fixture();
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::X, t1).unwrap();
        k.table_create(&table, LockMode::IS.into(), t2);
        assert!(k.table_queue_validate(table.id()).is_err());
        assert!(k.validate().is_err());
    }

    #[test]
    fn test_implicit_holder_needs_explicit_lock() {
        let x_rec = LockMode::X | LockFlags::REC_NOT_GAP;
        let s_wait = LockMode::S | LockFlags::REC_NOT_GAP | LockFlags::WAIT;
        for converted in [false, true] {
            let Fixture {
                mut k, index, mut block, ..
            } = fixture();
            let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
            let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
            block.set_trx_id(2, t1);
            if converted {
                k.rec_create(x_rec, &block, 2, &index, t1);
            }
            k.rec_create(s_wait, &block, 2, &index, t2);
            assert_eq!(k.rec_queue_validate(&block, 2, Some(&index)).is_ok(), converted);
        }
    }

    #[test]
    fn test_lock_of_finished_trx() {
        let Fixture { mut k, table, .. } = fixture();
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::IS, t1).unwrap();
        k.trx_sys.finish(t1);
        assert!(k.table_queue_validate(table.id()).is_err());
    }
}
