// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Row-level entry points used by cursors, and implicit lock conversion.

use std::sync::Arc;

use crate::dict::Index;
use crate::page::{Block, PAGE_HEAP_NO_SUPREMUM};
use crate::trx::{TrxId, TrxSys};

use super::error::{LockError, LockStatus};
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode, OpFlags};

/// Finds the transaction that holds an implicit lock on a secondary index
/// record, by walking the clustered index versions of the row.
///
/// Clustered index records carry the id of their last modifier and need no
/// help. For secondary indexes the lock layer can only tell from the page
/// watermark that some active transaction may have modified the page.
pub trait RowVersions: Send + Sync {
    fn implicit_holder(
        &self,
        trx_sys: &TrxSys,
        block: &Block,
        heap_no: usize,
        index: &Index,
    ) -> Option<TrxId>;
}

/// A version store with no secondary index history: secondary records never
/// carry implicit locks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRowVersions;

impl RowVersions for NoRowVersions {
    fn implicit_holder(&self, _: &TrxSys, _: &Block, _: usize, _: &Index) -> Option<TrxId> {
        None
    }
}

/// Context needed to look for implicit locks.
#[derive(Clone, Copy)]
pub(crate) struct ImplicitCtx<'a> {
    pub(crate) recovery: bool,
    pub(crate) versions: &'a dyn RowVersions,
}

impl Kernel {
    /// Returns the active transaction whose id is stored in a clustered
    /// index record.
    pub fn clust_rec_some_has_impl(&self, block: &Block, heap_no: usize) -> Option<TrxId> {
        let trx_id = block.rec(heap_no)?.trx_id();
        self.trx_sys.is_active(trx_id).then_some(trx_id)
    }

    /// Returns the transaction holding an implicit lock on a secondary index
    /// record, if the page watermark allows one to exist.
    pub(crate) fn sec_rec_some_has_impl(
        &self,
        block: &Block,
        heap_no: usize,
        index: &Index,
        ctx: ImplicitCtx<'_>,
    ) -> Option<TrxId> {
        let max_trx_id = block.max_trx_id();
        if max_trx_id < self.trx_sys.min_active_id() && !ctx.recovery {
            return None;
        }
        if !self.check_trx_id_sanity(max_trx_id, block, heap_no, index) {
            return None;
        }
        ctx.versions.implicit_holder(&self.trx_sys, block, heap_no, index)
    }

    /// Gives the holder of an implicit lock on a user record an explicit
    /// `X,REC_NOT_GAP` lock, so waiters can queue behind it.
    pub(crate) fn rec_convert_impl_to_expl(
        &mut self,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        ctx: ImplicitCtx<'_>,
    ) {
        if !block.is_user_rec(heap_no) {
            return;
        }
        let holder = if index.is_clustered() {
            self.clust_rec_some_has_impl(block, heap_no)
        } else {
            self.sec_rec_some_has_impl(block, heap_no, index, ctx)
        };
        let Some(holder) = holder else {
            return;
        };

        let x_rec = LockMode::X | LockFlags::REC_NOT_GAP;
        if self.rec_has_expl(x_rec, block.id(), heap_no, holder).is_none() {
            self.rec_add_to_queue(x_rec | LockFlags::REC, block, heap_no, index, holder);
        }
    }

    /// Checks for a conflicting gap lock before inserting after `rec_heap_no`.
    ///
    /// The second value tells the caller whether the new record must inherit
    /// gap locks from its successor after the insert.
    pub(crate) fn rec_insert_check_and_lock(
        &mut self,
        flags: OpFlags,
        block: &mut Block,
        rec_heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<(LockStatus, bool), LockError> {
        if flags.no_locking() {
            return Ok((LockStatus::Granted, false));
        }
        let Some(next_heap_no) = block.next_heap_no(rec_heap_no) else {
            return Err(LockError::invariant(format!(
                "insert position {rec_heap_no} is not on page {}",
                block.id()
            )));
        };

        if self.rec_first(block.id(), next_heap_no).is_none() {
            // Nobody locks the gap: no lock needed and nothing to inherit.
            if !index.is_clustered() {
                block.update_max_trx_id(trx);
            }
            return Ok((LockStatus::Granted, false));
        }

        let insert = LockMode::X | LockFlags::GAP | LockFlags::INSERT_INTENTION;
        let status = if self
            .rec_other_has_conflicting(insert, block.id(), next_heap_no, trx)
            .is_some()
        {
            self.rec_enqueue_waiting(insert, block, next_heap_no, index, trx)?
        } else {
            LockStatus::Granted
        };

        if status == LockStatus::Granted && !index.is_clustered() {
            block.update_max_trx_id(trx);
        }
        Ok((status, true))
    }

    /// Locks a clustered index record about to be modified in place.
    pub(crate) fn clust_rec_modify_check_and_lock(
        &mut self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
        ctx: ImplicitCtx<'_>,
    ) -> Result<LockStatus, LockError> {
        debug_assert!(index.is_clustered());
        if flags.no_locking() {
            return Ok(LockStatus::Granted);
        }
        self.rec_convert_impl_to_expl(block, heap_no, index, ctx);
        self.rec_lock(true, LockMode::X | LockFlags::REC_NOT_GAP, block, heap_no, index, trx)
    }

    /// Locks a secondary index record about to be delete-marked.
    pub(crate) fn sec_rec_modify_check_and_lock(
        &mut self,
        flags: OpFlags,
        block: &mut Block,
        heap_no: usize,
        index: &Arc<Index>,
        trx: TrxId,
    ) -> Result<LockStatus, LockError> {
        debug_assert!(!index.is_clustered());
        if flags.no_locking() {
            return Ok(LockStatus::Granted);
        }
        // No other transaction can hold an implicit lock here: this one has
        // already modified the clustered record.
        let status =
            self.rec_lock(true, LockMode::X | LockFlags::REC_NOT_GAP, block, heap_no, index, trx)?;
        if status == LockStatus::Granted {
            block.update_max_trx_id(trx);
        }
        Ok(status)
    }

    /// Locks a secondary index record for a locking read.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn sec_rec_read_check_and_lock(
        &mut self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        mode: LockMode,
        gap_mode: LockFlags,
        trx: TrxId,
        ctx: ImplicitCtx<'_>,
    ) -> Result<LockStatus, LockError> {
        debug_assert!(!index.is_clustered());
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        if flags.no_locking() {
            return Ok(LockStatus::Granted);
        }
        let may_have_impl = block.max_trx_id() >= self.trx_sys.min_active_id() || ctx.recovery;
        if may_have_impl && heap_no != PAGE_HEAP_NO_SUPREMUM {
            self.rec_convert_impl_to_expl(block, heap_no, index, ctx);
        }
        self.rec_lock(false, mode | gap_mode, block, heap_no, index, trx)
    }

    /// Locks a clustered index record for a locking read.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn clust_rec_read_check_and_lock(
        &mut self,
        flags: OpFlags,
        block: &Block,
        heap_no: usize,
        index: &Arc<Index>,
        mode: LockMode,
        gap_mode: LockFlags,
        trx: TrxId,
        ctx: ImplicitCtx<'_>,
    ) -> Result<LockStatus, LockError> {
        debug_assert!(index.is_clustered());
        debug_assert!(matches!(mode, LockMode::S | LockMode::X));
        if flags.no_locking() {
            return Ok(LockStatus::Granted);
        }
        if heap_no != PAGE_HEAP_NO_SUPREMUM {
            self.rec_convert_impl_to_expl(block, heap_no, index, ctx);
        }
        self.rec_lock(false, mode | gap_mode, block, heap_no, index, trx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::Table;
    use crate::lock::config::LockSysConfig;
    use crate::lock::wait::ThreadParker;
    use crate::trx::IsolationLevel;

    const CTX: ImplicitCtx<'static> = ImplicitCtx {
        recovery: false,
        versions: &NoRowVersions,
    };

    /// Reports a fixed holder for every secondary record.
    struct FixedHolder(TrxId);

    impl RowVersions for FixedHolder {
        fn implicit_holder(&self, trx_sys: &TrxSys, _: &Block, _: usize, _: &Index) -> Option<TrxId> {
            trx_sys.is_active(self.0).then_some(self.0)
        }
    }

    fn kernel() -> Kernel {
        Kernel::new(LockSysConfig::default(), Arc::new(ThreadParker::new()))
    }

    #[test]
    fn test_clustered_implicit_lock_is_converted() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::clustered(1, "PRIMARY", &table);
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);

        let mut block = Block::new(0, 10);
        let heap_no = block.insert("r", t1);

        let status = k
            .clust_rec_read_check_and_lock(
                OpFlags::NONE,
                &block,
                heap_no,
                &index,
                LockMode::S,
                LockFlags::REC_NOT_GAP,
                t2,
                CTX,
            )
            .unwrap();
        assert_eq!(status, LockStatus::Waiting);

        let first = k.rec_first(block.id(), heap_no).unwrap();
        assert_eq!(k.lock(first).trx(), t1);
        assert_eq!(k.lock(first).mode(), LockMode::X);
        assert!(k.lock(first).is_rec_not_gap());
    }

    #[test]
    fn test_committed_modifier_has_no_implicit_lock() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::clustered(1, "PRIMARY", &table);
        let mut block = Block::new(0, 10);
        let heap_no = block.insert("r", TrxId(0));
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);

        let status = k
            .clust_rec_modify_check_and_lock(OpFlags::NONE, &block, heap_no, &index, t1, CTX)
            .unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert!(k.rec_first_on_page(block.id()).is_none());
    }

    #[test]
    fn test_insert_without_gap_locks() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::secondary(2, "k", &table);
        let mut block = Block::new(0, 10);
        let a = block.insert("a", TrxId(0));
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);

        let (status, inherit) = k
            .rec_insert_check_and_lock(OpFlags::NONE, &mut block, a, &index, t1)
            .unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert!(!inherit);
        assert_eq!(block.max_trx_id(), t1);
    }

    #[test]
    fn test_insert_waits_for_gap_lock() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::clustered(1, "PRIMARY", &table);
        let mut block = Block::new(0, 10);
        let a = block.insert("a", TrxId(0));
        let c = block.insert("c", TrxId(0));
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.rec_lock(false, LockMode::S.into(), &block, c, &index, t1)
            .unwrap();

        let (status, inherit) = k
            .rec_insert_check_and_lock(OpFlags::NONE, &mut block, a, &index, t2)
            .unwrap();
        assert_eq!(status, LockStatus::Waiting);
        assert!(inherit);
        let wait = k.trx_sys[t2].wait_lock().unwrap();
        assert!(k.lock(wait).is_insert_intention());
    }

    #[test]
    fn test_secondary_read_uses_row_versions() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::secondary(2, "k", &table);
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let mut block = Block::new(0, 10);
        let heap_no = block.insert("k1", TrxId(0));
        block.update_max_trx_id(t1);

        let versions = FixedHolder(t1);
        let ctx = ImplicitCtx {
            recovery: false,
            versions: &versions,
        };
        let status = k
            .sec_rec_read_check_and_lock(
                OpFlags::NONE,
                &block,
                heap_no,
                &index,
                LockMode::X,
                LockFlags::ORDINARY,
                t2,
                ctx,
            )
            .unwrap();
        assert_eq!(status, LockStatus::Waiting);
        assert_eq!(k.lock(k.rec_first(block.id(), heap_no).unwrap()).trx(), t1);
    }

    #[test]
    fn test_old_watermark_skips_version_lookup() {
        let mut k = kernel();
        let table = Table::new(1, "test/t1");
        let index = Index::secondary(2, "k", &table);
        let mut block = Block::new(0, 10);
        let heap_no = block.insert("k1", TrxId(0));
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);

        let versions = FixedHolder(t1);
        let ctx = ImplicitCtx {
            recovery: false,
            versions: &versions,
        };
        assert_eq!(k.sec_rec_some_has_impl(&block, heap_no, &index, ctx), None);
        block.update_max_trx_id(t2);
        assert_eq!(k.sec_rec_some_has_impl(&block, heap_no, &index, ctx), Some(t1));
    }
}
