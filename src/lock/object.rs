// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The lock object.

use std::fmt;
use std::sync::Arc;

use crate::dict::{Index, Table, TableId};
use crate::page::{PageId, PAGE_HEAP_NO_SUPREMUM};
use crate::trx::TrxId;

use super::arena::Link;
use super::bitmap::LockBitmap;
use super::mode::{LockFlags, LockMode, TypeMode};

/// Handle of a lock in the kernel's lock arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub(crate) u32);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A table or record lock.
///
/// Every lock sits on its transaction's lock list. Table locks also sit on
/// their table's queue; record locks sit on the hash chain of their page.
#[derive(Debug, Clone)]
pub struct Lock {
    pub(crate) trx: TrxId,
    pub(crate) type_mode: TypeMode,
    pub(crate) trx_link: Link,
    pub(crate) kind: LockKind,
}

#[derive(Debug, Clone)]
pub enum LockKind {
    Table(TableLock),
    Rec(RecLock),
}

#[derive(Debug, Clone)]
pub struct TableLock {
    pub(crate) table: Arc<Table>,
    pub(crate) link: Link,
}

#[derive(Debug, Clone)]
pub struct RecLock {
    pub(crate) page: PageId,
    pub(crate) index: Arc<Index>,
    pub(crate) bitmap: LockBitmap,
    pub(crate) hash_next: Option<LockId>,
}

impl RecLock {
    #[inline]
    pub fn page(&self) -> PageId {
        self.page
    }

    #[inline]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    #[inline]
    pub fn bitmap(&self) -> &LockBitmap {
        &self.bitmap
    }

    #[inline]
    pub fn n_bits(&self) -> usize {
        self.bitmap.n_bits()
    }
}

impl Lock {
    #[inline]
    pub fn trx(&self) -> TrxId {
        self.trx
    }

    #[inline]
    pub fn type_mode(&self) -> TypeMode {
        self.type_mode
    }

    #[inline]
    pub fn mode(&self) -> LockMode {
        self.type_mode.mode()
    }

    #[inline]
    pub fn is_wait(&self) -> bool {
        self.type_mode.is_wait()
    }

    #[inline]
    pub fn is_gap(&self) -> bool {
        self.type_mode.is_gap()
    }

    #[inline]
    pub fn is_rec_not_gap(&self) -> bool {
        self.type_mode.is_rec_not_gap()
    }

    #[inline]
    pub fn is_insert_intention(&self) -> bool {
        self.type_mode.is_insert_intention()
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self.kind, LockKind::Table(_))
    }

    #[inline]
    pub fn is_record(&self) -> bool {
        matches!(self.kind, LockKind::Rec(_))
    }

    /// Returns `TABLE` or `REC`.
    #[inline]
    pub fn lock_type(&self) -> LockFlags {
        match self.kind {
            LockKind::Table(_) => LockFlags::TABLE,
            LockKind::Rec(_) => LockFlags::REC,
        }
    }

    #[inline]
    pub fn as_rec(&self) -> Option<&RecLock> {
        match &self.kind {
            LockKind::Rec(rec) => Some(rec),
            LockKind::Table(_) => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<&TableLock> {
        match &self.kind {
            LockKind::Table(tab) => Some(tab),
            LockKind::Rec(_) => None,
        }
    }

    /// Record payload of a lock known to be a record lock.
    pub(crate) fn rec(&self) -> &RecLock {
        match &self.kind {
            LockKind::Rec(rec) => rec,
            LockKind::Table(_) => unreachable!("table lock used as a record lock"),
        }
    }

    pub(crate) fn rec_mut(&mut self) -> &mut RecLock {
        match &mut self.kind {
            LockKind::Rec(rec) => rec,
            LockKind::Table(_) => unreachable!("table lock used as a record lock"),
        }
    }

    /// Returns the table the lock protects, directly or through its index.
    pub fn table(&self) -> &Arc<Table> {
        match &self.kind {
            LockKind::Table(tab) => &tab.table,
            LockKind::Rec(rec) => rec.index.table(),
        }
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table().id()
    }

    /// Returns the index of a record lock.
    #[inline]
    pub fn index(&self) -> Option<&Arc<Index>> {
        self.as_rec().map(|rec| &rec.index)
    }

    #[inline]
    pub fn page(&self) -> Option<PageId> {
        self.as_rec().map(|rec| rec.page)
    }

    /// Returns true if bit `heap_no` is set. Always false for table locks.
    #[inline]
    pub fn rec_bit(&self, heap_no: usize) -> bool {
        self.as_rec().is_some_and(|rec| rec.bitmap.get(heap_no))
    }

    /// Returns the lowest heap number the lock covers.
    #[inline]
    pub fn find_set_bit(&self) -> Option<usize> {
        self.as_rec().and_then(|rec| rec.bitmap.find_set_bit())
    }

    /// Returns true if `self`, requested or waiting, has to wait for `other`.
    pub fn has_to_wait(&self, other: &Lock) -> bool {
        if self.trx != other.trx && !self.mode().is_compatible(other.mode()) {
            if self.is_record() {
                return rec_has_to_wait(
                    self.trx,
                    self.type_mode,
                    other,
                    self.rec_bit(PAGE_HEAP_NO_SUPREMUM),
                );
            }
            return true;
        }
        false
    }
}

/// Returns true if a record lock request of `type_mode` by `trx` has to wait
/// for the granted or waiting lock `held` on the same record.
///
/// `on_supremum` tells whether the request is on the page supremum, where
/// only the gap exists.
pub fn rec_has_to_wait(trx: TrxId, type_mode: TypeMode, held: &Lock, on_supremum: bool) -> bool {
    if trx == held.trx || type_mode.mode().is_compatible(held.mode()) {
        return false;
    }
    if (on_supremum || type_mode.is_gap()) && !type_mode.is_insert_intention() {
        // Gap locks never block each other; only an insert waits for a gap.
        return false;
    }
    if !type_mode.is_insert_intention() && held.is_gap() {
        return false;
    }
    if type_mode.is_gap() && held.is_rec_not_gap() {
        return false;
    }
    if held.is_insert_intention() {
        // Nothing waits for an insert intention; a conflicting insert would
        // itself have waited for the gap lock behind it.
        return false;
    }
    true
}
