// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Index page model consumed by the lock subsystem.
//!
//! Record locks name rows by their *heap number*, a per-page slot id that
//! stays stable while the row lives on the page. The buffer pool and the
//! B-tree own the real frames; the lock layer only needs:
//!
//! - the page address `(space, page_no)` to bucket locks,
//! - the heap-slot counter to size lock bitmaps,
//! - the `max_trx_id` watermark used by secondary-index implicit locks,
//! - record order and heap numbers to walk two pages in lock-step when rows
//!   move between them.
//!
//! [`Block`] provides exactly that, with the two pseudo-records of every page:
//! the infimum (heap 0) before all user records and the supremum (heap 1)
//! after them.

use std::fmt;

use crate::trx::TrxId;

/// Heap number of the page infimum record.
pub const PAGE_HEAP_NO_INFIMUM: usize = 0;

/// Heap number of the page supremum record.
pub const PAGE_HEAP_NO_SUPREMUM: usize = 1;

/// First heap number given to a user record.
pub const PAGE_HEAP_NO_USER_LOW: usize = 2;

/// Address of a page: tablespace id and page number within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub space: u32,
    pub page_no: u32,
}

impl PageId {
    #[inline]
    pub const fn new(space: u32, page_no: u32) -> Self {
        Self { space, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space id {} page no {}", self.space, self.page_no)
    }
}

/// A record slot on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rec {
    heap_no: usize,
    key: Vec<u8>,
    trx_id: TrxId,
}

impl Rec {
    /// Returns the heap number of the record.
    #[inline]
    pub fn heap_no(&self) -> usize {
        self.heap_no
    }

    /// Returns the key bytes (empty for the pseudo-records).
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the id of the transaction that last modified the record.
    ///
    /// Meaningful for clustered index records only.
    #[inline]
    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    #[inline]
    pub fn is_infimum(&self) -> bool {
        self.heap_no == PAGE_HEAP_NO_INFIMUM
    }

    #[inline]
    pub fn is_supremum(&self) -> bool {
        self.heap_no == PAGE_HEAP_NO_SUPREMUM
    }

    #[inline]
    pub fn is_user_rec(&self) -> bool {
        self.heap_no >= PAGE_HEAP_NO_USER_LOW
    }
}

/// A buffer-pool page as seen by the lock subsystem.
#[derive(Debug, Clone)]
pub struct Block {
    id: PageId,
    n_heap: usize,
    max_trx_id: TrxId,
    /// Records in key order: infimum, user records, supremum.
    recs: Vec<Rec>,
}

impl Block {
    /// Creates an empty page holding only the infimum and supremum.
    pub fn new(space: u32, page_no: u32) -> Self {
        let pseudo = |heap_no| Rec {
            heap_no,
            key: Vec::new(),
            trx_id: TrxId(0),
        };
        Self {
            id: PageId::new(space, page_no),
            n_heap: PAGE_HEAP_NO_USER_LOW,
            max_trx_id: TrxId(0),
            recs: vec![pseudo(PAGE_HEAP_NO_INFIMUM), pseudo(PAGE_HEAP_NO_SUPREMUM)],
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn space(&self) -> u32 {
        self.id.space
    }

    #[inline]
    pub fn page_no(&self) -> u32 {
        self.id.page_no
    }

    /// Returns the number of heap slots ever allocated on the page.
    #[inline]
    pub fn n_heap(&self) -> usize {
        self.n_heap
    }

    /// Returns the number of user records.
    #[inline]
    pub fn n_recs(&self) -> usize {
        self.recs.len() - 2
    }

    /// Returns the highest id of a transaction that modified a secondary
    /// index record on this page.
    #[inline]
    pub fn max_trx_id(&self) -> TrxId {
        self.max_trx_id
    }

    /// Raises the page `max_trx_id` watermark to `trx_id` if it is lower.
    pub fn update_max_trx_id(&mut self, trx_id: TrxId) {
        if self.max_trx_id < trx_id {
            self.max_trx_id = trx_id;
        }
    }

    /// Overwrites the watermark, as recovery or a page copy does.
    pub fn set_max_trx_id(&mut self, trx_id: TrxId) {
        self.max_trx_id = trx_id;
    }

    /// Inserts a user record in key order and returns its heap number.
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, trx_id: TrxId) -> usize {
        let key = key.into();
        let last = self.recs.len() - 1;
        let pos = 1 + self.recs[1..last].partition_point(|r| r.key < key);
        let heap_no = self.n_heap;
        self.n_heap += 1;
        self.recs.insert(
            pos,
            Rec {
                heap_no,
                key,
                trx_id,
            },
        );
        heap_no
    }

    /// Removes the user record with `heap_no`. Its heap slot is not reused.
    pub fn delete(&mut self, heap_no: usize) -> Option<Rec> {
        if heap_no < PAGE_HEAP_NO_USER_LOW {
            return None;
        }
        let pos = self.position(heap_no)?;
        Some(self.recs.remove(pos))
    }

    /// Stamps a record with the id of the transaction modifying it.
    pub fn set_trx_id(&mut self, heap_no: usize, trx_id: TrxId) -> bool {
        match self.position(heap_no) {
            Some(pos) if heap_no >= PAGE_HEAP_NO_USER_LOW => {
                self.recs[pos].trx_id = trx_id;
                true
            }
            _ => false,
        }
    }

    /// Returns the record with `heap_no`.
    pub fn rec(&self, heap_no: usize) -> Option<&Rec> {
        self.position(heap_no).map(|pos| &self.recs[pos])
    }

    /// Returns the user record with `key`.
    pub fn rec_by_key(&self, key: &[u8]) -> Option<&Rec> {
        self.user_recs().find(|r| r.key == key)
    }

    /// Returns true if `heap_no` names a user record present on the page.
    pub fn is_user_rec(&self, heap_no: usize) -> bool {
        heap_no >= PAGE_HEAP_NO_USER_LOW && self.position(heap_no).is_some()
    }

    /// Returns the heap number of the record following `heap_no`.
    pub fn next_heap_no(&self, heap_no: usize) -> Option<usize> {
        let pos = self.position(heap_no)?;
        self.recs.get(pos + 1).map(Rec::heap_no)
    }

    /// Returns the heap number of the record preceding `heap_no`.
    pub fn prev_heap_no(&self, heap_no: usize) -> Option<usize> {
        let pos = self.position(heap_no)?;
        pos.checked_sub(1).map(|p| self.recs[p].heap_no)
    }

    /// Returns the heap number of the successor of the infimum.
    pub fn min_heap_no(&self) -> usize {
        self.recs[1].heap_no
    }

    /// Iterates heap numbers in record order, pseudo-records included.
    pub fn heap_nos(&self) -> impl Iterator<Item = usize> + '_ {
        self.recs.iter().map(Rec::heap_no)
    }

    /// Iterates user records in key order.
    pub fn user_recs(&self) -> impl Iterator<Item = &Rec> + '_ {
        self.recs[1..self.recs.len() - 1].iter()
    }

    /// Copies the user records from `from_heap` to the end of the page onto
    /// `dst`, the first step of moving a record list during a split.
    pub fn copy_rec_list_end_to(&self, from_heap: usize, dst: &mut Block) {
        let Some(start) = self.position(from_heap) else {
            return;
        };
        let start = start.max(1);
        for rec in &self.recs[start..self.recs.len() - 1] {
            dst.insert(rec.key.clone(), rec.trx_id);
        }
    }

    /// Copies the user records before `upto_heap` onto `dst`.
    pub fn copy_rec_list_start_to(&self, upto_heap: usize, dst: &mut Block) {
        let Some(end) = self.position(upto_heap) else {
            return;
        };
        for rec in &self.recs[1..end] {
            dst.insert(rec.key.clone(), rec.trx_id);
        }
    }

    /// Deletes the user records from `from_heap` to the end of the page.
    pub fn delete_rec_list_end(&mut self, from_heap: usize) {
        if let Some(start) = self.position(from_heap) {
            let start = start.max(1);
            let last = self.recs.len() - 1;
            self.recs.drain(start..last);
        }
    }

    /// Deletes the user records before `upto_heap`.
    pub fn delete_rec_list_start(&mut self, upto_heap: usize) {
        if let Some(end) = self.position(upto_heap) {
            self.recs.drain(1..end);
        }
    }

    /// Rebuilds the page in place, renumbering user records densely in key
    /// order. Returns the page as it was before.
    pub fn reorganize(&mut self) -> Block {
        let old = self.clone();
        let mut next = PAGE_HEAP_NO_USER_LOW;
        let last = self.recs.len() - 1;
        for rec in &mut self.recs[1..last] {
            rec.heap_no = next;
            next += 1;
        }
        self.n_heap = next;
        old
    }

    fn position(&self, heap_no: usize) -> Option<usize> {
        self.recs.iter().position(|r| r.heap_no == heap_no)
    }
}

/// A cursor over the records of one page.
#[derive(Debug, Clone, Copy)]
pub struct PageCursor<'a> {
    block: &'a Block,
    pos: usize,
}

impl<'a> PageCursor<'a> {
    /// Positions the cursor on the infimum.
    pub fn before_first(block: &'a Block) -> Self {
        Self { block, pos: 0 }
    }

    /// Positions the cursor on the record with `heap_no`.
    pub fn at(block: &'a Block, heap_no: usize) -> Option<Self> {
        block.position(heap_no).map(|pos| Self { block, pos })
    }

    #[inline]
    pub fn is_before_first(&self) -> bool {
        self.pos == 0
    }

    #[inline]
    pub fn is_after_last(&self) -> bool {
        self.pos + 1 == self.block.recs.len()
    }

    /// Advances to the next record; stays on the supremum.
    pub fn move_to_next(&mut self) {
        if !self.is_after_last() {
            self.pos += 1;
        }
    }

    #[inline]
    pub fn rec(&self) -> &'a Rec {
        &self.block.recs[self.pos]
    }

    #[inline]
    pub fn heap_no(&self) -> usize {
        self.rec().heap_no
    }
}
