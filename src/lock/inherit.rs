// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Keeping record locks attached to rows across page changes.
//!
//! The B-tree calls these hooks with the kernel mutex held, after it has
//! changed a page. Locks follow their rows to new heap numbers, and locks on
//! rows that disappear are inherited as gap locks by a neighbour, so a
//! transaction never loses protection it already had.

use std::sync::Arc;

use crate::dict::Index;
use crate::page::{Block, PageCursor, PageId, PAGE_HEAP_NO_INFIMUM, PAGE_HEAP_NO_SUPREMUM};
use crate::trx::{IsolationLevel, TrxId};

use super::bitmap::LockBitmap;
use super::kernel::Kernel;
use super::mode::{LockFlags, LockMode, TypeMode};
use super::object::LockId;

impl Kernel {
    fn rec_owner(&self, id: LockId) -> (Arc<Index>, TrxId) {
        let lock = &self.locks[id];
        (Arc::clone(&lock.rec().index), lock.trx)
    }

    fn gap_heir_mode(mode: LockMode) -> TypeMode {
        mode | LockFlags::REC | LockFlags::GAP
    }

    /// Gives the heir record gap locks matching the locks on `heap_no` of
    /// `block`. Insert intentions are not inherited, nor are X locks of
    /// transactions that do not take gap locks.
    pub fn rec_inherit_to_gap(&mut self, heir_block: &Block, block: PageId, heir_heap_no: usize, heap_no: usize) {
        for id in self.bit_locks(block, heap_no) {
            let lock = &self.locks[id];
            let no_gap_locks = matches!(
                self.trx_sys[lock.trx].isolation,
                IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted
            );
            if lock.is_insert_intention() || (no_gap_locks && lock.mode() == LockMode::X) {
                continue;
            }
            let mode = lock.mode();
            let (index, trx) = self.rec_owner(id);
            self.rec_add_to_queue(Self::gap_heir_mode(mode), heir_block, heir_heap_no, &index, trx);
        }
    }

    /// Like [`Kernel::rec_inherit_to_gap`] within one page, but only for
    /// locks that cover the gap.
    pub fn rec_inherit_to_gap_if_gap_lock(&mut self, block: &Block, heir_heap_no: usize, heap_no: usize) {
        for id in self.bit_locks(block.id(), heap_no) {
            let lock = &self.locks[id];
            if lock.is_insert_intention()
                || (heap_no != PAGE_HEAP_NO_SUPREMUM && lock.is_rec_not_gap())
            {
                continue;
            }
            let mode = lock.mode();
            let (index, trx) = self.rec_owner(id);
            self.rec_add_to_queue(Self::gap_heir_mode(mode), block, heir_heap_no, &index, trx);
        }
    }

    /// Moves the locks on `donator_heap_no` of `donator` to
    /// `receiver_heap_no` of `receiver`. Waiting locks are re-enqueued.
    pub fn rec_move(
        &mut self,
        receiver: &Block,
        donator: PageId,
        receiver_heap_no: usize,
        donator_heap_no: usize,
    ) {
        for id in self.bit_locks(donator, donator_heap_no) {
            let type_mode = self.locks[id].type_mode;
            // Clear first: the donor and receiver may be the same record.
            self.rec_reset_bit(id, donator_heap_no);
            if type_mode.is_wait() {
                self.reset_lock_and_trx_wait(id);
            }
            let (index, trx) = self.rec_owner(id);
            self.rec_add_to_queue(type_mode, receiver, receiver_heap_no, &index, trx);
        }
    }

    /// Re-attaches the locks of a page after it was reorganized in place.
    /// `oblock` is the page as it was before.
    pub fn move_reorganize_page(&mut self, block: &Block, oblock: &Block) {
        let locks = self.page_locks(block.id());
        if locks.is_empty() {
            return;
        }

        let mut old: Vec<(TypeMode, Arc<Index>, TrxId, LockBitmap)> = Vec::with_capacity(locks.len());
        for id in locks {
            let type_mode = self.locks[id].type_mode;
            let (index, trx) = self.rec_owner(id);
            let bitmap = self.locks[id].rec().bitmap.clone();
            self.locks[id].rec_mut().bitmap.reset();
            if type_mode.is_wait() {
                self.reset_lock_and_trx_wait(id);
            }
            old.push((type_mode, index, trx, bitmap));
        }

        for (type_mode, index, trx, mut bitmap) in old {
            let mut cur1 = PageCursor::before_first(block);
            let mut cur2 = PageCursor::before_first(oblock);
            loop {
                let old_heap_no = cur2.heap_no();
                let new_heap_no = cur1.heap_no();
                if bitmap.get(old_heap_no) {
                    bitmap.clear(old_heap_no);
                    self.rec_add_to_queue(type_mode, block, new_heap_no, &index, trx);
                }
                if new_heap_no == PAGE_HEAP_NO_SUPREMUM {
                    break;
                }
                cur1.move_to_next();
                cur2.move_to_next();
            }
            if !bitmap.is_empty() {
                self.fatal("lock bits left unmapped after page reorganize");
            }
        }
    }

    /// Moves the locks of the records from `rec_heap_no` to the end of
    /// `block` onto the same records, now at the start of `new_block`.
    pub fn move_rec_list_end(&mut self, new_block: &Block, block: &Block, rec_heap_no: usize) {
        for id in self.page_locks(block.id()) {
            let type_mode = self.locks[id].type_mode;
            let Some(mut cur1) = PageCursor::at(block, rec_heap_no) else {
                self.fatal("moved record list does not start on the page");
            };
            if cur1.is_before_first() {
                cur1.move_to_next();
            }
            let mut cur2 = PageCursor::before_first(new_block);
            cur2.move_to_next();

            while !cur1.is_after_last() {
                let heap_no = cur1.heap_no();
                if self.locks[id].rec_bit(heap_no) {
                    self.rec_reset_bit(id, heap_no);
                    if type_mode.is_wait() {
                        self.reset_lock_and_trx_wait(id);
                    }
                    let (index, trx) = self.rec_owner(id);
                    self.rec_add_to_queue(type_mode, new_block, cur2.heap_no(), &index, trx);
                }
                cur1.move_to_next();
                cur2.move_to_next();
            }
        }
    }

    /// Moves the locks of the records before `rec_heap_no` on `block` onto
    /// `new_block`, where they were appended after `old_end_heap_no`.
    pub fn move_rec_list_start(
        &mut self,
        new_block: &Block,
        block: &Block,
        rec_heap_no: usize,
        old_end_heap_no: usize,
    ) {
        for id in self.page_locks(block.id()) {
            let type_mode = self.locks[id].type_mode;
            let mut cur1 = PageCursor::before_first(block);
            cur1.move_to_next();
            let Some(mut cur2) = PageCursor::at(new_block, old_end_heap_no) else {
                self.fatal("old end record is not on the receiving page");
            };
            cur2.move_to_next();

            while cur1.heap_no() != rec_heap_no {
                if cur1.is_after_last() {
                    self.fatal("moved record list does not end on the page");
                }
                let heap_no = cur1.heap_no();
                if self.locks[id].rec_bit(heap_no) {
                    self.rec_reset_bit(id, heap_no);
                    if type_mode.is_wait() {
                        self.reset_lock_and_trx_wait(id);
                    }
                    let (index, trx) = self.rec_owner(id);
                    self.rec_add_to_queue(type_mode, new_block, cur2.heap_no(), &index, trx);
                }
                cur1.move_to_next();
                cur2.move_to_next();
            }

            if rec_heap_no == PAGE_HEAP_NO_SUPREMUM {
                let lock = &self.locks[id];
                if (2..lock.rec().n_bits()).any(|i| lock.rec_bit(i)) {
                    self.fatal("user record locks left behind after moving the whole page");
                }
            }
        }
    }

    /// Called after the upper half of `left_block` moved to the new page
    /// `right_block`.
    pub fn update_split_right(&mut self, right_block: &Block, left_block: &Block) {
        let heap_no = right_block.min_heap_no();
        // The supremum of the left page now belongs to the right page.
        self.rec_move(right_block, left_block.id(), PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_SUPREMUM);
        self.rec_inherit_to_gap(left_block, right_block.id(), PAGE_HEAP_NO_SUPREMUM, heap_no);
    }

    /// Called when records were split off to a new left page.
    pub fn update_split_left(&mut self, right_block: &Block, left_block: &Block) {
        let heap_no = right_block.min_heap_no();
        self.rec_inherit_to_gap(left_block, right_block.id(), PAGE_HEAP_NO_SUPREMUM, heap_no);
    }

    /// Called after the records of `left_block` were merged onto the start of
    /// `right_block`; `orig_succ_heap_no` is the first original record of the
    /// right page.
    pub fn update_merge_right(&mut self, right_block: &Block, orig_succ_heap_no: usize, left_block: &Block) {
        self.rec_inherit_to_gap(right_block, left_block.id(), orig_succ_heap_no, PAGE_HEAP_NO_SUPREMUM);
        self.rec_reset_and_release_wait(left_block.id(), PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(left_block.id());
    }

    /// Called after the records of `right_block` were merged onto the end of
    /// `left_block`; `orig_pred_heap_no` was the last record of the left page.
    pub fn update_merge_left(&mut self, left_block: &Block, orig_pred_heap_no: usize, right_block: &Block) {
        let left_next = left_block
            .next_heap_no(orig_pred_heap_no)
            .unwrap_or(PAGE_HEAP_NO_SUPREMUM);
        if left_next != PAGE_HEAP_NO_SUPREMUM {
            self.rec_inherit_to_gap(left_block, left_block.id(), left_next, PAGE_HEAP_NO_SUPREMUM);
            self.rec_reset_and_release_wait(left_block.id(), PAGE_HEAP_NO_SUPREMUM);
        }
        self.rec_move(left_block, right_block.id(), PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(right_block.id());
    }

    /// Called when the root page content moved to `block` on a tree raise.
    pub fn update_root_raise(&mut self, block: &Block, root: &Block) {
        self.rec_move(block, root.id(), PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_SUPREMUM);
    }

    /// Called when the records of `block` were copied to `new_block` and
    /// `block` is going away.
    pub fn update_copy_and_discard(&mut self, new_block: &Block, block: &Block) {
        self.rec_move(new_block, block.id(), PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_SUPREMUM);
        self.rec_free_all_from_discard_page(block.id());
    }

    /// Drops the locks on the heir record, then gives it gap locks matching
    /// the locks on `heap_no` of `block`. The donor keeps its locks.
    pub fn rec_reset_and_inherit_gap_locks(
        &mut self,
        heir_block: &Block,
        block: &Block,
        heir_heap_no: usize,
        heap_no: usize,
    ) {
        self.rec_reset_and_release_wait(heir_block.id(), heir_heap_no);
        self.rec_inherit_to_gap(heir_block, block.id(), heir_heap_no, heap_no);
    }

    /// Called when `block` is discarded: every lock on it becomes a gap
    /// lock on the heir record.
    pub fn update_discard(&mut self, heir_block: &Block, heir_heap_no: usize, block: &Block) {
        if self.rec_first_on_page(block.id()).is_none() {
            return;
        }
        let page = block.id();
        for heap_no in block.heap_nos() {
            self.rec_inherit_to_gap(heir_block, page, heir_heap_no, heap_no);
            self.rec_reset_and_release_wait(page, heap_no);
        }
        self.rec_free_all_from_discard_page(page);
    }

    /// Called after a record was inserted: it inherits the gap locks of its
    /// successor.
    pub fn update_insert(&mut self, block: &Block, heap_no: usize) {
        if let Some(donor) = block.next_heap_no(heap_no) {
            self.rec_inherit_to_gap_if_gap_lock(block, heap_no, donor);
        }
    }

    /// Called before a record is removed from the page: its locks become gap
    /// locks on the successor.
    pub fn update_delete(&mut self, block: &Block, heap_no: usize) {
        let Some(next) = block.next_heap_no(heap_no) else {
            return;
        };
        self.rec_inherit_to_gap(block, block.id(), next, heap_no);
        self.rec_reset_and_release_wait(block.id(), heap_no);
    }

    /// Parks the locks of a record on the page infimum while the record is
    /// rewritten.
    pub fn rec_store_on_page_infimum(&mut self, block: &Block, heap_no: usize) {
        self.rec_move(block, block.id(), PAGE_HEAP_NO_INFIMUM, heap_no);
    }

    /// Moves the locks parked on the infimum of `donator` back to a record.
    pub fn rec_restore_from_page_infimum(&mut self, block: &Block, heap_no: usize, donator: &Block) {
        self.rec_move(block, donator.id(), heap_no, PAGE_HEAP_NO_INFIMUM);
    }
}
