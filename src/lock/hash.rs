// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hash table bucketing record locks by page.

use crate::page::PageId;

use super::object::LockId;

const HASH_RANDOM_MASK: u64 = 1_463_735_687;
const HASH_RANDOM_MASK2: u64 = 1_653_893_711;

/// Folds a pair of numbers into one hash value.
#[inline]
pub(crate) fn fold_pair(n1: u64, n2: u64) -> u64 {
    (((n1 ^ HASH_RANDOM_MASK2) << 8).wrapping_add(n2) ^ HASH_RANDOM_MASK).wrapping_add(n1)
}

/// Returns the hash value of a page address.
#[inline]
pub(crate) fn page_fold(page: PageId) -> u64 {
    fold_pair(u64::from(page.space), u64::from(page.page_no))
}

/// Returns the smallest prime that is at least `n`.
pub(crate) fn find_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    loop {
        if is_prime(candidate) {
            return candidate;
        }
        candidate += 1;
    }
}

fn is_prime(n: usize) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Cell heads of the record lock hash. The chains themselves are threaded
/// through `RecLock::hash_next`, in insertion order.
#[derive(Debug)]
pub struct RecLockHash {
    cells: Vec<Option<LockId>>,
}

impl RecLockHash {
    /// Creates a table with at least `n_cells` cells.
    pub fn new(n_cells: usize) -> Self {
        Self {
            cells: vec![None; find_prime(n_cells)],
        }
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the cell a page's locks live in.
    #[inline]
    pub fn cell_of(&self, page: PageId) -> usize {
        ((page_fold(page) ^ HASH_RANDOM_MASK2) % self.cells.len() as u64) as usize
    }

    #[inline]
    pub(crate) fn head(&self, cell: usize) -> Option<LockId> {
        self.cells[cell]
    }

    #[inline]
    pub(crate) fn set_head(&mut self, cell: usize, head: Option<LockId>) {
        self.cells[cell] = head;
    }

    pub(crate) fn clear(&mut self) {
        self.cells.fill(None);
    }
}
