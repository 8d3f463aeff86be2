// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Heap-number bitmaps carried by record locks.

/// One bit per heap slot of a page.
///
/// Sized when the lock is created: the page's current heap count plus a
/// margin, rounded up to whole bytes. Bits past the end read as clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockBitmap {
    bytes: Vec<u8>,
}

impl LockBitmap {
    /// Allocates a cleared bitmap for a page with `n_heap` slots.
    pub fn new(n_heap: usize, margin: usize) -> Self {
        let n_bytes = 1 + (n_heap + margin) / 8;
        Self {
            bytes: vec![0; n_bytes],
        }
    }

    /// Returns the number of addressable bits.
    #[inline]
    pub fn n_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    #[inline]
    pub fn n_bytes(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        if i >= self.n_bits() {
            return false;
        }
        self.bytes[i / 8] & (1 << (i % 8)) != 0
    }

    /// Sets bit `i`. The bitmap must be large enough.
    #[inline]
    pub fn set(&mut self, i: usize) {
        debug_assert!(i < self.n_bits(), "bit {i} out of range");
        self.bytes[i / 8] |= 1 << (i % 8);
    }

    #[inline]
    pub fn clear(&mut self, i: usize) {
        if i < self.n_bits() {
            self.bytes[i / 8] &= !(1 << (i % 8));
        }
    }

    pub fn reset(&mut self) {
        self.bytes.fill(0);
    }

    /// Returns the lowest set bit.
    pub fn find_set_bit(&self) -> Option<usize> {
        self.bytes
            .iter()
            .enumerate()
            .find(|(_, b)| **b != 0)
            .map(|(i, b)| i * 8 + b.trailing_zeros() as usize)
    }

    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Iterates set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n_bits()).filter(move |i| self.get(*i))
    }
}
