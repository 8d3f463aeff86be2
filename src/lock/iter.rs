// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Backward iteration over a lock queue.

use super::kernel::Kernel;
use super::object::LockId;

/// Walks a table queue or a single record queue from a lock towards its
/// head.
///
/// For record locks the queue is the set of locks on the same page with the
/// same bit set. A waiting record lock has exactly one bit set, so the bit
/// can be derived from the lock itself.
pub struct LockQueueIterator<'a> {
    kernel: &'a Kernel,
    current: Option<LockId>,
    bit_no: Option<usize>,
}

impl<'a> LockQueueIterator<'a> {
    /// Positions the iterator at `lock`. With `bit_no` of `None` a record
    /// lock iterates the queue of its lowest set bit.
    pub fn new(kernel: &'a Kernel, lock: LockId, bit_no: Option<usize>) -> Self {
        let mut iter = Self {
            kernel,
            current: None,
            bit_no: None,
        };
        iter.reset(lock, bit_no);
        iter
    }

    pub fn reset(&mut self, lock: LockId, bit_no: Option<usize>) {
        self.current = Some(lock);
        self.bit_no = match bit_no {
            Some(bit) => Some(bit),
            None => self.kernel.lock(lock).find_set_bit(),
        };
    }

    #[inline]
    pub fn current(&self) -> Option<LockId> {
        self.current
    }

    #[inline]
    pub fn bit_no(&self) -> Option<usize> {
        self.bit_no
    }

    /// Steps to the previous lock in the queue. The position does not move
    /// once the head has been reached.
    pub fn prev(&mut self) -> Option<LockId> {
        let current = self.current?;
        let prev = if self.kernel.lock(current).is_record() {
            self.kernel.rec_prev(current, self.bit_no?)
        } else {
            self.kernel.table_prev(current)
        };
        if prev.is_some() {
            self.current = prev;
        }
        prev
    }
}

impl Iterator for LockQueueIterator<'_> {
    type Item = LockId;

    fn next(&mut self) -> Option<LockId> {
        self.prev()
    }
}
