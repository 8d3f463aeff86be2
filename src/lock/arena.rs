// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock storage and the intrusive lists threaded through it.
//!
//! Locks never move once allocated: lists link them by [`LockId`], so removal
//! from the transaction list or a table queue is O(1) and nothing outside
//! the arena holds a reference into it. Slots are handed back only when the
//! owning transaction ends, never one lock at a time.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use super::object::{Lock, LockId, LockKind};

/// Node of a doubly linked lock list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub(crate) prev: Option<LockId>,
    pub(crate) next: Option<LockId>,
}

/// Head of a doubly linked lock list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListBase {
    first: Option<LockId>,
    last: Option<LockId>,
    len: usize,
}

impl ListBase {
    #[inline]
    pub fn first(&self) -> Option<LockId> {
        self.first
    }

    #[inline]
    pub fn last(&self) -> Option<LockId> {
        self.last
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Selects which link of a lock a list operation follows.
pub(crate) trait Chain {
    fn link(lock: &Lock) -> &Link;
    fn link_mut(lock: &mut Lock) -> &mut Link;
}

/// A transaction's list of locks.
pub(crate) struct TrxChain;

/// A table's lock queue.
pub(crate) struct TableChain;

impl Chain for TrxChain {
    #[inline]
    fn link(lock: &Lock) -> &Link {
        &lock.trx_link
    }

    #[inline]
    fn link_mut(lock: &mut Lock) -> &mut Link {
        &mut lock.trx_link
    }
}

impl Chain for TableChain {
    fn link(lock: &Lock) -> &Link {
        match &lock.kind {
            LockKind::Table(tab) => &tab.link,
            LockKind::Rec(_) => unreachable!("record lock on a table queue"),
        }
    }

    fn link_mut(lock: &mut Lock) -> &mut Link {
        match &mut lock.kind {
            LockKind::Table(tab) => &mut tab.link,
            LockKind::Rec(_) => unreachable!("record lock on a table queue"),
        }
    }
}

/// Slab of lock objects.
#[derive(Debug, Default)]
pub struct LockArena {
    slots: Vec<Lock>,
    free: Vec<LockId>,
}

impl LockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, lock: Lock) -> LockId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id.0 as usize] = lock;
                id
            }
            None => {
                let id = LockId(self.slots.len() as u32);
                self.slots.push(lock);
                id
            }
        }
    }

    /// Returns a slot for reuse. The lock must be off every list.
    pub(crate) fn release(&mut self, id: LockId) {
        self.free.push(id);
    }

    /// Number of slots holding a live lock.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn push_back<C: Chain>(&mut self, base: &mut ListBase, id: LockId) {
        let last = base.last;
        {
            let link = C::link_mut(&mut self[id]);
            link.prev = last;
            link.next = None;
        }
        match last {
            Some(last) => C::link_mut(&mut self[last]).next = Some(id),
            None => base.first = Some(id),
        }
        base.last = Some(id);
        base.len += 1;
    }

    pub(crate) fn remove<C: Chain>(&mut self, base: &mut ListBase, id: LockId) {
        let Link { prev, next } = *C::link(&self[id]);
        match prev {
            Some(prev) => C::link_mut(&mut self[prev]).next = next,
            None => base.first = next,
        }
        match next {
            Some(next) => C::link_mut(&mut self[next]).prev = prev,
            None => base.last = prev,
        }
        *C::link_mut(&mut self[id]) = Link::default();
        base.len -= 1;
    }

    #[inline]
    pub(crate) fn next<C: Chain>(&self, id: LockId) -> Option<LockId> {
        C::link(&self[id]).next
    }

    #[inline]
    pub(crate) fn prev<C: Chain>(&self, id: LockId) -> Option<LockId> {
        C::link(&self[id]).prev
    }

    /// Iterates a list front to back.
    pub(crate) fn iter<C: Chain>(&self, base: &ListBase) -> ListIter<'_, C> {
        ListIter {
            arena: self,
            cur: base.first,
            _chain: PhantomData,
        }
    }
}

impl Index<LockId> for LockArena {
    type Output = Lock;

    #[inline]
    fn index(&self, id: LockId) -> &Lock {
        &self.slots[id.0 as usize]
    }
}

impl IndexMut<LockId> for LockArena {
    #[inline]
    fn index_mut(&mut self, id: LockId) -> &mut Lock {
        &mut self.slots[id.0 as usize]
    }
}

pub(crate) struct ListIter<'a, C> {
    arena: &'a LockArena,
    cur: Option<LockId>,
    _chain: PhantomData<C>,
}

impl<C: Chain> Iterator for ListIter<'_, C> {
    type Item = LockId;

    fn next(&mut self) -> Option<LockId> {
        let id = self.cur?;
        self.cur = self.arena.next::<C>(id);
        Some(id)
    }
}
