// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction state read and written by the lock subsystem.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::dict::{Index, Table};
use crate::lock::{ErrorCode, ListBase, LockId};

use super::ReadView;

/// Unique transaction identifier, assigned in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TrxId(pub u64);

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads see uncommitted changes.
    ReadUncommitted,
    /// Each consistent read takes a fresh snapshot; no gap locking.
    ReadCommitted,
    /// One snapshot per transaction; next-key locking.
    #[default]
    RepeatableRead,
    /// Like repeatable read, with plain reads taking shared locks.
    Serializable,
}

/// Concurrency state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcState {
    NotStarted,
    Active,
    CommittedInMemory,
    Prepared,
}

impl ConcState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcState::NotStarted => "not started",
            ConcState::Active => "ACTIVE",
            ConcState::CommittedInMemory => "COMMITTED IN MEMORY",
            ConcState::Prepared => "ACTIVE (PREPARED)",
        }
    }
}

/// What the query thread of a transaction is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueState {
    Running,
    LockWait,
    RollingBack,
}

/// Kind of dictionary operation a transaction performs, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictOp {
    #[default]
    None,
    Table,
    Index,
}

/// The `(table, index)` pair identifying the cause of the last error.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub table: Arc<Table>,
    pub index: Option<Arc<Index>>,
}

/// A transaction as seen by the lock subsystem.
#[derive(Debug)]
pub struct Trx {
    pub(crate) id: TrxId,
    pub(crate) isolation: IsolationLevel,
    pub(crate) conc_state: ConcState,
    pub(crate) que_state: QueState,
    pub(crate) dict_operation: DictOp,
    /// The lock this transaction is suspended on.
    pub(crate) wait_lock: Option<LockId>,
    pub(crate) was_chosen_as_deadlock_victim: bool,
    /// Set once the deadlock search has exhausted this transaction's subtree.
    pub(crate) deadlock_mark: bool,
    pub(crate) wait_started: Option<Instant>,
    pub(crate) start_time: Option<Instant>,
    /// Number of undo log records written; part of the rollback weight.
    pub(crate) undo_no: u64,
    /// Every lock this transaction created, in creation order.
    pub(crate) locks: ListBase,
    /// Arena slots to return when the transaction ends.
    pub(crate) lock_heap: Vec<LockId>,
    pub(crate) read_view: Option<ReadView>,
    pub(crate) error_state: ErrorCode,
    pub(crate) error_info: Option<ErrorInfo>,
}

impl Trx {
    pub(crate) fn new(id: TrxId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            conc_state: ConcState::NotStarted,
            que_state: QueState::Running,
            dict_operation: DictOp::None,
            wait_lock: None,
            was_chosen_as_deadlock_victim: false,
            deadlock_mark: false,
            wait_started: None,
            start_time: None,
            undo_no: 0,
            locks: ListBase::default(),
            lock_heap: Vec::new(),
            read_view: None,
            error_state: ErrorCode::Success,
            error_info: None,
        }
    }

    #[inline]
    pub fn id(&self) -> TrxId {
        self.id
    }

    #[inline]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    #[inline]
    pub fn conc_state(&self) -> ConcState {
        self.conc_state
    }

    #[inline]
    pub fn que_state(&self) -> QueState {
        self.que_state
    }

    #[inline]
    pub fn dict_operation(&self) -> DictOp {
        self.dict_operation
    }

    /// Returns the lock the transaction is waiting for.
    #[inline]
    pub fn wait_lock(&self) -> Option<LockId> {
        self.wait_lock
    }

    #[inline]
    pub fn was_chosen_as_deadlock_victim(&self) -> bool {
        self.was_chosen_as_deadlock_victim
    }

    #[inline]
    pub fn undo_no(&self) -> u64 {
        self.undo_no
    }

    /// Returns the number of lock structs the transaction owns.
    #[inline]
    pub fn n_locks(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    pub fn read_view(&self) -> Option<&ReadView> {
        self.read_view.as_ref()
    }

    #[inline]
    pub fn error_state(&self) -> ErrorCode {
        self.error_state
    }

    /// Rollback cost estimate used to pick a deadlock victim.
    #[inline]
    pub fn weight(&self) -> u64 {
        self.undo_no + self.locks.len() as u64
    }

    /// Returns true while the transaction is started and not yet committed.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self.conc_state, ConcState::Active | ConcState::Prepared)
    }
}
