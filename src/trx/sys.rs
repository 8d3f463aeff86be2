// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction registry.

use std::collections::{BTreeSet, HashMap};
use std::ops::{Index as IndexOp, IndexMut};
use std::sync::Arc;
use std::time::Instant;

use crate::dict::{Index, Table};
use crate::lock::{ErrorCode, LockError};

use super::transaction::{ConcState, DictOp, ErrorInfo, IsolationLevel, QueState, Trx, TrxId};
use super::ReadView;

/// The set of transactions known to the engine.
///
/// Lives inside the lock kernel so every state transition the lock layer
/// depends on happens under the kernel mutex.
#[derive(Debug)]
pub struct TrxSys {
    /// Next id to assign.
    max_trx_id: TrxId,
    trxs: HashMap<TrxId, Trx>,
    /// Started transactions.
    trx_list: BTreeSet<TrxId>,
    /// Every transaction handle, started or not.
    client_list: BTreeSet<TrxId>,
}

impl Default for TrxSys {
    fn default() -> Self {
        Self::new()
    }
}

impl TrxSys {
    pub fn new() -> Self {
        Self {
            max_trx_id: TrxId(1),
            trxs: HashMap::new(),
            trx_list: BTreeSet::new(),
            client_list: BTreeSet::new(),
        }
    }

    /// Creates a transaction handle in the `NotStarted` state.
    pub fn create(&mut self, isolation: IsolationLevel) -> TrxId {
        let id = self.max_trx_id;
        self.max_trx_id = TrxId(id.0 + 1);
        self.trxs.insert(id, Trx::new(id, isolation));
        self.client_list.insert(id);
        id
    }

    /// Moves a created transaction to `Active`.
    pub fn start(&mut self, id: TrxId) -> Result<(), LockError> {
        let trx = self.trxs.get_mut(&id).ok_or(LockError::UnknownTrx(id))?;
        if trx.conc_state != ConcState::NotStarted {
            return Err(LockError::Generic(format!(
                "transaction {id} is already started"
            )));
        }
        trx.conc_state = ConcState::Active;
        trx.que_state = QueState::Running;
        trx.start_time = Some(Instant::now());
        trx.was_chosen_as_deadlock_victim = false;
        trx.error_state = ErrorCode::Success;
        trx.error_info = None;
        self.trx_list.insert(id);
        Ok(())
    }

    /// Creates and starts a transaction.
    pub fn begin(&mut self, isolation: IsolationLevel) -> TrxId {
        let id = self.create(isolation);
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.conc_state = ConcState::Active;
            trx.start_time = Some(Instant::now());
        }
        self.trx_list.insert(id);
        id
    }

    /// Marks an active transaction as prepared for two-phase commit.
    pub fn prepare(&mut self, id: TrxId) -> Result<(), LockError> {
        let trx = self.trxs.get_mut(&id).ok_or(LockError::UnknownTrx(id))?;
        if trx.conc_state != ConcState::Active {
            return Err(LockError::Generic(format!("transaction {id} is not active")));
        }
        trx.conc_state = ConcState::Prepared;
        Ok(())
    }

    #[inline]
    pub fn get(&self, id: TrxId) -> Option<&Trx> {
        self.trxs.get(&id)
    }

    /// Like [`TrxSys::get`], but an unregistered id is an error.
    #[inline]
    pub fn try_get(&self, id: TrxId) -> Result<&Trx, LockError> {
        self.trxs.get(&id).ok_or(LockError::UnknownTrx(id))
    }

    #[inline]
    pub fn get_mut(&mut self, id: TrxId) -> Option<&mut Trx> {
        self.trxs.get_mut(&id)
    }

    #[inline]
    pub fn contains(&self, id: TrxId) -> bool {
        self.trxs.contains_key(&id)
    }

    /// Iterates the started transactions, newest first.
    #[inline]
    pub fn trx_list(&self) -> impl Iterator<Item = TrxId> + '_ {
        self.trx_list.iter().rev().copied()
    }

    /// Iterates every transaction handle in creation order.
    #[inline]
    pub fn client_list(&self) -> impl Iterator<Item = TrxId> + '_ {
        self.client_list.iter().copied()
    }

    /// Returns the id the next transaction will get.
    #[inline]
    pub fn max_trx_id(&self) -> TrxId {
        self.max_trx_id
    }

    /// Returns the smallest id among started transactions, or `max_trx_id`
    /// if none is started.
    pub fn min_active_id(&self) -> TrxId {
        self.trx_list.first().copied().unwrap_or(self.max_trx_id)
    }

    /// Returns the transaction with `id` if it is started.
    pub fn get_on_id(&self, id: TrxId) -> Option<&Trx> {
        if self.trx_list.contains(&id) {
            self.trxs.get(&id)
        } else {
            None
        }
    }

    /// Returns true if `id` names a transaction that is active or prepared.
    pub fn is_active(&self, id: TrxId) -> bool {
        if id < self.min_active_id() {
            return false;
        }
        self.get_on_id(id).is_some_and(Trx::is_active)
    }

    /// Opens a consistent read view for `id`, or returns the one it holds.
    pub fn open_read_view(&mut self, id: TrxId) -> Option<&ReadView> {
        if self.trxs.get(&id)?.read_view.is_none() {
            let active: Vec<TrxId> = self
                .trx_list()
                .filter(|other| *other != id)
                .filter(|other| {
                    self.trxs
                        .get(other)
                        .is_some_and(|t| t.conc_state != ConcState::CommittedInMemory)
                })
                .collect();
            let view = ReadView::new(id, self.max_trx_id, active);
            self.trxs.get_mut(&id)?.read_view = Some(view);
        }
        self.trxs.get(&id)?.read_view.as_ref()
    }

    pub fn close_read_view(&mut self, id: TrxId) {
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.read_view = None;
        }
    }

    /// Records one more undo log entry for `id`.
    pub fn add_undo(&mut self, id: TrxId, n: u64) {
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.undo_no += n;
        }
    }

    pub fn set_undo_no(&mut self, id: TrxId, undo_no: u64) {
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.undo_no = undo_no;
        }
    }

    pub fn set_dict_operation(&mut self, id: TrxId, op: DictOp) {
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.dict_operation = op;
        }
    }

    /// Records that `id` failed on a duplicate key in `index`.
    pub fn set_duplicate_key(&mut self, id: TrxId, table: &Arc<Table>, index: &Arc<Index>) {
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.error_state = ErrorCode::DuplicateKey;
            trx.error_info = Some(ErrorInfo {
                table: Arc::clone(table),
                index: Some(Arc::clone(index)),
            });
        }
    }

    /// Returns the `(table, index)` of the lock `id` was waiting for when it
    /// was rolled back as a deadlock victim.
    pub fn deadlock_info(&self, id: TrxId) -> Option<&ErrorInfo> {
        let trx = self.trxs.get(&id)?;
        match trx.error_state {
            ErrorCode::Deadlock => trx.error_info.as_ref(),
            _ => None,
        }
    }

    /// Returns the `(table, index)` of the last duplicate key error of `id`.
    pub fn duplicate_key(&self, id: TrxId) -> Option<&ErrorInfo> {
        let trx = self.trxs.get(&id)?;
        match trx.error_state {
            ErrorCode::DuplicateKey => trx.error_info.as_ref(),
            _ => None,
        }
    }

    /// Takes a transaction off the started list after its locks are gone.
    pub(crate) fn finish(&mut self, id: TrxId) {
        self.trx_list.remove(&id);
        if let Some(trx) = self.trxs.get_mut(&id) {
            trx.conc_state = ConcState::NotStarted;
            trx.que_state = QueState::Running;
            trx.read_view = None;
            trx.undo_no = 0;
            trx.wait_lock = None;
            trx.wait_started = None;
            trx.start_time = None;
            trx.dict_operation = DictOp::None;
        }
    }

    /// Drops a transaction handle that is not started.
    pub fn free(&mut self, id: TrxId) -> Result<(), LockError> {
        let trx = self.trxs.get(&id).ok_or(LockError::UnknownTrx(id))?;
        if trx.conc_state != ConcState::NotStarted || !trx.locks.is_empty() {
            return Err(LockError::Generic(format!(
                "transaction {id} is still running"
            )));
        }
        self.trxs.remove(&id);
        self.client_list.remove(&id);
        Ok(())
    }
}

impl IndexOp<TrxId> for TrxSys {
    type Output = Trx;

    fn index(&self, id: TrxId) -> &Trx {
        match self.trxs.get(&id) {
            Some(trx) => trx,
            None => panic!("transaction {id} is not registered"),
        }
    }
}

impl IndexMut<TrxId> for TrxSys {
    fn index_mut(&mut self, id: TrxId) -> &mut Trx {
        match self.trxs.get_mut(&id) {
            Some(trx) => trx,
            None => panic!("transaction {id} is not registered"),
        }
    }
}
