// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Consistent read views.

use super::TrxId;

/// A snapshot of the transaction system taken when a consistent read starts.
///
/// Visibility of a version stamped with `trx_id`:
/// - `trx_id < up_limit_id`: committed before the snapshot, visible
/// - `trx_id >= low_limit_id`: started after the snapshot, invisible
/// - otherwise visible unless `trx_id` was active when the view was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadView {
    /// Ids at or above this are invisible.
    pub(crate) low_limit_id: TrxId,
    /// Ids below this are visible.
    pub(crate) up_limit_id: TrxId,
    /// The transaction that opened the view.
    pub(crate) creator: TrxId,
    /// Transactions active when the view was opened, descending.
    pub(crate) trx_ids: Vec<TrxId>,
}

impl ReadView {
    /// Builds a view from the active ids (any order) and the next id to be
    /// assigned.
    pub fn new(creator: TrxId, low_limit_id: TrxId, mut trx_ids: Vec<TrxId>) -> Self {
        trx_ids.sort_unstable_by(|a, b| b.cmp(a));
        trx_ids.dedup();
        let up_limit_id = trx_ids.last().copied().unwrap_or(low_limit_id);
        Self {
            low_limit_id,
            up_limit_id,
            creator,
            trx_ids,
        }
    }

    #[inline]
    pub fn low_limit_id(&self) -> TrxId {
        self.low_limit_id
    }

    #[inline]
    pub fn up_limit_id(&self) -> TrxId {
        self.up_limit_id
    }

    #[inline]
    pub fn creator(&self) -> TrxId {
        self.creator
    }

    /// Returns true if changes made by `trx_id` are visible in this view.
    pub fn sees(&self, trx_id: TrxId) -> bool {
        if trx_id < self.up_limit_id {
            return true;
        }
        if trx_id >= self.low_limit_id {
            return false;
        }
        self.trx_ids.binary_search_by(|id| trx_id.cmp(id)).is_err()
    }
}
