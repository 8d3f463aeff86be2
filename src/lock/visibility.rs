// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Consistent-read visibility checks.
//!
//! These run while the caller holds a page latch, so they never take the
//! kernel mutex.

use tracing::error;

use crate::dict::Index;
use crate::page::{Block, Rec};
use crate::trx::{ReadView, TrxId};

use super::kernel::Kernel;

/// Returns true if the version of a clustered index record is visible in
/// `view`.
pub fn clust_rec_cons_read_sees(rec: &Rec, view: &ReadView) -> bool {
    view.sees(rec.trx_id())
}

/// Returns true if a secondary index record is known to be visible in `view`
/// without looking up the clustered index.
///
/// False means the record may or may not be visible. During recovery the
/// page watermark cannot be trusted, so the answer is always false.
pub fn sec_rec_cons_read_sees(block: &Block, view: &ReadView, recovery: bool) -> bool {
    if recovery {
        return false;
    }
    block.max_trx_id() < view.up_limit_id()
}

impl Kernel {
    /// Checks that a transaction id read from a page is lower than the
    /// global counter. A higher id means the page is corrupt.
    pub fn check_trx_id_sanity(&self, trx_id: TrxId, block: &Block, heap_no: usize, index: &Index) -> bool {
        if trx_id >= self.trx_sys.max_trx_id() {
            error!(
                target: "lock",
                %trx_id,
                max_trx_id = %self.trx_sys.max_trx_id(),
                page = %block.id(),
                heap_no,
                index = index.display_name(),
                table = index.table().name(),
                "transaction id associated with record is higher than the global trx id counter; the table is corrupt"
            );
            return false;
        }
        true
    }
}
