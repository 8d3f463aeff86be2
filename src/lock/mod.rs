// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Row and table locking with deadlock detection.
//!
//! This module provides the lock subsystem of a B-tree storage engine:
//! - Intention and ordinary table locks (IS, IX, S, X, AUTO_INC)
//! - Record locks kept as per-page bitmaps, with gap, not-gap and insert
//!   intention variants
//! - Implicit record locks derived from the transaction id on the row
//! - Depth-first deadlock detection with rollback-cost victim choice
//! - Lock inheritance when pages split, merge or are reorganized
//!
//! # Key Concepts
//!
//! ## Gap Locks
//!
//! A record lock can cover the record, the gap before it, or both. Gap locks
//! only ever conflict with insert intention locks, so any number of
//! transactions may hold gap locks on the same gap. The supremum record of a
//! page stands for the gap after the last user record and only carries gap
//! locks.
//!
//! ## Implicit Locks
//!
//! A transaction that inserted or modified a clustered index record holds an
//! implicit exclusive lock on it while it stays active. No lock object exists
//! until another transaction wants the record, at which point the implicit
//! lock is converted into an explicit one on the owner's behalf.
//!
//! ## Waiting
//!
//! A request that cannot be granted is enqueued as a waiting lock and the
//! deadlock detector runs. The caller then releases its page latches and
//! calls [`LockSys::wait_for_grant`].
//!
//! # Example
//!
//! ```
//! use cinderdb::dict::{Index, Table};
//! use cinderdb::lock::{LockFlags, LockMode, LockStatus, LockSys, OpFlags};
//! use cinderdb::page::Block;
//! use cinderdb::trx::{IsolationLevel, TrxId};
//!
//! let sys = LockSys::default();
//! let table = Table::new(1, "shop/orders");
//! let index = Index::clustered(1, "PRIMARY", &table);
//! let mut block = Block::new(0, 3);
//! let heap_no = block.insert("order-17", TrxId(0));
//!
//! let trx = sys.trx_begin(IsolationLevel::RepeatableRead);
//! assert_eq!(
//!     sys.lock_table(OpFlags::NONE, &table, LockMode::IX, trx).unwrap(),
//!     LockStatus::Granted
//! );
//! let status = sys
//!     .rec_lock(LockMode::X, LockFlags::REC_NOT_GAP, &block, heap_no, &index, trx)
//!     .unwrap();
//! assert_eq!(status, LockStatus::Granted);
//! assert_eq!(sys.number_of_rows_locked(trx), 1);
//!
//! sys.commit(trx).unwrap();
//! assert_eq!(sys.number_of_rows_locked(trx), 0);
//! ```

mod arena;
mod bitmap;
mod config;
mod deadlock;
mod error;
mod hash;
mod inherit;
mod iter;
mod kernel;
mod mode;
mod object;
mod print;
mod rec;
mod release;
mod row;
mod sys;
mod table;
mod validate;
mod visibility;
mod wait;

pub use arena::{ListBase, LockArena};
pub use bitmap::LockBitmap;
pub use config::{LockSysConfig, PanicHook};
pub use error::{ErrorCode, LockError, LockStatus};
pub use hash::RecLockHash;
pub use iter::LockQueueIterator;
pub use kernel::Kernel;
pub use mode::{LockFlags, LockMode, OpFlags, TypeMode};
pub use object::{rec_has_to_wait, Lock, LockId, LockKind, RecLock, TableLock};
pub use row::{NoRowVersions, RowVersions};
pub use sys::LockSys;
pub use visibility::{clust_rec_cons_read_sees, sec_rec_cons_read_sees};
pub use wait::{LockWaitHandler, ThreadParker};

/// Deadlock search gives up after this many lock visits.
pub const LOCK_MAX_N_STEPS_IN_DEADLOCK_CHECK: usize = 1_000_000;

/// Deadlock search gives up when the waits-for path gets longer than this.
pub const LOCK_MAX_DEPTH_IN_DEADLOCK_CHECK: usize = 200;

/// Locks released before the kernel mutex is yielded on commit.
pub const LOCK_RELEASE_KERNEL_INTERVAL: usize = 1000;

/// Spare bits allocated in a record lock bitmap beyond the page's heap size,
/// so records inserted later can reuse the lock.
pub const LOCK_PAGE_BITMAP_MARGIN: usize = 64;
