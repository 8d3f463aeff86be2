// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! CinderDB: the lock subsystem of a transactional B-tree storage engine
//!
//! This crate provides table and record locking with gap semantics, implicit
//! lock conversion, deadlock detection, lock inheritance across page
//! reorganizations and the consistent read checks used by MVCC.

pub mod dict;
pub mod lock;
pub mod page;
pub mod trx;

pub use dict::{Index, IndexId, Table, TableId};
pub use lock::{
    ErrorCode, LockError, LockFlags, LockMode, LockStatus, LockSys, LockSysConfig,
    LockWaitHandler, OpFlags, ThreadParker, TypeMode,
};
pub use page::{Block, PageId, Rec};
pub use trx::{ConcState, IsolationLevel, QueState, ReadView, TrxId};
