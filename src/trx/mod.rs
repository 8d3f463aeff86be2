// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction state consumed by the lock subsystem.
//!
//! The lock layer reads and writes a handful of per-transaction fields: the
//! id, isolation level, concurrency and query states, the lock it waits on,
//! the deadlock scratch mark and its list of locks. [`TrxSys`] is the
//! registry of all transactions and is owned by the lock kernel so those
//! fields only change under the kernel mutex.

mod read_view;
mod sys;
mod transaction;

pub use read_view::ReadView;
pub use sys::TrxSys;
pub use transaction::{ConcState, DictOp, ErrorInfo, IsolationLevel, QueState, Trx, TrxId};
