// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock subsystem error types.

use crate::trx::TrxId;

/// Engine-wide status codes, numbered as the rest of the engine expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 10,
    Error = 11,
    Interrupted = 12,
    OutOfMemory = 13,
    LockWait = 15,
    Deadlock = 16,
    DuplicateKey = 18,
    QueThrSuspended = 19,
    LockWaitTimeout = 35,
    Corruption = 39,
    LockTableFull = 45,
}

impl ErrorCode {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Outcome of a lock request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is held.
    Granted,
    /// A waiting lock was enqueued; the caller must suspend until it is
    /// granted or cancelled.
    Waiting,
}

impl LockStatus {
    #[inline]
    pub fn code(self) -> ErrorCode {
        match self {
            LockStatus::Granted => ErrorCode::Success,
            LockStatus::Waiting => ErrorCode::LockWait,
        }
    }
}

/// Errors that can occur in lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("deadlock found when trying to get lock; transaction rolled back")]
    Deadlock,

    #[error("lock wait timeout exceeded")]
    WaitTimeout,

    #[error("query thread was stopped before the lock request")]
    Suspended,

    #[error("lock wait interrupted")]
    Interrupted,

    #[error("lock invariant violated: {message}")]
    Invariant { message: String },

    #[error("unknown transaction {0}")]
    UnknownTrx(TrxId),

    #[error("{0}")]
    Generic(String),
}

impl LockError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        LockError::Invariant {
            message: message.into(),
        }
    }

    /// Maps the error onto the engine-wide status code.
    pub fn code(&self) -> ErrorCode {
        match self {
            LockError::Deadlock => ErrorCode::Deadlock,
            LockError::WaitTimeout => ErrorCode::LockWaitTimeout,
            LockError::Suspended => ErrorCode::QueThrSuspended,
            LockError::Interrupted => ErrorCode::Interrupted,
            LockError::Invariant { .. } | LockError::UnknownTrx(_) | LockError::Generic(_) => {
                ErrorCode::Error
            }
        }
    }
}
