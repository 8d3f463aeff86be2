// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock modes, flags and their algebra.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LockMode {
    /// Intention shared.
    IS = 0,
    /// Intention exclusive.
    IX = 1,
    /// Shared.
    S = 2,
    /// Exclusive.
    X = 3,
    /// Table-level auto-increment lock.
    AutoInc = 4,
}

const LOCK_NUM: u32 = 5;

const fn lk(a: LockMode, b: LockMode) -> u32 {
    1 << (a as u32 * LOCK_NUM + b as u32)
}

const fn lks(a: LockMode, b: LockMode) -> u32 {
    lk(a, b) | lk(b, a)
}

use LockMode::{AutoInc, IS, IX, S, X};

/// Pairs `(held, requested)` that can coexist.
const LOCK_COMPATIBILITY: u32 = lk(IS, IS)
    | lk(IX, IX)
    | lk(S, S)
    | lks(IX, IS)
    | lks(IS, AutoInc)
    | lks(S, IS)
    | lks(AutoInc, IX);

/// Pairs `(a, b)` where `a` is at least as strong as `b`.
const LOCK_STRENGTH: u32 = lk(IS, IS)
    | lk(IX, IS)
    | lk(IX, IX)
    | lk(S, IS)
    | lk(S, S)
    | lk(AutoInc, AutoInc)
    | lk(X, IS)
    | lk(X, IX)
    | lk(X, S)
    | lk(X, AutoInc)
    | lk(X, X);

impl LockMode {
    pub const ALL: [LockMode; 5] = [IS, IX, S, X, AutoInc];

    /// Returns true if a lock in `self` can coexist with one in `other`.
    #[inline]
    pub const fn is_compatible(self, other: LockMode) -> bool {
        LOCK_COMPATIBILITY & lk(self, other) != 0
    }

    /// Returns true if `self` grants at least the access `other` does.
    #[inline]
    pub const fn is_stronger_or_eq(self, other: LockMode) -> bool {
        LOCK_STRENGTH & lk(self, other) != 0
    }

    /// Decodes the low mode bits of a packed type-mode word.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits & LockFlags::MODE_MASK {
            0 => Some(IS),
            1 => Some(IX),
            2 => Some(S),
            3 => Some(X),
            4 => Some(AutoInc),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            IS => "IS",
            IX => "IX",
            S => "S",
            X => "X",
            AutoInc => "AUTO_INC",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock type and precise-mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockFlags(u32);

impl LockFlags {
    pub(crate) const MODE_MASK: u32 = 0xF;
    const TYPE_MASK: u32 = 0xF0;

    /// Next-key lock: the record and the gap before it.
    pub const ORDINARY: LockFlags = LockFlags(0);
    pub const TABLE: LockFlags = LockFlags(16);
    pub const REC: LockFlags = LockFlags(32);
    /// The lock is not yet granted.
    pub const WAIT: LockFlags = LockFlags(256);
    /// Only the gap before the record is locked.
    pub const GAP: LockFlags = LockFlags(512);
    /// Only the record is locked.
    pub const REC_NOT_GAP: LockFlags = LockFlags(1024);
    /// A gap lock taken by an insert; waits for gap locks but blocks none.
    pub const INSERT_INTENTION: LockFlags = LockFlags(2048);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: LockFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub const fn intersects(self, other: LockFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn union(self, other: LockFlags) -> LockFlags {
        LockFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn difference(self, other: LockFlags) -> LockFlags {
        LockFlags(self.0 & !other.0)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for LockFlags {
    type Output = LockFlags;

    fn bitor(self, rhs: LockFlags) -> LockFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for LockFlags {
    fn bitor_assign(&mut self, rhs: LockFlags) {
        *self = self.union(rhs);
    }
}

/// A lock mode together with its type and precise-mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeMode {
    mode: LockMode,
    flags: LockFlags,
}

impl TypeMode {
    #[inline]
    pub const fn new(mode: LockMode, flags: LockFlags) -> Self {
        Self { mode, flags }
    }

    /// Decodes a packed type-mode word.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match LockMode::from_bits(bits) {
            Some(mode) => Some(Self {
                mode,
                flags: LockFlags(bits & !LockFlags::MODE_MASK),
            }),
            None => None,
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.mode as u32 | self.flags.0
    }

    #[inline]
    pub const fn mode(self) -> LockMode {
        self.mode
    }

    #[inline]
    pub const fn flags(self) -> LockFlags {
        self.flags
    }

    /// Returns the `TABLE`/`REC` bits.
    #[inline]
    pub const fn lock_type(self) -> LockFlags {
        LockFlags(self.flags.0 & LockFlags::TYPE_MASK)
    }

    #[inline]
    pub const fn with(self, flags: LockFlags) -> Self {
        Self::new(self.mode, self.flags.union(flags))
    }

    #[inline]
    pub const fn without(self, flags: LockFlags) -> Self {
        Self::new(self.mode, self.flags.difference(flags))
    }

    #[inline]
    pub const fn has(self, flags: LockFlags) -> bool {
        self.flags.contains(flags)
    }

    #[inline]
    pub const fn is_wait(self) -> bool {
        self.has(LockFlags::WAIT)
    }

    #[inline]
    pub const fn is_gap(self) -> bool {
        self.has(LockFlags::GAP)
    }

    #[inline]
    pub const fn is_rec_not_gap(self) -> bool {
        self.has(LockFlags::REC_NOT_GAP)
    }

    #[inline]
    pub const fn is_insert_intention(self) -> bool {
        self.has(LockFlags::INSERT_INTENTION)
    }
}

impl From<LockMode> for TypeMode {
    fn from(mode: LockMode) -> Self {
        TypeMode::new(mode, LockFlags::ORDINARY)
    }
}

impl BitOr<LockFlags> for LockMode {
    type Output = TypeMode;

    fn bitor(self, rhs: LockFlags) -> TypeMode {
        TypeMode::new(self, rhs)
    }
}

impl BitOr<LockFlags> for TypeMode {
    type Output = TypeMode;

    fn bitor(self, rhs: LockFlags) -> TypeMode {
        self.with(rhs)
    }
}

/// Caller flags of the row and table entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(u32);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Do not take any locks; the caller already holds what it needs.
    pub const NO_LOCKING: OpFlags = OpFlags(1);

    #[inline]
    pub const fn no_locking(self) -> bool {
        self.0 & Self::NO_LOCKING.0 != 0
    }
}
