// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Data dictionary handles seen by the lock subsystem.
//!
//! The dictionary itself lives elsewhere; the lock layer only needs to know
//! which table an index belongs to, whether the index is clustered, and the
//! names to print in diagnostics. Handles are shared as `Arc` so a lock can
//! keep pointing at its table or index for as long as it lives.

use std::fmt;
use std::sync::Arc;

/// Prefix of the name of an index that is still being built.
pub const TEMP_INDEX_PREFIX: char = '\u{ff}';

/// Dictionary identifier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dictionary identifier of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub u64);

/// A table descriptor.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    name: String,
}

impl Table {
    /// Creates a table descriptor.
    pub fn new(id: u64, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: TableId(id),
            name: name.into(),
        })
    }

    /// Returns the table id.
    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the table name, `database/table`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An index descriptor.
#[derive(Debug)]
pub struct Index {
    id: IndexId,
    name: String,
    table: Arc<Table>,
    clustered: bool,
}

impl Index {
    /// Creates the clustered index of `table`.
    pub fn clustered(id: u64, name: impl Into<String>, table: &Arc<Table>) -> Arc<Self> {
        Arc::new(Self {
            id: IndexId(id),
            name: name.into(),
            table: Arc::clone(table),
            clustered: true,
        })
    }

    /// Creates a secondary index of `table`.
    pub fn secondary(id: u64, name: impl Into<String>, table: &Arc<Table>) -> Arc<Self> {
        Arc::new(Self {
            id: IndexId(id),
            name: name.into(),
            table: Arc::clone(table),
            clustered: false,
        })
    }

    #[inline]
    pub fn id(&self) -> IndexId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table this index belongs to.
    #[inline]
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Returns true for the clustered (primary key) index.
    #[inline]
    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Returns true if the index is still being created.
    #[inline]
    pub fn is_being_built(&self) -> bool {
        self.name.starts_with(TEMP_INDEX_PREFIX)
    }

    /// Returns the printable index name without the build prefix.
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches(TEMP_INDEX_PREFIX)
    }
}
