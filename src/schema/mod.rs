//! # Schema Definition Module
//!
//! This module provides the schema definition types for JetDB tables,
//! columns, and indexes, plus the catalog that tracks every table and
//! relationship in a database.
//!
//! ## Overview
//!
//! - **Columns**: named, typed fields (`ColumnDef`)
//! - **Indexes**: named column lists with a uniqueness flag (`IndexDef`);
//!   index structures themselves live outside this crate's scope, but
//!   their definitions participate in relationship enforcement and in
//!   the unique-index naming scheme
//! - **Catalog**: the in-memory registry persisted to the catalog page
//!   chain (see `persistence`)
//!
//! Schema types are plain data; the `Database` wraps the catalog in a
//! lock for concurrent access.

pub mod persistence;

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    name: String,
    columns: Vec<String>,
    unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// True if this index covers exactly the given columns, in order.
    pub fn covers(&self, columns: &[String]) -> bool {
        self.columns == columns
    }
}
