//! # JetDB - Single-File Page-Structured Database Engine
//!
//! JetDB is an embedded database library for a proprietary single-file
//! format in the classic desktop-database tradition: fixed-size pages, a
//! per-page row slot table, deletion tombstones, and a page-ownership map
//! attributing pages to tables. This Rust implementation prioritizes:
//!
//! - **Robust traversal**: cursors survive concurrent row deletion,
//!   insertion, and page growth while a scan is in flight
//! - **Stable row identity**: a row keeps its `(page, slot)` id across
//!   deletes of its neighbours
//! - **Zero-copy storage**: pages live in a memory-mapped file and are
//!   copied out only into per-cursor scratch buffers
//!
//! ## Quick Start
//!
//! ```ignore
//! use jetdb::{ColumnDef, Cursor, Database, DataType, OwnedValue};
//!
//! let db = Database::create("./mydb.jet")?;
//! let table = db.create_table(
//!     "users",
//!     vec![
//!         ColumnDef::new("id", DataType::Int),
//!         ColumnDef::new("name", DataType::Text),
//!     ],
//! )?;
//!
//! table.add_row(vec![OwnedValue::Int(1), OwnedValue::Text("Alice".into())])?;
//!
//! let mut cursor = Cursor::create_cursor(table.clone());
//! while let Some(row) = cursor.get_next_row(None)? {
//!     println!("{:?}", row.get("name"));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Database)        │
//! ├──────────────────┬──────────────────┤
//! │  Cursor / Rows   │  Relationships   │
//! ├──────────────────┴──────────────────┤
//! │   Table (rows, slots, usage map)    │
//! ├─────────────────────────────────────┤
//! │       Record Serialization          │
//! ├─────────────────────────────────────┤
//! │  Page Channel (latch, allocation)   │
//! ├─────────────────────────────────────┤
//! │      Memory-Mapped File I/O         │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A database is a single file of 4096-byte pages:
//!
//! ```text
//! page 0    file header (magic, version, catalog root)
//! page 1+   catalog chain and data pages, interleaved
//! ```
//!
//! Data pages carry a row slot table growing down from the page header
//! and row content growing up from the page end. Each slot is a 16-bit
//! row-start word whose high bits flag deleted and overflow rows.
//!
//! ## Module Overview
//!
//! - [`storage`]: memory-mapped page channel, page layout, exclusive-write latch
//! - [`format`]: on-disk layout constants
//! - [`table`]: tables, row states, the page-ownership usage map
//! - [`cursor`]: restartable bidirectional row cursors
//! - [`matcher`]: pluggable column-value equality
//! - [`relationship`]: referential constraints between tables
//! - [`schema`]: column/index definitions and catalog persistence
//!
//! ## Concurrency Model
//!
//! A cursor is a single-task resource. Distinct cursors over the same
//! table may run on distinct threads; they share only the page channel,
//! whose exclusive-write latch serialises structural mutation (row
//! deletes, row appends, relationship writes).

pub mod cursor;
pub mod database;
pub mod format;
pub mod matcher;
pub mod record;
pub mod relationship;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;

pub use cursor::{Cursor, RowId, Rows, FIRST_ROW_ID, LAST_ROW_ID};
pub use database::Database;
pub use matcher::{CaseInsensitiveColumnMatcher, ColumnMatcher, SimpleColumnMatcher};
pub use relationship::{Relationship, RelationshipBuilder};
pub use schema::{ColumnDef, IndexDef};
pub use table::{Row, Table};
pub use types::{DataType, OwnedValue};
