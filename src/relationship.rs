//! # Relationships
//!
//! A relationship is a referential constraint between two tables: an
//! ordered list of column pairs linking the primary (referenced) side to
//! the secondary (referencing) side, plus a flag word controlling
//! integrity enforcement and cascade behavior.
//!
//! Creating a relationship validates the constraint (tables present, same
//! database, parallel column lists with matching types), optionally
//! ensures the indexes integrity enforcement needs (a unique index on the
//! primary columns, an index on the secondary columns), and persists the
//! record through the database catalog, all under the page channel's
//! exclusive-write latch.
//!
//! ## Index Naming
//!
//! Integrity indexes get generated names:
//!
//! - primary side: `.rC`, `.rD`, … `.rZ`, then wrapping past `Z` to
//!   `.ra`, `.rb`, …
//! - secondary side: `<primary><secondary>`, then `<primary><secondary>1`,
//!   `<primary><secondary>2`, …
//!
//! Collision checks against existing names are case-insensitive.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashSet;

use crate::database::Database;
use crate::schema::{ColumnDef, IndexDef};
use crate::table::Table;

/// Flag: the relationship is one-to-one.
pub const ONE_TO_ONE_FLAG: u32 = 0x0001;
/// Flag: referential integrity is not enforced.
pub const NO_REFERENTIAL_INTEGRITY_FLAG: u32 = 0x0002;
/// Flag: updates to the primary columns cascade to the secondary side.
pub const CASCADE_UPDATES_FLAG: u32 = 0x0100;
/// Flag: deletes of primary rows cascade to the secondary side.
pub const CASCADE_DELETES_FLAG: u32 = 0x1000;

/// A persisted relationship record.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    name: String,
    primary_table: String,
    secondary_table: String,
    flags: u32,
    primary_columns: Vec<String>,
    secondary_columns: Vec<String>,
}

impl Relationship {
    pub(crate) fn new(
        name: impl Into<String>,
        primary_table: impl Into<String>,
        secondary_table: impl Into<String>,
        flags: u32,
        primary_columns: Vec<String>,
        secondary_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_table: primary_table.into(),
            secondary_table: secondary_table.into(),
            flags,
            primary_columns,
            secondary_columns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_table(&self) -> &str {
        &self.primary_table
    }

    pub fn secondary_table(&self) -> &str {
        &self.secondary_table
    }

    pub fn primary_columns(&self) -> &[String] {
        &self.primary_columns
    }

    pub fn secondary_columns(&self) -> &[String] {
        &self.secondary_columns
    }

    pub fn column_count(&self) -> usize {
        self.primary_columns.len()
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_referential_integrity(&self) -> bool {
        self.flags & NO_REFERENTIAL_INTEGRITY_FLAG == 0
    }

    pub fn is_one_to_one(&self) -> bool {
        self.flags & ONE_TO_ONE_FLAG != 0
    }

    pub fn cascades_updates(&self) -> bool {
        self.flags & CASCADE_UPDATES_FLAG != 0
    }

    pub fn cascades_deletes(&self) -> bool {
        self.flags & CASCADE_DELETES_FLAG != 0
    }
}

/// Assembles the description of a relationship to create. Referential
/// integrity is off by default; enabling it makes creation ensure the
/// integrity indexes exist.
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    from_table: String,
    to_table: String,
    primary_columns: Vec<String>,
    secondary_columns: Vec<String>,
    flags: u32,
    name: Option<String>,
}

impl RelationshipBuilder {
    pub fn new(from_table: impl Into<String>, to_table: impl Into<String>) -> Self {
        Self {
            from_table: from_table.into(),
            to_table: to_table.into(),
            primary_columns: Vec::new(),
            secondary_columns: Vec::new(),
            flags: NO_REFERENTIAL_INTEGRITY_FLAG,
            name: None,
        }
    }

    /// Adds a linked column pair (primary side, secondary side).
    pub fn add_columns(
        mut self,
        primary_column: impl Into<String>,
        secondary_column: impl Into<String>,
    ) -> Self {
        self.primary_columns.push(primary_column.into());
        self.secondary_columns.push(secondary_column.into());
        self
    }

    /// Replaces the primary-side column list.
    pub fn with_primary_columns(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.primary_columns = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Replaces the secondary-side column list.
    pub fn with_secondary_columns(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.secondary_columns = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Requests referential integrity enforcement.
    pub fn with_referential_integrity(mut self) -> Self {
        self.flags &= !NO_REFERENTIAL_INTEGRITY_FLAG;
        self
    }

    pub fn one_to_one(mut self) -> Self {
        self.flags |= ONE_TO_ONE_FLAG;
        self
    }

    pub fn cascade_updates(mut self) -> Self {
        self.flags |= CASCADE_UPDATES_FLAG;
        self
    }

    pub fn cascade_deletes(mut self) -> Self {
        self.flags |= CASCADE_DELETES_FLAG;
        self
    }

    pub fn from_table(&self) -> &str {
        &self.from_table
    }

    pub fn to_table(&self) -> &str {
        &self.to_table
    }

    pub fn has_referential_integrity(&self) -> bool {
        self.flags & NO_REFERENTIAL_INTEGRITY_FLAG == 0
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}

/// Validates and persists one relationship. Short-lived: constructed by
/// [`Database::create_relationship`], used once, discarded.
pub(crate) struct RelationshipCreator<'a> {
    database: &'a Database,
    primary_table: Arc<Table>,
    secondary_table: Arc<Table>,
    primary_columns: Vec<ColumnDef>,
    secondary_columns: Vec<ColumnDef>,
    flags: u32,
    name: Option<String>,
}

impl<'a> RelationshipCreator<'a> {
    /// Creates the relationship described by `builder` in the database.
    pub(crate) fn create_relationship(
        database: &'a Database,
        builder: &RelationshipBuilder,
    ) -> Result<Relationship> {
        let mut creator = Self::resolve(database, builder)?;
        creator.validate(builder)?;

        let write = creator
            .primary_table
            .page_channel()
            .start_exclusive_write();

        if creator.has_referential_integrity() {
            creator.ensure_integrity_indexes();
        }
        let relationship = creator.database.write_relationship(&creator)?;

        write.finish();
        Ok(relationship)
    }

    fn resolve(database: &'a Database, builder: &RelationshipBuilder) -> Result<Self> {
        let primary_table = database.table(builder.from_table());
        let secondary_table = database.table(builder.to_table());
        let (Some(primary_table), Some(secondary_table)) = (primary_table, secondary_table) else {
            eyre::bail!("two tables are required in relationship");
        };

        Ok(Self {
            database,
            primary_table,
            secondary_table,
            primary_columns: Vec::new(),
            secondary_columns: Vec::new(),
            flags: builder.flags(),
            name: builder.name.clone(),
        })
    }

    fn validate(&mut self, builder: &RelationshipBuilder) -> Result<()> {
        ensure!(
            self.primary_table.database_id() == self.secondary_table.database_id(),
            "tables are not from same database"
        );

        ensure!(
            !builder.primary_columns.is_empty() && !builder.secondary_columns.is_empty(),
            "missing columns in relationship"
        );

        ensure!(
            builder.primary_columns.len() == builder.secondary_columns.len(),
            "must have same number of columns on each side of relationship"
        );

        self.primary_columns = resolve_columns(&self.primary_table, &builder.primary_columns)?;
        self.secondary_columns =
            resolve_columns(&self.secondary_table, &builder.secondary_columns)?;

        for (pcol, scol) in self.primary_columns.iter().zip(&self.secondary_columns) {
            ensure!(
                pcol.data_type() == scol.data_type(),
                "matched columns must have the same data type"
            );
        }

        Ok(())
    }

    /// Makes sure integrity enforcement has its indexes: a unique index
    /// over the primary columns and an index over the secondary columns.
    fn ensure_integrity_indexes(&self) {
        let primary_names: Vec<String> =
            self.primary_columns.iter().map(|c| c.name().to_string()).collect();
        let secondary_names: Vec<String> = self
            .secondary_columns
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let has_unique_primary = self
            .primary_table
            .indexes()
            .iter()
            .any(|idx| idx.is_unique() && idx.covers(&primary_names));
        if !has_unique_primary {
            let name = self.get_unique_index_name(&self.primary_table);
            self.primary_table
                .add_index(IndexDef::new(name, primary_names, true));
        }

        let has_secondary = self
            .secondary_table
            .indexes()
            .iter()
            .any(|idx| idx.covers(&secondary_names));
        if !has_secondary {
            let name = self.get_unique_index_name(&self.secondary_table);
            self.secondary_table
                .add_index(IndexDef::new(name, secondary_names, false));
        }
    }

    fn get_unique_index_name(&self, table: &Table) -> String {
        let existing = index_name_set(table);

        if table.name() == self.primary_table.name() {
            unique_index_name(&existing, IndexNameScheme::Primary)
        } else {
            unique_index_name(
                &existing,
                IndexNameScheme::Secondary {
                    primary_table: self.primary_table.name(),
                    secondary_table: self.secondary_table.name(),
                },
            )
        }
    }

    pub(crate) fn has_referential_integrity(&self) -> bool {
        self.flags & NO_REFERENTIAL_INTEGRITY_FLAG == 0
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn flags(&self) -> u32 {
        self.flags
    }

    pub(crate) fn primary_table(&self) -> &Arc<Table> {
        &self.primary_table
    }

    pub(crate) fn secondary_table(&self) -> &Arc<Table> {
        &self.secondary_table
    }

    pub(crate) fn primary_column_names(&self) -> Vec<String> {
        self.primary_columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub(crate) fn secondary_column_names(&self) -> Vec<String> {
        self.secondary_columns
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }
}

fn resolve_columns(table: &Table, names: &[String]) -> Result<Vec<ColumnDef>> {
    names
        .iter()
        .map(|name| match table.get_column(name) {
            Some(column) => Ok(column.clone()),
            None => eyre::bail!("table '{}' has no column '{}'", table.name(), name),
        })
        .collect()
}

/// Naming scheme for a generated integrity index.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IndexNameScheme<'a> {
    /// `.rC`, `.rD`, … wrapping past `Z` to lowercase.
    Primary,
    /// `<primary><secondary>`, then with `1`, `2`, … appended.
    Secondary {
        primary_table: &'a str,
        secondary_table: &'a str,
    },
}

/// Uppercased names of a table's existing indexes, for case-insensitive
/// collision checks.
pub(crate) fn index_name_set(table: &Table) -> HashSet<String> {
    table
        .indexes()
        .iter()
        .map(|idx| idx.name().to_uppercase())
        .collect()
}

/// Picks the first name of the scheme's sequence that does not collide
/// (case-insensitively) with an existing name.
pub(crate) fn unique_index_name(existing_upper: &HashSet<String>, scheme: IndexNameScheme) -> String {
    match scheme {
        IndexNameScheme::Primary => {
            let mut suffix = 'C';
            loop {
                let name = format!(".r{}", suffix);
                if !existing_upper.contains(&name.to_uppercase()) {
                    return name;
                }
                suffix = (suffix as u8 + 1) as char;
                // '[' follows 'Z'; wrap to the lowercase letters.
                if suffix == '[' {
                    suffix = 'a';
                }
            }
        }
        IndexNameScheme::Secondary {
            primary_table,
            secondary_table,
        } => {
            let base = format!("{}{}", primary_table, secondary_table);
            let mut count = 0u32;
            loop {
                let name = if count == 0 {
                    base.clone()
                } else {
                    format!("{}{}", base, count)
                };
                if !existing_upper.contains(&name.to_uppercase()) {
                    return name;
                }
                count += 1;
            }
        }
    }
}
