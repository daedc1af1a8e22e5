//! # Database
//!
//! `Database` is the top-level handle for one JetDB file: it owns the
//! page channel, the catalog of tables, and the relationship list.
//!
//! ## Lifecycle
//!
//! - [`Database::create`] lays out a fresh file: page 0 carries the file
//!   header, page 1 roots the catalog chain.
//! - [`Database::open`] validates the header, reads the catalog chain,
//!   and rebuilds every table (columns, usage map, indexes) from it.
//!
//! ## Catalog Writes
//!
//! Structural changes (table creation, relationship creation) rewrite the
//! serialized catalog under the page channel's exclusive-write latch.
//! Row-level mutation never touches the catalog; a table persists its
//! own usage map when it acquires a page.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use zerocopy::IntoBytes;

use crate::format::{DbFormat, FORMAT_V1};
use crate::relationship::{
    unique_index_name, IndexNameScheme, Relationship, RelationshipBuilder, RelationshipCreator,
};
use crate::schema::persistence::{self, TableMeta};
use crate::schema::ColumnDef;
use crate::storage::{chain, DbFileHeader, PageChannel, PageType, PAGE_SIZE};
use crate::table::{Table, UsageMap};

/// Distinguishes database instances within this process, for the
/// same-database validation of relationship creation.
static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

/// One open JetDB file.
pub struct Database {
    id: u64,
    format: &'static DbFormat,
    channel: Arc<PageChannel>,
    catalog_root: u32,
    catalog: RwLock<Catalog>,
}

#[derive(Default)]
struct Catalog {
    tables: HashMap<String, Arc<Table>>,
    relationships: Vec<Relationship>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.catalog.read();
        f.debug_struct("Database")
            .field("tables", &catalog.tables.len())
            .field("relationships", &catalog.relationships.len())
            .finish()
    }
}

impl Database {
    /// Creates a new database file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let channel = Arc::new(PageChannel::create(path, 2)?);

        let write = channel.start_exclusive_write();

        let mut header = DbFileHeader::new(PAGE_SIZE as u32);
        header.set_catalog_root(1);
        channel.with_page_mut(0, |buf| {
            buf[..header.as_bytes().len()].copy_from_slice(header.as_bytes());
            Ok(())
        })?;

        let blob = persistence::serialize_catalog(&[], &[])?;
        chain::write_chain(&channel, 1, PageType::Catalog, &blob)?;

        write.finish();

        Ok(Self {
            id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
            format: &FORMAT_V1,
            channel,
            catalog_root: 1,
            catalog: RwLock::new(Catalog::default()),
        })
    }

    /// Opens an existing database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let channel = Arc::new(PageChannel::open(path)?);

        let (page_size, catalog_root) = channel.with_page(0, |buf| {
            let header = DbFileHeader::from_bytes(buf)?;
            Ok((header.page_size(), header.catalog_root()))
        })?;
        ensure!(
            page_size as usize == PAGE_SIZE,
            "unsupported page size: {} (expected {})",
            page_size,
            PAGE_SIZE
        );

        let db = Self {
            id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
            format: &FORMAT_V1,
            channel,
            catalog_root,
            catalog: RwLock::new(Catalog::default()),
        };

        let blob = chain::read_chain(&db.channel, catalog_root, PageType::Catalog)
            .wrap_err("failed to read catalog")?;
        let (table_metas, relationships) = persistence::deserialize_catalog(&blob)?;

        {
            let mut catalog = db.catalog.write();
            for meta in table_metas {
                let usage_map = UsageMap::load(&db.channel, meta.map_root)
                    .wrap_err_with(|| format!("failed to load usage map of '{}'", meta.name))?;
                let table = Arc::new(Table::new(
                    meta.name.clone(),
                    meta.columns,
                    db.format,
                    Arc::clone(&db.channel),
                    usage_map,
                    meta.map_root,
                    meta.indexes,
                    db.id,
                ));
                catalog.tables.insert(meta.name, table);
            }
            catalog.relationships = relationships;
        }

        Ok(db)
    }

    pub fn format(&self) -> &'static DbFormat {
        self.format
    }

    pub fn page_channel(&self) -> &Arc<PageChannel> {
        &self.channel
    }

    /// Creates a table and persists the catalog. Column names must be
    /// distinct and the table name unused.
    pub fn create_table(
        &self,
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> Result<Arc<Table>> {
        let name = name.into();
        ensure!(!columns.is_empty(), "table '{}' needs at least one column", name);

        let mut seen = HashSet::new();
        for column in &columns {
            ensure!(
                seen.insert(column.name().to_string()),
                "duplicate column '{}' in table '{}'",
                column.name(),
                name
            );
        }

        {
            let catalog = self.catalog.read();
            ensure!(
                !catalog.tables.contains_key(&name),
                "table '{}' already exists",
                name
            );
        }

        let write = self.channel.start_exclusive_write();

        let map_root = self.channel.allocate_page()?;
        let usage_map = UsageMap::new();
        usage_map.save(&self.channel, map_root)?;

        let table = Arc::new(Table::new(
            name.clone(),
            columns,
            self.format,
            Arc::clone(&self.channel),
            usage_map,
            map_root,
            Vec::new(),
            self.id,
        ));

        self.catalog
            .write()
            .tables
            .insert(name, Arc::clone(&table));
        self.write_catalog()?;

        write.finish();
        Ok(table)
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.catalog.read().tables.get(name).cloned()
    }

    /// Table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.catalog.read().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current relationship records, as a snapshot.
    pub fn relationships(&self) -> Vec<Relationship> {
        self.catalog.read().relationships.clone()
    }

    /// Validates and persists the relationship described by `builder`.
    pub fn create_relationship(&self, builder: &RelationshipBuilder) -> Result<Relationship> {
        RelationshipCreator::create_relationship(self, builder)
    }

    /// Appends the creator's relationship record and rewrites the
    /// catalog. The caller holds the exclusive-write latch.
    pub(crate) fn write_relationship(
        &self,
        creator: &RelationshipCreator<'_>,
    ) -> Result<Relationship> {
        let name = match creator.name() {
            Some(name) => name.to_string(),
            None => {
                let existing: HashSet<String> = self
                    .catalog
                    .read()
                    .relationships
                    .iter()
                    .map(|r| r.name().to_uppercase())
                    .collect();
                unique_index_name(
                    &existing,
                    IndexNameScheme::Secondary {
                        primary_table: creator.primary_table().name(),
                        secondary_table: creator.secondary_table().name(),
                    },
                )
            }
        };

        let relationship = Relationship::new(
            name,
            creator.primary_table().name(),
            creator.secondary_table().name(),
            creator.flags(),
            creator.primary_column_names(),
            creator.secondary_column_names(),
        );

        self.catalog
            .write()
            .relationships
            .push(relationship.clone());
        self.write_catalog()?;

        Ok(relationship)
    }

    /// Rewrites the catalog chain from the in-memory catalog. The caller
    /// holds the exclusive-write latch.
    fn write_catalog(&self) -> Result<()> {
        let catalog = self.catalog.read();

        let mut metas: Vec<TableMeta> = catalog
            .tables
            .values()
            .map(|table| TableMeta {
                name: table.name().to_string(),
                columns: table.columns().to_vec(),
                map_root: table.map_root(),
                indexes: table.indexes(),
            })
            .collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));

        let blob = persistence::serialize_catalog(&metas, &catalog.relationships)?;
        chain::write_chain(&self.channel, self.catalog_root, PageType::Catalog, &blob)
    }

    /// Flushes all dirty pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.channel.sync()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}
