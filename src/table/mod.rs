//! # Tables
//!
//! A `Table` is a named, typed collection of rows spread across the data
//! pages attributed to it by its usage map. The table layer owns row
//! placement (append, tombstone delete) and row decoding; traversal
//! belongs to the cursor layer, which drives a `RowState` through the
//! owned pages.
//!
//! ## Row Identity
//!
//! A row is identified by `(page number, row slot)`. Deleting a row only
//! sets the tombstone bit in its slot word, so the identities of its
//! neighbours are stable across deletes. Row content is never moved by
//! this crate; slots keep their offsets for the lifetime of the page.
//!
//! ## Writes
//!
//! `add_row` and `delete_row` are structural mutations and run under the
//! page channel's exclusive-write latch. Appends go to the highest owned
//! page while it has room, then spill onto a freshly allocated page that
//! is added to the usage map (and the map persisted) inside the same
//! latch.
//!
//! ## Module Organization
//!
//! - `row_state`: per-cursor page/slot scratch with overflow indirection
//! - `usage_map`: the owned-page set and its bidirectional iterator

pub mod row_state;
pub mod usage_map;

pub use row_state::{RowState, INVALID_ROW_NUMBER};
pub use usage_map::{PageIterator, UsageMap};

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashSet;
use parking_lot::RwLock;

use crate::cursor::RowId;
use crate::format::DbFormat;
use crate::record;
use crate::schema::{ColumnDef, IndexDef};
use crate::storage::{self, page, DataPageHeader, PageChannel};
use crate::types::OwnedValue;

/// One materialised row: column name to value, in the table's column
/// order. Also used as the pattern argument of the cursor's find
/// operations, where it carries only the columns being matched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, OwnedValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for assembling patterns.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OwnedValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: OwnedValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&OwnedValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OwnedValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, OwnedValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, OwnedValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A table of a JetDB database. Cheap to share: cursors hold an
/// `Arc<Table>` and tables hold only shared handles internally.
pub struct Table {
    name: String,
    columns: Vec<ColumnDef>,
    format: &'static DbFormat,
    channel: Arc<PageChannel>,
    usage_map: UsageMap,
    map_root: u32,
    indexes: RwLock<Vec<IndexDef>>,
    database_id: u64,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("columns", &self.columns.len())
            .field("owned_pages", &self.usage_map.page_count())
            .finish()
    }
}

impl Table {
    pub(crate) fn new(
        name: String,
        columns: Vec<ColumnDef>,
        format: &'static DbFormat,
        channel: Arc<PageChannel>,
        usage_map: UsageMap,
        map_root: u32,
        indexes: Vec<IndexDef>,
        database_id: u64,
    ) -> Self {
        Self {
            name,
            columns,
            format,
            channel,
            usage_map,
            map_root,
            indexes: RwLock::new(indexes),
            database_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn format(&self) -> &'static DbFormat {
        self.format
    }

    pub fn page_channel(&self) -> &Arc<PageChannel> {
        &self.channel
    }

    /// Current index definitions, as a snapshot.
    pub fn indexes(&self) -> Vec<IndexDef> {
        self.indexes.read().clone()
    }

    pub(crate) fn add_index(&self, index: IndexDef) {
        self.indexes.write().push(index);
    }

    pub(crate) fn database_id(&self) -> u64 {
        self.database_id
    }

    pub(crate) fn map_root(&self) -> u32 {
        self.map_root
    }

    pub(crate) fn usage_map(&self) -> &UsageMap {
        &self.usage_map
    }

    /// Fresh traversal scratch for a cursor over this table.
    pub fn create_row_state(&self) -> RowState {
        RowState::new(Arc::clone(&self.channel), self.format)
    }

    /// Iterator over the pages this table owns.
    pub fn owned_pages_iterator(&self) -> PageIterator {
        self.usage_map.iterator()
    }

    /// Number of rows ever placed on the given page buffer (tombstones
    /// included); 0 for anything that is not a data page.
    pub fn rows_on_page(&self, buf: &[u8]) -> i32 {
        page::rows_on_page(buf, self.format)
    }

    /// Returns the row the state is positioned on, optionally restricted
    /// to the named columns. Keys follow the table's column order; the
    /// returned row is a fresh object.
    pub fn get_row(&self, rs: &RowState, columns: Option<&[&str]>) -> Result<Row> {
        let values = self.read_row_values(rs)?;

        let row = match columns {
            None => self
                .columns
                .iter()
                .zip(values)
                .map(|(c, v)| (c.name().to_string(), v))
                .collect(),
            Some(names) => {
                let wanted: HashSet<&str> = names.iter().copied().collect();
                self.columns
                    .iter()
                    .zip(values)
                    .filter(|(c, _)| wanted.contains(c.name()))
                    .map(|(c, v)| (c.name().to_string(), v))
                    .collect()
            }
        };
        Ok(row)
    }

    /// Returns a single column of the row the state is positioned on.
    pub fn get_row_value(&self, rs: &RowState, column: &str) -> Result<OwnedValue> {
        let Some(index) = self.column_index(column) else {
            bail!("table '{}' has no column '{}'", self.name, column);
        };

        let (buf, start, end) = self.row_extent(rs)?;
        record::decode_value_at(&buf[start..end], index)
    }

    fn read_row_values(&self, rs: &RowState) -> Result<Vec<OwnedValue>> {
        let (buf, start, end) = self.row_extent(rs)?;
        let values = record::decode_row(&buf[start..end])?;
        ensure!(
            values.len() == self.columns.len(),
            "record has {} values but table '{}' has {} columns",
            values.len(),
            self.name,
            self.columns.len()
        );
        Ok(values)
    }

    /// Locates the row content the state points at, re-checking the
    /// tombstone on the way.
    fn row_extent<'a>(&self, rs: &'a RowState) -> Result<(&'a [u8], usize, usize)> {
        ensure!(
            rs.is_positioned() && rs.final_row_number() >= 0,
            "row state is not positioned on a row"
        );
        ensure!(!rs.row_deleted(), "row is deleted");

        let Some(buf) = rs.final_buffer() else {
            bail!("row state is not positioned on a row");
        };
        let row_number = rs.final_row_number();

        ensure!(
            row_number < page::rows_on_page(buf, self.format),
            "row {} does not exist on page {}",
            row_number,
            rs.final_page_number()
        );

        let slot = page::row_start(buf, self.format, row_number)?;
        ensure!(!storage::is_deleted_row(slot), "row is deleted");

        let (start, end) = page::row_region(buf, self.format, row_number)?;
        Ok((buf, start, end))
    }

    /// Appends a row and returns its id. Takes the exclusive-write latch
    /// for the duration of the write.
    pub fn add_row(&self, values: Vec<OwnedValue>) -> Result<RowId> {
        ensure!(
            values.len() == self.columns.len(),
            "row has {} values but table '{}' has {} columns",
            values.len(),
            self.name,
            self.columns.len()
        );
        for (column, value) in self.columns.iter().zip(&values) {
            if let Some(data_type) = value.data_type() {
                ensure!(
                    data_type == column.data_type(),
                    "wrong data type for column '{}': expected {:?}, got {:?}",
                    column.name(),
                    column.data_type(),
                    data_type
                );
            }
        }

        let encoded = record::encode_row(&values)?;
        ensure!(
            encoded.len() <= self.format.max_row_size,
            "row of {} bytes exceeds maximum row size {}",
            encoded.len(),
            self.format.max_row_size
        );

        let write = self.channel.start_exclusive_write();

        let target = match self.usage_map.last_page() {
            Some(page_no) if self.page_has_room(page_no, encoded.len())? => page_no,
            _ => {
                let page_no = self.channel.allocate_page()?;
                self.channel.with_page_mut(page_no, |buf| {
                    use zerocopy::IntoBytes;
                    let header = DataPageHeader::new(self.map_root);
                    buf[..storage::DATA_PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());
                    Ok(())
                })?;
                self.usage_map.add_page(page_no);
                self.usage_map.save(&self.channel, self.map_root)?;
                page_no
            }
        };

        let row_number = self.channel.with_page_mut(target, |buf| {
            let row_count = page::rows_on_page(buf, self.format);
            let content_start = page::free_content_start(buf, self.format)?;
            let slot_table_end =
                self.format.row_start_offset(row_count) + self.format.size_row_location;

            ensure!(
                content_start >= slot_table_end + encoded.len(),
                "page {} has no room for a {} byte row",
                target,
                encoded.len()
            );

            let start = content_start - encoded.len();
            buf[start..content_start].copy_from_slice(&encoded);
            page::set_row_start(buf, self.format, row_count, start as u16)?;

            let header = DataPageHeader::from_bytes_mut(buf)?;
            header.set_row_count(row_count as u16 + 1);
            header.set_free_space((start - slot_table_end) as u16);
            Ok(row_count)
        })?;

        write.finish();
        Ok(RowId::new(target as i32, row_number as i16))
    }

    fn page_has_room(&self, page_no: u32, row_len: usize) -> Result<bool> {
        self.channel.with_page(page_no, |buf| {
            let row_count = page::rows_on_page(buf, self.format);
            if buf[0] != storage::PageType::Data as u8 {
                return Ok(false);
            }
            let content_start = page::free_content_start(buf, self.format)?;
            let slot_table_end =
                self.format.row_start_offset(row_count) + self.format.size_row_location;
            Ok(content_start >= slot_table_end + row_len)
        })
    }

    /// Marks the row at `row_id` deleted, leaving its slot (and therefore
    /// the ids of its neighbours) in place. Takes the exclusive-write
    /// latch for the duration of the write. The passed row state is left
    /// positioned on the tombstoned row.
    pub fn delete_row(&self, rs: &mut RowState, row_id: RowId) -> Result<()> {
        ensure!(
            row_id.is_valid_row(),
            "invalid cursor position: cannot delete row at {}",
            row_id
        );

        let positioned = rs.set_row(row_id.page_number(), row_id.row_number() as i32)?;
        ensure!(positioned, "row {} names a page that does not exist", row_id);

        let row_number = row_id.row_number() as i32;
        {
            let Some(buf) = rs.page_buffer() else {
                bail!("row state is not positioned on a row");
            };
            ensure!(
                row_number < page::rows_on_page(buf, self.format),
                "row {} does not exist on page {}",
                row_number,
                row_id.page_number()
            );
        }

        let write = self.channel.start_exclusive_write();

        // The live page is authoritative for the tombstone check: another
        // cursor may have deleted this row since our buffer was cached.
        let new_slot = self
            .channel
            .with_page_mut(row_id.page_number() as u32, |buf| {
                let slot = page::row_start(buf, self.format, row_number)?;
                ensure!(!storage::is_deleted_row(slot), "row is already deleted");
                let new_slot = slot | storage::DELETED_ROW_MASK;
                page::set_row_start(buf, self.format, row_number, new_slot)?;
                Ok(new_slot)
            })?;

        write.finish();

        rs.patch_slot(row_number, new_slot)?;
        rs.set_row_deleted();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_V1;
    use crate::types::DataType;

    fn test_table(columns: Vec<ColumnDef>) -> (tempfile::TempDir, Arc<Table>) {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(PageChannel::create(dir.path().join("t.jet"), 1).unwrap());
        let map_root = channel.allocate_page().unwrap();
        let table = Table::new(
            "t".to_string(),
            columns,
            &FORMAT_V1,
            channel,
            UsageMap::new(),
            map_root,
            Vec::new(),
            1,
        );
        (dir, Arc::new(table))
    }

    fn int_text_table() -> (tempfile::TempDir, Arc<Table>) {
        test_table(vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::Text),
        ])
    }

    #[test]
    fn add_then_read_row() {
        let (_dir, table) = int_text_table();

        let row_id = table
            .add_row(vec![OwnedValue::Int(1), OwnedValue::Text("a".into())])
            .unwrap();
        assert_eq!(row_id.row_number(), 0);

        let mut rs = table.create_row_state();
        assert!(rs
            .set_row(row_id.page_number(), row_id.row_number() as i32)
            .unwrap());

        let row = table.get_row(&rs, None).unwrap();
        assert_eq!(row.get("id"), Some(&OwnedValue::Int(1)));
        assert_eq!(row.get("name"), Some(&OwnedValue::Text("a".into())));
        assert_eq!(row.column_names().collect::<Vec<_>>(), ["id", "name"]);
    }

    #[test]
    fn projection_preserves_table_column_order() {
        let (_dir, table) = int_text_table();
        let row_id = table
            .add_row(vec![OwnedValue::Int(5), OwnedValue::Text("z".into())])
            .unwrap();

        let mut rs = table.create_row_state();
        rs.set_row(row_id.page_number(), row_id.row_number() as i32)
            .unwrap();

        let row = table.get_row(&rs, Some(&["name", "id"])).unwrap();
        assert_eq!(row.column_names().collect::<Vec<_>>(), ["id", "name"]);

        let only_name = table.get_row(&rs, Some(&["name"])).unwrap();
        assert_eq!(only_name.len(), 1);
        assert_eq!(only_name.get("id"), None);
    }

    #[test]
    fn get_row_value_single_column() {
        let (_dir, table) = int_text_table();
        let row_id = table
            .add_row(vec![OwnedValue::Int(9), OwnedValue::Text("v".into())])
            .unwrap();

        let mut rs = table.create_row_state();
        rs.set_row(row_id.page_number(), row_id.row_number() as i32)
            .unwrap();

        assert_eq!(
            table.get_row_value(&rs, "name").unwrap(),
            OwnedValue::Text("v".into())
        );
        let missing = table.get_row_value(&rs, "nope");
        assert!(missing.is_err());
        assert!(missing
            .unwrap_err()
            .to_string()
            .contains("has no column 'nope'"));
    }

    #[test]
    fn add_row_validates_arity_and_types() {
        let (_dir, table) = int_text_table();

        let arity = table.add_row(vec![OwnedValue::Int(1)]);
        assert!(arity.unwrap_err().to_string().contains("has 2 columns"));

        let types = table.add_row(vec![OwnedValue::Text("x".into()), OwnedValue::Null]);
        assert!(types
            .unwrap_err()
            .to_string()
            .contains("wrong data type for column 'id'"));

        // NULL is compatible with any column type.
        table.add_row(vec![OwnedValue::Null, OwnedValue::Null]).unwrap();
    }

    #[test]
    fn oversized_row_rejected() {
        let (_dir, table) = test_table(vec![ColumnDef::new("blob", DataType::Blob)]);

        let result = table.add_row(vec![OwnedValue::Blob(vec![0u8; 5000])]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("exceeds maximum row size"));
    }

    #[test]
    fn rows_spill_onto_new_pages() {
        let (_dir, table) = test_table(vec![ColumnDef::new("pad", DataType::Text)]);

        // Each row is ~1KB, so a 4KB page fits three of them.
        let mut ids = Vec::new();
        for i in 0..7 {
            let pad = "x".repeat(1000 + i % 2);
            ids.push(table.add_row(vec![OwnedValue::Text(pad)]).unwrap());
        }

        let pages: Vec<i32> = ids.iter().map(|id| id.page_number()).collect();
        assert!(pages.windows(2).all(|w| w[0] <= w[1]));
        assert!(pages.last() > pages.first());
        assert_eq!(table.usage_map().page_count() as usize, {
            let mut distinct = pages.clone();
            distinct.dedup();
            distinct.len()
        });

        // Row numbers restart on each new page.
        for pair in ids.windows(2) {
            if pair[1].page_number() != pair[0].page_number() {
                assert_eq!(pair[1].row_number(), 0);
            } else {
                assert_eq!(pair[1].row_number(), pair[0].row_number() + 1);
            }
        }
    }

    #[test]
    fn delete_marks_tombstone_and_blocks_reads() {
        let (_dir, table) = int_text_table();
        let keep = table
            .add_row(vec![OwnedValue::Int(1), OwnedValue::Text("a".into())])
            .unwrap();
        let doomed = table
            .add_row(vec![OwnedValue::Int(2), OwnedValue::Text("b".into())])
            .unwrap();

        let mut rs = table.create_row_state();
        table.delete_row(&mut rs, doomed).unwrap();

        let read = table.get_row(&rs, None);
        assert!(read.unwrap_err().to_string().contains("row is deleted"));

        let again = table.delete_row(&mut rs, doomed);
        assert!(again
            .unwrap_err()
            .to_string()
            .contains("row is already deleted"));

        // The neighbour keeps its id and stays readable.
        let mut rs2 = table.create_row_state();
        rs2.set_row(keep.page_number(), keep.row_number() as i32)
            .unwrap();
        let row = table.get_row(&rs2, None).unwrap();
        assert_eq!(row.get("id"), Some(&OwnedValue::Int(1)));
    }

    #[test]
    fn overflow_rows_resolve_through_the_pointer() {
        use crate::cursor::Cursor;
        use crate::storage::{OVERFLOW_ROW_MASK, PAGE_SIZE};
        use zerocopy::IntoBytes;

        let (_dir, table) = int_text_table();
        let channel = Arc::clone(table.page_channel());
        let pointer_page = channel.allocate_page().unwrap();
        let content_page = channel.allocate_page().unwrap();

        let write_row = |page_no: u32, content: &[u8], slot_flags: u16| {
            let mut buf = vec![0u8; PAGE_SIZE];
            let mut header = DataPageHeader::new(0);
            header.set_row_count(1);
            buf[..storage::DATA_PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());

            let start = PAGE_SIZE - content.len();
            buf[start..].copy_from_slice(content);
            page::set_row_start(&mut buf, &FORMAT_V1, 0, start as u16 | slot_flags).unwrap();
            channel.write_page(&buf, page_no).unwrap();
        };

        let record =
            crate::record::encode_row(&[OwnedValue::Int(5), OwnedValue::Text("far".into())])
                .unwrap();
        write_row(content_page, &record, 0);

        let mut pointer = Vec::new();
        pointer.extend(0u16.to_le_bytes());
        pointer.extend((content_page as i32).to_le_bytes());
        write_row(pointer_page, &pointer, OVERFLOW_ROW_MASK);

        // Only the pointer page is owned, so the row is seen exactly once.
        table.usage_map().add_page(pointer_page);

        let mut cursor = Cursor::create_cursor(Arc::clone(&table));
        let row = cursor.get_next_row(None).unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&OwnedValue::Int(5)));
        assert_eq!(row.get("name"), Some(&OwnedValue::Text("far".into())));

        let id = cursor.get_current_row_id();
        assert_eq!(id.page_number(), pointer_page as i32);
        assert_eq!(id.row_number(), 0);

        // Deleting tombstones the pointer slot; a rescan skips the row.
        cursor.delete_current_row().unwrap();
        cursor.before_first();
        assert!(cursor.get_next_row(None).unwrap().is_none());
    }

    #[test]
    fn delete_rejects_sentinels() {
        let (_dir, table) = int_text_table();
        let mut rs = table.create_row_state();

        let result = table.delete_row(&mut rs, crate::cursor::FIRST_ROW_ID);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("invalid cursor position"));
    }
}
