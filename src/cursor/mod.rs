//! # Row Cursors
//!
//! Manages iteration over the rows of a table. A cursor is a restartable,
//! bidirectional position within a table's owned pages: it can be seated
//! before the first row or after the last row, stepped one non-deleted
//! row at a time in either direction, asked for the row it is on, and
//! used to find or delete rows.
//!
//! Cursors are robust in the face of table modification during traversal:
//! tombstones are re-read on every visit, so rows deleted ahead of the
//! cursor are skipped; page row counts are re-read when a page is loaded,
//! so rows appended to not-yet-visited pages are observed. A row update
//! on the slot the cursor is currently seated on is not re-read until the
//! cursor moves. Multiple cursors may traverse the same table
//! simultaneously.
//!
//! A cursor is not thread-safe; it is a single-task resource.
//!
//! ## Position Model
//!
//! The cursor's position is always a single [`RowId`]: either the
//! [`FIRST_ROW_ID`]/[`LAST_ROW_ID`] sentinel or the id of an existing,
//! non-deleted row. Stepping off the last row in a direction parks the
//! cursor on that direction's end sentinel, from which the opposite
//! direction walks back onto the rows.
//!
//! ## Directions as Data
//!
//! Forward and reverse traversal differ in exactly four primitives: the
//! sentinel to seat on at reset, the sentinel that signals completion,
//! the row-slot increment, and the starting slot on a freshly loaded
//! page. [`Direction`] encodes the pure pair of those primitives; the
//! page-iterator side (next vs previous owned page) dispatches on the
//! same tag.

mod row_id;

pub use row_id::{RowId, FIRST_ROW_ID, LAST_ROW_ID};

use std::sync::Arc;

use eyre::{bail, ensure, Result};

use crate::matcher::{ColumnMatcher, SimpleColumnMatcher};
use crate::storage::{self, page};
use crate::table::{PageIterator, Row, RowState, Table, INVALID_ROW_NUMBER};
use crate::types::OwnedValue;

/// Traversal direction, carrying the direction-dependent primitives of
/// the scan algorithm as plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn of(move_forward: bool) -> Self {
        if move_forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Row-slot increment applied on every step.
    fn row_increment(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    /// Slot to seat on when landing on a freshly loaded page, chosen so
    /// that the immediately following increment produces the first slot
    /// to visit.
    fn initial_row_number(self, rows_on_page: i32) -> i32 {
        match self {
            Direction::Forward => INVALID_ROW_NUMBER as i32,
            Direction::Reverse => rows_on_page,
        }
    }
}

/// An un-indexed scan cursor over a table.
pub struct Cursor {
    table: Arc<Table>,
    row_state: RowState,
    pages: PageIterator,
    first_row_id: RowId,
    last_row_id: RowId,
    current_row_id: RowId,
    matcher: Box<dyn ColumnMatcher>,
}

impl Cursor {
    /// Creates a normal, un-indexed cursor for the given table, seated
    /// before the first row.
    pub fn create_cursor(table: Arc<Table>) -> Self {
        let row_state = table.create_row_state();
        let pages = table.owned_pages_iterator();
        Self {
            table,
            row_state,
            pages,
            first_row_id: FIRST_ROW_ID,
            last_row_id: LAST_ROW_ID,
            current_row_id: FIRST_ROW_ID,
            matcher: Box::new(SimpleColumnMatcher),
        }
    }

    /// Convenience for finding the first row matching a pattern with a
    /// throwaway cursor. See [`Cursor::find_row`] for pattern semantics.
    pub fn find_first_row(table: &Arc<Table>, pattern: &Row) -> Result<Option<Row>> {
        let mut cursor = Cursor::create_cursor(Arc::clone(table));
        if cursor.find_row(pattern)? {
            return Ok(Some(cursor.get_current_row(None)?));
        }
        Ok(None)
    }

    /// Convenience for projecting `column` out of the first row where
    /// `pattern_column` equals `pattern_value`, with a throwaway cursor.
    ///
    /// A `None` result is ambiguous: it can mean no match, or a matching
    /// row whose `column` is NULL. Use a cursor directly to distinguish.
    pub fn find_first_value(
        table: &Arc<Table>,
        column: &str,
        pattern_column: &str,
        pattern_value: &OwnedValue,
    ) -> Result<Option<OwnedValue>> {
        let mut cursor = Cursor::create_cursor(Arc::clone(table));
        if cursor.find_row_by_value(pattern_column, pattern_value)? {
            return Ok(Some(cursor.get_current_row_value(column)?));
        }
        Ok(None)
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn get_current_row_id(&self) -> RowId {
        self.current_row_id
    }

    /// Swaps the equality policy used by the find operations.
    pub fn set_column_matcher(&mut self, matcher: Box<dyn ColumnMatcher>) {
        self.matcher = matcher;
    }

    /// The first (exclusive) row id bounding this cursor.
    fn get_first_row_id(&self) -> RowId {
        self.first_row_id
    }

    /// The last (exclusive) row id bounding this cursor.
    fn get_last_row_id(&self) -> RowId {
        self.last_row_id
    }

    /// Resets this cursor for forward iteration. Alias of
    /// [`Cursor::before_first`].
    pub fn reset(&mut self) {
        self.before_first();
    }

    /// Seats the cursor before the first row.
    pub fn before_first(&mut self) {
        self.reset_direction(true);
    }

    /// Seats the cursor after the last row.
    pub fn after_last(&mut self) {
        self.reset_direction(false);
    }

    fn reset_direction(&mut self, move_forward: bool) {
        self.pages.reset(move_forward);
        self.current_row_id = self.beginning_row_id(Direction::of(move_forward));
        self.row_state.reset();
    }

    /// True if the cursor is currently seated on a valid row rather than
    /// a sentinel.
    pub fn is_current_row_valid(&self) -> bool {
        self.current_row_id.is_valid_row()
            && self.current_row_id != self.first_row_id
            && self.current_row_id != self.last_row_id
    }

    /// Moves to the next non-deleted row. Returns `false` iff there is
    /// none, in which case the cursor is parked after the last row.
    pub fn move_to_next_row(&mut self) -> Result<bool> {
        self.move_to_another_row(true)
    }

    /// Moves to the previous non-deleted row. Returns `false` iff there
    /// is none, in which case the cursor is parked before the first row.
    pub fn move_to_previous_row(&mut self) -> Result<bool> {
        self.move_to_another_row(false)
    }

    fn move_to_another_row(&mut self, move_forward: bool) -> Result<bool> {
        let direction = Direction::of(move_forward);
        let end = self.end_row_id(direction);
        if self.current_row_id == end {
            // already at end
            return Ok(false);
        }

        self.row_state.reset();
        self.current_row_id = self.find_another_row_id(self.current_row_id, move_forward)?;
        Ok(self.current_row_id != end)
    }

    /// Moves to the next row and returns it, or `None` at the end.
    pub fn get_next_row(&mut self, columns: Option<&[&str]>) -> Result<Option<Row>> {
        self.get_another_row(columns, true)
    }

    /// Moves to the previous row and returns it, or `None` at the start.
    pub fn get_previous_row(&mut self, columns: Option<&[&str]>) -> Result<Option<Row>> {
        self.get_another_row(columns, false)
    }

    fn get_another_row(
        &mut self,
        columns: Option<&[&str]>,
        move_forward: bool,
    ) -> Result<Option<Row>> {
        if self.move_to_another_row(move_forward)? {
            return Ok(Some(self.get_current_row(columns)?));
        }
        Ok(None)
    }

    /// Returns the row the cursor is seated on, optionally restricted to
    /// the named columns (keys keep the table's column order; the row is
    /// a fresh object each call).
    pub fn get_current_row(&self, columns: Option<&[&str]>) -> Result<Row> {
        ensure!(
            self.is_current_row_valid(),
            "invalid cursor position: {}",
            self.current_row_id
        );
        self.table.get_row(&self.row_state, columns)
    }

    /// Returns one column of the row the cursor is seated on.
    pub fn get_current_row_value(&self, column: &str) -> Result<OwnedValue> {
        ensure!(
            self.is_current_row_valid(),
            "invalid cursor position: {}",
            self.current_row_id
        );
        self.table.get_row_value(&self.row_state, column)
    }

    /// Deletes the row the cursor is seated on. The cursor stays seated
    /// on the tombstone; the next move steps off it.
    pub fn delete_current_row(&mut self) -> Result<()> {
        ensure!(
            self.is_current_row_valid(),
            "invalid cursor position: {}",
            self.current_row_id
        );
        let current = self.current_row_id;
        self.table.delete_row(&mut self.row_state, current)
    }

    /// Deletes the given row without disturbing the cursor position.
    pub fn delete_row(&self, row_id: RowId) -> Result<()> {
        let mut scratch = self.table.create_row_state();
        self.table.delete_row(&mut scratch, row_id)
    }

    /// Seats the cursor on the first row (in forward order) whose values
    /// equal the pattern on the pattern's columns, under the cursor's
    /// column matcher. Returns `false` if no row matches; the cursor is
    /// then parked on a sentinel.
    pub fn find_row(&mut self, pattern: &Row) -> Result<bool> {
        self.before_first();
        let columns: Vec<&str> = pattern.column_names().collect();
        while self.move_to_next_row()? {
            if self.current_row_matches(pattern, &columns)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Seats the cursor on the first row (in forward order) where
    /// `column` equals `value` under the cursor's column matcher.
    /// Returns `false` if no row matches; the cursor is then parked on a
    /// sentinel.
    pub fn find_row_by_value(&mut self, column: &str, value: &OwnedValue) -> Result<bool> {
        self.before_first();
        while self.move_to_next_row()? {
            let current = self.get_current_row_value(column)?;
            if self.matcher.matches(&self.table, column, value, &current) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current_row_matches(&self, pattern: &Row, columns: &[&str]) -> Result<bool> {
        let row = self.get_current_row(Some(columns))?;
        for (name, expected) in pattern.iter() {
            let Some(actual) = row.get(name) else {
                // Pattern names a column the table does not have.
                return Ok(false);
            };
            if !self.matcher.matches(&self.table, name, expected, actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Steps forward up to `num_rows` times; returns the number of rows
    /// actually stepped.
    pub fn skip_next_rows(&mut self, num_rows: usize) -> Result<usize> {
        self.skip_some_rows(num_rows, true)
    }

    /// Steps backward up to `num_rows` times; returns the number of rows
    /// actually stepped.
    pub fn skip_previous_rows(&mut self, num_rows: usize) -> Result<usize> {
        self.skip_some_rows(num_rows, false)
    }

    fn skip_some_rows(&mut self, num_rows: usize, move_forward: bool) -> Result<usize> {
        let mut skipped = 0;
        while skipped < num_rows && self.move_to_another_row(move_forward)? {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Resets the cursor and returns an iterator over all rows in
    /// forward order. The iterator pre-fetches one row, so its
    /// [`Rows::has_next`] is exact.
    pub fn iter(&mut self) -> Result<Rows<'_>> {
        Rows::new(self, None)
    }

    /// Like [`Cursor::iter`], restricted to the named columns.
    pub fn iter_columns(&mut self, columns: &[&str]) -> Result<Rows<'_>> {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        Rows::new(self, Some(columns))
    }

    fn beginning_row_id(&self, direction: Direction) -> RowId {
        match direction {
            Direction::Forward => self.get_first_row_id(),
            Direction::Reverse => self.get_last_row_id(),
        }
    }

    fn end_row_id(&self, direction: Direction) -> RowId {
        match direction {
            Direction::Forward => self.get_last_row_id(),
            Direction::Reverse => self.get_first_row_id(),
        }
    }

    fn another_page_number(&mut self, direction: Direction) -> i32 {
        match direction {
            Direction::Forward => self.pages.next_page(),
            Direction::Reverse => self.pages.previous_page(),
        }
    }

    /// Row count of the page the row state is seated on; 0 when the
    /// state is unpositioned or the page is not a data page.
    fn rows_on_current_data_page(&self) -> i32 {
        self.row_state
            .page_buffer()
            .map(|buf| self.table.rows_on_page(buf))
            .unwrap_or(0)
    }

    /// True if the row the state is seated on carries a tombstone. Reads
    /// the unmasked row-start word of the final (post-overflow) position.
    fn is_current_row_deleted(&self) -> Result<bool> {
        let Some(buf) = self.row_state.final_buffer() else {
            bail!("cursor row state is not positioned");
        };
        let slot = page::row_start(buf, self.table.format(), self.row_state.final_row_number())?;
        Ok(storage::is_deleted_row(slot))
    }

    /// Finds the id of the next non-deleted row after `current` in the
    /// given direction, or the direction's end sentinel if the owned
    /// pages are exhausted.
    fn find_another_row_id(&mut self, current: RowId, move_forward: bool) -> Result<RowId> {
        let direction = Direction::of(move_forward);

        // prepare to read the next row
        let mut page_number = current.page_number();
        let mut row_number = current.row_number() as i32;

        self.row_state.set_row(page_number, row_number)?;
        let mut rows_on_page = self.rows_on_current_data_page();
        let row_inc = direction.row_increment();

        // loop until we find the next valid row or run out of pages
        loop {
            row_number += row_inc;
            if row_number >= 0 && row_number < rows_on_page {
                self.row_state.set_row(page_number, row_number)?;
            } else {
                // load the next page
                row_number = INVALID_ROW_NUMBER as i32;
                page_number = self.another_page_number(direction);

                if !self.row_state.set_row(page_number, row_number)? {
                    // No more owned pages. No more rows.
                    return Ok(self.end_row_id(direction));
                }

                // update row count and initial row number
                rows_on_page = self.rows_on_current_data_page();
                row_number = direction.initial_row_number(rows_on_page);

                // start again from the top
                continue;
            }

            if !self.is_current_row_deleted()? {
                return Ok(RowId::new(page_number, row_number as i16));
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("table", &self.table.name())
            .field("current_row_id", &self.current_row_id)
            .finish()
    }
}

/// Pre-fetching row iterator over a cursor, produced by [`Cursor::iter`].
///
/// One row is always fetched ahead, so [`Rows::has_next`] answers without
/// touching the table. [`Rows::remove`] deletes the row most recently
/// returned by `next()` (not the pre-fetched row the underlying cursor is
/// seated on), using the cached id of the returned row.
pub struct Rows<'a> {
    cursor: &'a mut Cursor,
    columns: Option<Vec<String>>,
    next_row: Option<Row>,
    prev_row_id: Option<RowId>,
    pending_err: Option<eyre::Report>,
    done: bool,
}

impl<'a> Rows<'a> {
    fn new(cursor: &'a mut Cursor, columns: Option<Vec<String>>) -> Result<Self> {
        cursor.reset();
        let mut rows = Self {
            cursor,
            columns,
            next_row: None,
            prev_row_id: None,
            pending_err: None,
            done: false,
        };
        rows.next_row = rows.fetch_next()?;
        Ok(rows)
    }

    fn fetch_next(&mut self) -> Result<Option<Row>> {
        let columns: Option<Vec<&str>> = self
            .columns
            .as_ref()
            .map(|c| c.iter().map(String::as_str).collect());
        self.cursor.get_next_row(columns.as_deref())
    }

    /// True if another row is already fetched.
    pub fn has_next(&self) -> bool {
        self.next_row.is_some()
    }

    /// Deletes the row most recently returned by `next()`. Fails if no
    /// row has been returned yet, or if it was already removed.
    pub fn remove(&mut self) -> Result<()> {
        let Some(row_id) = self.prev_row_id.take() else {
            bail!("no row available to remove");
        };
        self.cursor.delete_row(row_id)
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending_err.take() {
            self.done = true;
            return Some(Err(err));
        }

        let row = self.next_row.take()?;
        self.prev_row_id = Some(self.cursor.get_current_row_id());

        match self.fetch_next() {
            Ok(next) => self.next_row = next,
            Err(err) => self.pending_err = Some(err),
        }
        Some(Ok(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_primitives() {
        assert_eq!(Direction::of(true), Direction::Forward);
        assert_eq!(Direction::of(false), Direction::Reverse);

        assert_eq!(Direction::Forward.row_increment(), 1);
        assert_eq!(Direction::Reverse.row_increment(), -1);

        // Forward lands before slot 0; reverse lands after the last slot.
        assert_eq!(Direction::Forward.initial_row_number(5), -1);
        assert_eq!(Direction::Reverse.initial_row_number(5), 5);
        assert_eq!(
            Direction::Forward.initial_row_number(5) + Direction::Forward.row_increment(),
            0
        );
        assert_eq!(
            Direction::Reverse.initial_row_number(5) + Direction::Reverse.row_increment(),
            4
        );
    }

    #[test]
    fn direction_sentinels_through_cursor() {
        // beginning/end row ids are bound per cursor; on a scan cursor
        // they are the global sentinels.
        let dir = tempfile::tempdir().unwrap();
        let channel = std::sync::Arc::new(
            crate::storage::PageChannel::create(dir.path().join("t.jet"), 1).unwrap(),
        );
        let map_root = channel.allocate_page().unwrap();
        let table = std::sync::Arc::new(crate::table::Table::new(
            "t".to_string(),
            vec![crate::schema::ColumnDef::new("id", crate::types::DataType::Int)],
            &crate::format::FORMAT_V1,
            channel,
            crate::table::UsageMap::new(),
            map_root,
            Vec::new(),
            1,
        ));
        let cursor = Cursor::create_cursor(table);

        assert_eq!(cursor.beginning_row_id(Direction::Forward), FIRST_ROW_ID);
        assert_eq!(cursor.beginning_row_id(Direction::Reverse), LAST_ROW_ID);
        assert_eq!(cursor.end_row_id(Direction::Forward), LAST_ROW_ID);
        assert_eq!(cursor.end_row_id(Direction::Reverse), FIRST_ROW_ID);
    }
}
