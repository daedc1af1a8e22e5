//! # Cursor Row State
//!
//! `RowState` is a cursor's scratch for reading table rows: the most
//! recently loaded page, the current row slot, and the *final* position
//! after following an overflow pointer. It is created with its cursor and
//! invalidated on every directional move, so each step re-reads the page
//! from the channel and observes mutations made by other cursors.
//!
//! ## Primary vs Final Position
//!
//! The primary position is the `(page, row)` pair the cursor addressed.
//! When that slot is flagged as an overflow pointer, the row content
//! actually lives elsewhere; the final position names the page and slot
//! holding the content. For ordinary rows the two coincide. Deleted
//! flags are always read from the final position's unmasked slot word.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::format::DbFormat;
use crate::storage::{self, page, PageChannel, INVALID_PAGE_NUMBER, PAGE_SIZE};

/// Row number that refers to no slot. Doubles as the row component of
/// both cursor sentinels.
pub const INVALID_ROW_NUMBER: i16 = -1;

/// Per-cursor scratch buffer for the current page and row slot.
pub struct RowState {
    channel: Arc<PageChannel>,
    format: &'static DbFormat,

    page_number: i32,
    row_number: i32,
    main_buffer: Vec<u8>,
    main_loaded: bool,

    final_page_number: i32,
    final_row_number: i32,
    overflow_buffer: Vec<u8>,
    overflow: bool,

    row_deleted: bool,
}

impl RowState {
    pub(crate) fn new(channel: Arc<PageChannel>, format: &'static DbFormat) -> Self {
        Self {
            channel,
            format,
            page_number: INVALID_PAGE_NUMBER,
            row_number: INVALID_ROW_NUMBER as i32,
            main_buffer: vec![0u8; PAGE_SIZE],
            main_loaded: false,
            final_page_number: INVALID_PAGE_NUMBER,
            final_row_number: INVALID_ROW_NUMBER as i32,
            overflow_buffer: Vec::new(),
            overflow: false,
            row_deleted: false,
        }
    }

    /// Forgets the cached page and position.
    pub fn reset(&mut self) {
        self.page_number = INVALID_PAGE_NUMBER;
        self.row_number = INVALID_ROW_NUMBER as i32;
        self.main_loaded = false;
        self.final_page_number = INVALID_PAGE_NUMBER;
        self.final_row_number = INVALID_ROW_NUMBER as i32;
        self.overflow = false;
        self.row_deleted = false;
    }

    /// Positions this state at the given page and row. Returns `false`
    /// (leaving the state unpositioned) when the page number does not
    /// name a real page; I/O failures propagate.
    ///
    /// A non-negative row within the page's slot table is resolved
    /// through at most one overflow pointer to its final position.
    pub fn set_row(&mut self, page_number: i32, row_number: i32) -> Result<bool> {
        if !self.channel.is_valid_page(page_number) {
            self.reset();
            return Ok(false);
        }

        if !self.main_loaded || self.page_number != page_number {
            self.channel
                .read_page(&mut self.main_buffer, page_number as u32)?;
            self.page_number = page_number;
            self.main_loaded = true;
        }

        self.row_number = row_number;
        self.final_page_number = page_number;
        self.final_row_number = row_number;
        self.overflow = false;
        self.row_deleted = false;

        if row_number >= 0 && row_number < page::rows_on_page(&self.main_buffer, self.format) {
            let slot = page::row_start(&self.main_buffer, self.format, row_number)?;
            if storage::is_overflow_row(slot) && !storage::is_deleted_row(slot) {
                self.follow_overflow(row_number)?;
            }
        }

        Ok(true)
    }

    fn follow_overflow(&mut self, row_number: i32) -> Result<()> {
        let (start, end) = page::row_region(&self.main_buffer, self.format, row_number)?;
        ensure!(
            end - start >= page::OVERFLOW_PTR_SIZE,
            "overflow pointer in page {} row {} is truncated",
            self.page_number,
            row_number
        );

        let ptr = &self.main_buffer[start..start + page::OVERFLOW_PTR_SIZE];
        let target_row = u16::from_le_bytes([ptr[0], ptr[1]]) as i32;
        let target_page = i32::from_le_bytes(ptr[2..6].try_into().unwrap());

        ensure!(
            self.channel.is_valid_page(target_page),
            "overflow pointer in page {} row {} names invalid page {}",
            self.page_number,
            row_number,
            target_page
        );

        if self.overflow_buffer.len() != PAGE_SIZE {
            self.overflow_buffer.resize(PAGE_SIZE, 0);
        }
        self.channel
            .read_page(&mut self.overflow_buffer, target_page as u32)?;

        self.final_page_number = target_page;
        self.final_row_number = target_row;
        self.overflow = true;
        Ok(())
    }

    /// True if this state is positioned on a page.
    pub fn is_positioned(&self) -> bool {
        self.main_loaded
    }

    /// The buffer of the primary page, if positioned.
    pub fn page_buffer(&self) -> Option<&[u8]> {
        self.main_loaded.then_some(self.main_buffer.as_slice())
    }

    /// The buffer holding the row content: the overflow target page for
    /// overflow rows, the primary page otherwise.
    pub fn final_buffer(&self) -> Option<&[u8]> {
        if !self.main_loaded {
            return None;
        }
        if self.overflow {
            Some(&self.overflow_buffer)
        } else {
            Some(&self.main_buffer)
        }
    }

    pub fn page_number(&self) -> i32 {
        self.page_number
    }

    pub fn row_number(&self) -> i32 {
        self.row_number
    }

    pub fn final_page_number(&self) -> i32 {
        self.final_page_number
    }

    pub fn final_row_number(&self) -> i32 {
        self.final_row_number
    }

    /// Marks the row this state points at as deleted (in-memory note set
    /// by `Table::delete_row`; the on-disk tombstone is separate).
    pub(crate) fn set_row_deleted(&mut self) {
        self.row_deleted = true;
    }

    pub(crate) fn row_deleted(&self) -> bool {
        self.row_deleted
    }

    /// Patches the cached copy of the primary page so the state stays
    /// coherent with an in-place page mutation made through the channel.
    pub(crate) fn patch_slot(&mut self, row_number: i32, slot: u16) -> Result<()> {
        if self.main_loaded {
            page::set_row_start(&mut self.main_buffer, self.format, row_number, slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_V1;
    use crate::storage::{DataPageHeader, DATA_PAGE_HEADER_SIZE, OVERFLOW_ROW_MASK};
    use zerocopy::IntoBytes;

    fn data_page(rows: &[&[u8]]) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut header = DataPageHeader::new(1);
        header.set_row_count(rows.len() as u16);
        buf[..DATA_PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());

        let mut end = PAGE_SIZE;
        for (i, row) in rows.iter().enumerate() {
            let start = end - row.len();
            buf[start..end].copy_from_slice(row);
            page::set_row_start(&mut buf, &FORMAT_V1, i as i32, start as u16).unwrap();
            end = start;
        }
        buf
    }

    fn channel_with_pages(pages: &[Vec<u8>]) -> (tempfile::TempDir, Arc<PageChannel>) {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(PageChannel::create(dir.path().join("t.jet"), 1).unwrap());
        for buf in pages {
            let page_no = channel.allocate_page().unwrap();
            channel.write_page(buf, page_no).unwrap();
        }
        (dir, channel)
    }

    #[test]
    fn invalid_page_leaves_state_unpositioned() {
        let (_dir, channel) = channel_with_pages(&[]);
        let mut state = RowState::new(channel, &FORMAT_V1);

        assert!(!state.set_row(INVALID_PAGE_NUMBER, -1).unwrap());
        assert!(!state.set_row(i32::MAX, -1).unwrap());
        assert!(!state.is_positioned());
        assert!(state.page_buffer().is_none());
    }

    #[test]
    fn ordinary_row_final_equals_primary() {
        let (_dir, channel) = channel_with_pages(&[data_page(&[b"abc"])]);
        let mut state = RowState::new(channel, &FORMAT_V1);

        assert!(state.set_row(1, 0).unwrap());
        assert_eq!(state.final_page_number(), 1);
        assert_eq!(state.final_row_number(), 0);

        let buf = state.final_buffer().unwrap();
        let (start, end) = page::row_region(buf, &FORMAT_V1, 0).unwrap();
        assert_eq!(&buf[start..end], b"abc");
    }

    #[test]
    fn overflow_pointer_resolves_to_final_position() {
        // Page 2 row 0 holds the content; page 1 row 0 points at it.
        let mut ptr = Vec::new();
        ptr.extend(0u16.to_le_bytes());
        ptr.extend(2i32.to_le_bytes());
        let mut pointer_page = data_page(&[&ptr]);
        let slot = page::row_start(&pointer_page, &FORMAT_V1, 0).unwrap();
        page::set_row_start(&mut pointer_page, &FORMAT_V1, 0, slot | OVERFLOW_ROW_MASK).unwrap();

        let content_page = data_page(&[b"overflowed"]);

        let (_dir, channel) = channel_with_pages(&[pointer_page, content_page]);
        let mut state = RowState::new(channel, &FORMAT_V1);

        assert!(state.set_row(1, 0).unwrap());
        assert_eq!(state.page_number(), 1);
        assert_eq!(state.final_page_number(), 2);
        assert_eq!(state.final_row_number(), 0);

        let buf = state.final_buffer().unwrap();
        let (start, end) = page::row_region(buf, &FORMAT_V1, 0).unwrap();
        assert_eq!(&buf[start..end], b"overflowed");
    }

    #[test]
    fn reset_forgets_cached_page() {
        let (_dir, channel) = channel_with_pages(&[data_page(&[b"x"])]);
        let mut state = RowState::new(channel, &FORMAT_V1);

        assert!(state.set_row(1, 0).unwrap());
        state.reset();

        assert!(!state.is_positioned());
        assert_eq!(state.page_number(), INVALID_PAGE_NUMBER);
        assert_eq!(state.final_row_number(), INVALID_ROW_NUMBER as i32);
    }
}
