//! # On-Disk Layout Constants
//!
//! This module defines `DbFormat`, the layout descriptor consulted by the
//! table and cursor layers whenever they interpret raw page bytes. The
//! descriptor pins down where the data-page row count lives, where the row
//! slot table starts, and how wide a row-location word is.
//!
//! ## Data Page Layout (format V1)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     page_type    Type of page (Data, Catalog, ...)
//! 1       1     flags        Page flags (unused in V1)
//! 2       2     free_space   Bytes of free space remaining
//! 4       4     owner        Table id owning this page
//! 8       4     reserved     Reserved for future use
//! 12      2     row_count    Number of row slots on this page
//! 14      2*N   row_starts   Row slot table, one 16-bit word per row
//! ...           free space
//! ...           row content  Grows up from the end of the page
//! 4096          page end
//! ```
//!
//! Row content is written back-to-front: row 0 occupies the highest
//! addresses, so a row's extent runs from its own start offset to the
//! previous row's start offset (or the page end for row 0).
//!
//! All multi-byte page fields are little-endian.

use crate::storage::PAGE_SIZE;

/// Layout constants for one version of the file format.
///
/// The cursor and table layers never hard-code offsets; they go through
/// the format descriptor attached to the database, so a future format
/// revision only has to supply a new static.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbFormat {
    /// Bytes per page.
    pub page_size: usize,
    /// Offset of the 16-bit row count within a data page.
    pub offset_num_rows_on_data_page: usize,
    /// Offset of the first row slot word within a data page.
    pub offset_row_start: usize,
    /// Width of one row slot word, in bytes.
    pub size_row_location: usize,
    /// Largest encoded row that fits on a page alongside one slot word.
    pub max_row_size: usize,
}

/// Format V1: 4KB pages, 14-byte data-page header, 2-byte row locations.
pub static FORMAT_V1: DbFormat = DbFormat {
    page_size: PAGE_SIZE,
    offset_num_rows_on_data_page: 12,
    offset_row_start: 14,
    size_row_location: 2,
    max_row_size: PAGE_SIZE - 14 - 2,
};

impl DbFormat {
    /// Byte offset of the slot word for the given row number.
    #[inline]
    pub fn row_start_offset(&self, row_number: i32) -> usize {
        self.offset_row_start + self.size_row_location * row_number as usize
    }
}
