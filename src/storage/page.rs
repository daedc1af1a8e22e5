//! # Page Types and Row Slot Layout
//!
//! This module defines the page structure for JetDB's storage layer. Every
//! 4KB page begins with a one-byte page type; data pages carry a 14-byte
//! header followed by the row slot table.
//!
//! ## Data Page Header Layout (14 bytes)
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
//! ```
//!
//! ## Row Slot Table
//!
//! Starting at `DbFormat::offset_row_start`, each row on a data page has a
//! 16-bit slot word holding the offset of the row's first content byte.
//! The two high bits are flags:
//!
//! ```text
//! 0x8000  DELETED_ROW_MASK   Row is a deletion tombstone
//! 0x4000  OVERFLOW_ROW_MASK  Slot holds an overflow pointer, not a row
//! 0x1FFF  OFFSET_MASK        Content offset within the page
//! ```
//!
//! A deleted slot keeps its offset bits so that neighbouring rows can
//! still locate their extents (a row's end is the previous row's start).
//!
//! ## Overflow Pointers
//!
//! A slot flagged with `OVERFLOW_ROW_MASK` points at a 6-byte pointer
//! `[u16 row][u32 page]` naming the page and slot where the actual row
//! content lives. Readers follow one level of indirection; pointer chains
//! are not written.
//!
//! ## Zero-Copy Access
//!
//! `DataPageHeader` uses `zerocopy` for safe transmutation from raw
//! bytes, so headers are read directly from page buffers without copying.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::format::DbFormat;

/// Row slot flag: the row has been deleted.
pub const DELETED_ROW_MASK: u16 = 0x8000;
/// Row slot flag: the slot holds an overflow pointer.
pub const OVERFLOW_ROW_MASK: u16 = 0x4000;
/// Row slot mask extracting the content offset.
pub const OFFSET_MASK: u16 = 0x1FFF;

/// Size of an on-page overflow pointer: `[u16 row][u32 page]`.
pub const OVERFLOW_PTR_SIZE: usize = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid = 0x00,
    Data = 0x01,
    Catalog = 0x02,
    UsageMap = 0x03,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Data,
            0x02 => PageType::Catalog,
            0x03 => PageType::UsageMap,
            _ => PageType::Invalid,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataPageHeader {
    page_type: u8,
    flags: u8,
    free_space: U16,
    owner: U32,
    reserved: U32,
    row_count: U16,
}

pub const DATA_PAGE_HEADER_SIZE: usize = 14;

const _: () = assert!(std::mem::size_of::<DataPageHeader>() == DATA_PAGE_HEADER_SIZE);

impl DataPageHeader {
    pub fn new(owner: u32) -> Self {
        Self {
            page_type: PageType::Data as u8,
            flags: 0,
            free_space: U16::new(0),
            owner: U32::new(owner),
            reserved: U32::new(0),
            row_count: U16::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= DATA_PAGE_HEADER_SIZE,
            "buffer too small for DataPageHeader: {} < {}",
            data.len(),
            DATA_PAGE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..DATA_PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DataPageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= DATA_PAGE_HEADER_SIZE,
            "buffer too small for DataPageHeader: {} < {}",
            data.len(),
            DATA_PAGE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..DATA_PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DataPageHeader: {:?}", e))
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn free_space(&self) -> u16 {
        self.free_space.get()
    }

    pub fn set_free_space(&mut self, bytes: u16) {
        self.free_space = U16::new(bytes);
    }

    pub fn owner(&self) -> u32 {
        self.owner.get()
    }

    pub fn row_count(&self) -> u16 {
        self.row_count.get()
    }

    pub fn set_row_count(&mut self, rows: u16) {
        self.row_count = U16::new(rows);
    }
}

/// Reads the row count from a page buffer, returning 0 for anything that
/// is not a data page. Mirrors the cursor contract: the page-type byte is
/// checked first, then the 16-bit count at the format's row-count offset.
pub fn rows_on_page(buf: &[u8], format: &DbFormat) -> i32 {
    if buf.first() != Some(&(PageType::Data as u8)) {
        return 0;
    }
    let off = format.offset_num_rows_on_data_page;
    u16::from_le_bytes([buf[off], buf[off + 1]]) as i32
}

/// Reads the unmasked slot word for the given row.
pub fn row_start(buf: &[u8], format: &DbFormat, row_number: i32) -> Result<u16> {
    let off = format.row_start_offset(row_number);
    ensure!(
        row_number >= 0 && off + format.size_row_location <= format.page_size,
        "row {} slot is outside the page",
        row_number
    );
    Ok(u16::from_le_bytes([buf[off], buf[off + 1]]))
}

/// Writes the slot word for the given row.
pub fn set_row_start(buf: &mut [u8], format: &DbFormat, row_number: i32, value: u16) -> Result<()> {
    let off = format.row_start_offset(row_number);
    ensure!(
        row_number >= 0 && off + format.size_row_location <= format.page_size,
        "row {} slot is outside the page",
        row_number
    );
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Offset of the lowest row content on the page (the next appended row
/// lands immediately below it). Rows are written back-to-front, so this
/// is the last slot's offset, or the page end for an empty page.
pub fn free_content_start(buf: &[u8], format: &DbFormat) -> Result<usize> {
    let count = rows_on_page(buf, format);
    if count == 0 {
        return Ok(format.page_size);
    }
    let slot = row_start(buf, format, count - 1)?;
    Ok((slot & OFFSET_MASK) as usize)
}

/// Returns true if the unmasked slot word flags a deleted row.
#[inline]
pub fn is_deleted_row(row_start: u16) -> bool {
    row_start & DELETED_ROW_MASK != 0
}

/// Returns true if the unmasked slot word flags an overflow pointer.
#[inline]
pub fn is_overflow_row(row_start: u16) -> bool {
    row_start & OVERFLOW_ROW_MASK != 0
}

/// Content extent of a row within its page: `(start, end)`. Row content
/// grows up from the page end, so a row ends where the previous row
/// starts; row 0 ends at the page boundary.
pub fn row_region(buf: &[u8], format: &DbFormat, row_number: i32) -> Result<(usize, usize)> {
    let start = (row_start(buf, format, row_number)? & OFFSET_MASK) as usize;
    let end = if row_number == 0 {
        format.page_size
    } else {
        (row_start(buf, format, row_number - 1)? & OFFSET_MASK) as usize
    };

    ensure!(
        start >= format.row_start_offset(rows_on_page(buf, format))
            && start <= end
            && end <= format.page_size,
        "corrupt row slot: row {} has extent {}..{}",
        row_number,
        start,
        end
    );

    Ok((start, end))
}
