//! # Storage Module
//!
//! This module provides the foundational storage layer for JetDB: a single
//! memory-mapped file of fixed-size pages fronted by `PageChannel`, the
//! shared component that maps page numbers to byte buffers and owns the
//! exclusive-write latch.
//!
//! ## Architecture Overview
//!
//! ```text
//! Cursor / Table / Database
//!         │
//!         ▼
//!    PageChannel        read_page / with_page_mut / allocate_page
//!         │             start_exclusive_write -> ExclusiveWrite guard
//!         ▼
//!    MmapStorage        mmap'd file, grow-by-remap
//! ```
//!
//! `PageChannel` is process-wide state with a lifecycle tied to the
//! database instance; consumers receive an `Arc<PageChannel>` reference
//! rather than reaching for ambient state.
//!
//! ## Reads Copy, Writes Latch
//!
//! Readers copy a page into their own scratch buffer (`read_page`), so a
//! concurrent remap can never invalidate a reader's view. Structural
//! mutation goes through `with_page_mut` and must happen while holding
//! the exclusive-write latch taken via [`PageChannel::start_exclusive_write`].
//!
//! ## The Exclusive-Write Latch
//!
//! The latch is a single binary lock serialising every on-disk structural
//! mutation (row append, row delete, relationship write, catalog write).
//! `start_exclusive_write()` returns an [`ExclusiveWrite`] guard whose
//! drop releases the latch, so acquisition and release are paired on
//! every exit path, including failure. The latch is never held across a
//! return to user code.
//!
//! ## Module Organization
//!
//! - `mmap`: low-level memory-mapped storage (`MmapStorage`)
//! - `page`: page types, data-page header, row slot table access
//! - `header`: the page-0 file header
//! - `chain`: linked page chains for variable-length metadata blobs

pub mod chain;
mod header;
mod mmap;
pub mod page;

pub use header::{DbFileHeader, CURRENT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC};
pub use mmap::MmapStorage;
pub use page::{
    is_deleted_row, is_overflow_row, DataPageHeader, PageType, DATA_PAGE_HEADER_SIZE,
    DELETED_ROW_MASK, OFFSET_MASK, OVERFLOW_ROW_MASK,
};

use std::path::Path;

use eyre::{ensure, Result};
use parking_lot::{Mutex, MutexGuard, RwLock};

pub const PAGE_SIZE: usize = 4096;

/// Page number that refers to no page. Doubles as the page component of
/// the cursor's before-first sentinel.
pub const INVALID_PAGE_NUMBER: i32 = -1;

/// Shared channel between all consumers of a database file's pages.
#[derive(Debug)]
pub struct PageChannel {
    storage: RwLock<MmapStorage>,
    latch: Mutex<()>,
}

/// RAII guard for the exclusive-write latch. Dropping the guard releases
/// the latch; [`ExclusiveWrite::finish`] makes the release point explicit
/// at call sites that want one.
#[must_use = "the latch is released as soon as the guard is dropped"]
pub struct ExclusiveWrite<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ExclusiveWrite<'_> {
    pub fn finish(self) {}
}

impl PageChannel {
    /// Creates a new database file with the given number of initial pages.
    pub fn create<P: AsRef<Path>>(path: P, initial_page_count: u32) -> Result<Self> {
        Ok(Self {
            storage: RwLock::new(MmapStorage::create(path, initial_page_count)?),
            latch: Mutex::new(()),
        })
    }

    /// Opens an existing database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            storage: RwLock::new(MmapStorage::open(path)?),
            latch: Mutex::new(()),
        })
    }

    /// Takes the exclusive-write latch. Every on-disk structural mutation
    /// must happen while the returned guard is alive.
    pub fn start_exclusive_write(&self) -> ExclusiveWrite<'_> {
        ExclusiveWrite {
            _guard: self.latch.lock(),
        }
    }

    /// Copies the given page into `buf`, which must be exactly one page
    /// long.
    pub fn read_page(&self, buf: &mut [u8], page_no: u32) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "read buffer has {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );
        let storage = self.storage.read();
        buf.copy_from_slice(storage.page(page_no)?);
        Ok(())
    }

    /// Overwrites the given page from `buf`.
    pub fn write_page(&self, buf: &[u8], page_no: u32) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "write buffer has {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );
        let mut storage = self.storage.write();
        storage.page_mut(page_no)?.copy_from_slice(buf);
        Ok(())
    }

    /// Mutates the given page in place.
    pub fn with_page_mut<R>(
        &self,
        page_no: u32,
        f: impl FnOnce(&mut [u8]) -> Result<R>,
    ) -> Result<R> {
        let mut storage = self.storage.write();
        f(storage.page_mut(page_no)?)
    }

    /// Reads from the given page without copying a full page.
    pub fn with_page<R>(&self, page_no: u32, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        let storage = self.storage.read();
        f(storage.page(page_no)?)
    }

    /// Grows the file by one zeroed page and returns its page number.
    pub fn allocate_page(&self) -> Result<u32> {
        let mut storage = self.storage.write();
        let page_no = storage.page_count();
        storage.extend_to(page_no + 1)?;
        Ok(page_no)
    }

    pub fn page_count(&self) -> u32 {
        self.storage.read().page_count()
    }

    /// True if the signed page number names a page that exists in the
    /// file. Sentinel values (negative, `i32::MAX`) are never valid.
    pub fn is_valid_page(&self, page_no: i32) -> bool {
        page_no > 0 && page_no != i32::MAX && (page_no as u32) < self.page_count()
    }

    /// Hints the kernel that a sequential read of the given pages is
    /// coming.
    pub fn prefetch_pages(&self, start_page: u32, count: u32) {
        self.storage.read().advise_need(start_page, count);
    }

    /// Flushes all dirty pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.storage.read().flush()
    }
}
