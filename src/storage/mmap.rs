//! # Memory-Mapped File Storage
//!
//! `MmapStorage` owns the database file and the single shared mapping of
//! it. It is the lowest layer of the storage stack; `PageChannel` wraps
//! it in locks and is what the rest of the crate talks to.
//!
//! ## Page Slices
//!
//! All access is page-granular. `page`/`page_mut` translate a page number
//! into a byte range through one bounds check (`span`) and hand out a
//! slice of the mapping; there is no per-page copy at this layer.
//!
//! ## Growth
//!
//! The file only ever grows, page-aligned (`extend_to`). Extending swaps
//! in a mapping of the new length, which invalidates every outstanding
//! page slice; `extend_to` therefore takes `&mut self`, and the borrow
//! checker rules out a slice from `page`/`page_mut` being alive across
//! the swap. Dirty pages of the old mapping stay attached to the file
//! through the kernel page cache when it is dropped, so the swap itself
//! needs no flush; durability is `flush`'s job, on its own schedule.
//!
//! ## Errors
//!
//! Failures name the file and the page involved so they read well after
//! bubbling up several layers of eyre context.

use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::PAGE_SIZE;

#[derive(Debug)]
pub struct MmapStorage {
    file: File,
    path: PathBuf,
    map: MmapMut,
    pages: u32,
}

impl MmapStorage {
    /// Creates the file with `pages` zeroed pages, replacing anything
    /// already at `path`.
    pub fn create<P: AsRef<Path>>(path: P, pages: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure!(pages > 0, "a database file cannot have zero pages");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .wrap_err_with(|| format!("cannot create '{}'", path.display()))?;
        file.set_len(pages as u64 * PAGE_SIZE as u64)
            .wrap_err_with(|| format!("cannot size '{}' to {} pages", path.display(), pages))?;

        let map = Self::map_pages(&file, &path)?;
        Ok(Self {
            file,
            path,
            map,
            pages,
        })
    }

    /// Opens an existing file, which must hold a whole number of pages.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("cannot open '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("cannot stat '{}'", path.display()))?
            .len();
        ensure!(
            len != 0 && len % PAGE_SIZE as u64 == 0,
            "'{}' is {} bytes, which is not a whole number of {} byte pages",
            path.display(),
            len,
            PAGE_SIZE
        );
        let pages = u32::try_from(len / PAGE_SIZE as u64)
            .wrap_err_with(|| format!("'{}' has more pages than a page number can hold", path.display()))?;

        let map = Self::map_pages(&file, &path)?;
        Ok(Self {
            file,
            path,
            map,
            pages,
        })
    }

    /// The one place a mapping is made.
    fn map_pages(file: &File, path: &Path) -> Result<MmapMut> {
        // SAFETY: the mapping aliases file memory. Sound here because this
        // handle is the file's only writer for its lifetime (opened
        // read-write, never handed out), every slice is produced through
        // span() against the page count captured alongside this mapping,
        // and swapping the mapping requires &mut self upstream, so no
        // slice can outlive the mapping it was cut from.
        unsafe { MmapMut::map_mut(file) }
            .wrap_err_with(|| format!("cannot map '{}'", path.display()))
    }

    /// Byte range of one page within the mapping.
    fn span(&self, page_no: u32) -> Result<Range<usize>> {
        ensure!(
            page_no < self.pages,
            "page {} is past the end of '{}' ({} pages)",
            page_no,
            self.path.display(),
            self.pages
        );
        let start = page_no as usize * PAGE_SIZE;
        Ok(start..start + PAGE_SIZE)
    }

    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        let span = self.span(page_no)?;
        Ok(&self.map[span])
    }

    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        let span = self.span(page_no)?;
        Ok(&mut self.map[span])
    }

    /// Grows the file to `pages` pages and swaps in a mapping of the new
    /// length. Shrinking is not supported; a smaller target is a no-op.
    pub fn extend_to(&mut self, pages: u32) -> Result<()> {
        if pages <= self.pages {
            return Ok(());
        }

        self.file
            .set_len(pages as u64 * PAGE_SIZE as u64)
            .wrap_err_with(|| {
                format!("cannot extend '{}' to {} pages", self.path.display(), pages)
            })?;
        self.map = Self::map_pages(&self.file, &self.path)?;
        self.pages = pages;
        Ok(())
    }

    /// Blocks until everything written through the mapping is on disk.
    pub fn flush(&self) -> Result<()> {
        self.map
            .flush()
            .wrap_err_with(|| format!("cannot flush '{}'", self.path.display()))
    }

    pub fn page_count(&self) -> u32 {
        self.pages
    }

    /// Hints the kernel to start faulting in up to `count` pages from
    /// `first_page`, ahead of a sequential read. Out-of-range requests
    /// are clamped; a fully out-of-range start does nothing.
    pub fn advise_need(&self, first_page: u32, count: u32) {
        let Ok(span) = self.span(first_page) else {
            return;
        };
        let last = first_page.saturating_add(count).min(self.pages);
        let len = (last - first_page) as usize * PAGE_SIZE;

        #[cfg(unix)]
        // SAFETY: span() proved first_page is mapped and last was clamped
        // to the page count, so the advised region sits inside the
        // mapping. madvise is a hint; it never alters memory contents.
        unsafe {
            libc::madvise(
                self.map.as_ptr().add(span.start) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (span, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jet");

        {
            let mut storage = MmapStorage::create(&path, 3).unwrap();
            storage.page_mut(2).unwrap()[7] = 0xC3;
            storage.flush().unwrap();
        }

        let storage = MmapStorage::open(&path).unwrap();
        assert_eq!(storage.page_count(), 3);
        assert_eq!(storage.page(2).unwrap()[7], 0xC3);
    }

    #[test]
    fn zero_pages_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let result = MmapStorage::create(dir.path().join("t.jet"), 0);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot have zero pages"));
    }

    #[test]
    fn open_rejects_partial_page_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.jet");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 100]).unwrap();

        let result = MmapStorage::open(&path);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a whole number"));
    }

    #[test]
    fn page_number_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MmapStorage::create(dir.path().join("t.jet"), 2).unwrap();

        let result = storage.page(2);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("past the end"));
    }

    #[test]
    fn extend_grows_with_zeroed_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = MmapStorage::create(dir.path().join("t.jet"), 1).unwrap();
        storage.page_mut(0).unwrap()[0] = 0x11;

        storage.extend_to(4).unwrap();

        assert_eq!(storage.page_count(), 4);
        assert_eq!(storage.page(0).unwrap()[0], 0x11);
        assert!(storage.page(3).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn extend_to_smaller_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = MmapStorage::create(dir.path().join("t.jet"), 5).unwrap();

        storage.extend_to(2).unwrap();

        assert_eq!(storage.page_count(), 5);
    }

    #[test]
    fn advise_need_clamps_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MmapStorage::create(dir.path().join("t.jet"), 2).unwrap();

        storage.advise_need(0, 100);
        storage.advise_need(9, 1);
    }
}
