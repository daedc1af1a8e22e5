//! # Page Ownership Map
//!
//! Every table owns a set of data pages, attributed by the file's usage
//! map. `UsageMap` is the in-memory form of that set; `PageIterator`
//! walks it in either direction.
//!
//! ## Live Iteration
//!
//! The iterator never snapshots the map. Each `next_page`/`previous_page`
//! call queries the shared bitmap for the nearest owned page beyond the
//! iterator's last position, so pages added or removed mid-iteration are
//! observed: a cursor that is still short of a freshly allocated page
//! will reach it, and a page removed ahead of the cursor is skipped.
//!
//! Neighbour queries use the bitmap's rank/select primitives, so a step
//! costs O(log n) regardless of how sparse the owned set is.

use eyre::{Result, WrapErr};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::storage::{chain, PageChannel, PageType, INVALID_PAGE_NUMBER};

/// Iterator position strictly before every page number.
const BEFORE_ALL: i64 = -1;
/// Iterator position strictly after every page number.
const AFTER_ALL: i64 = u32::MAX as i64 + 1;

/// The set of pages owned by one table.
#[derive(Debug, Clone, Default)]
pub struct UsageMap {
    pages: Arc<RwLock<RoaringBitmap>>,
}

impl UsageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pages(pages: impl IntoIterator<Item = u32>) -> Self {
        let map = Self::new();
        {
            let mut set = map.pages.write();
            for page in pages {
                set.insert(page);
            }
        }
        map
    }

    pub fn add_page(&self, page_no: u32) {
        self.pages.write().insert(page_no);
    }

    pub fn remove_page(&self, page_no: u32) {
        self.pages.write().remove(page_no);
    }

    pub fn contains(&self, page_no: u32) -> bool {
        self.pages.read().contains(page_no)
    }

    pub fn page_count(&self) -> u64 {
        self.pages.read().len()
    }

    /// The highest owned page, if any. Appends target this page first.
    pub fn last_page(&self) -> Option<u32> {
        self.pages.read().max()
    }

    /// Owned pages in ascending order.
    pub fn to_vec(&self) -> Vec<u32> {
        self.pages.read().iter().collect()
    }

    /// Persists the owned-page set into the usage-map page chain rooted
    /// at `root`. The caller must hold the exclusive-write latch.
    pub fn save(&self, channel: &PageChannel, root: u32) -> Result<()> {
        let mut blob = Vec::new();
        self.pages
            .read()
            .serialize_into(&mut blob)
            .wrap_err("failed to serialize usage map")?;
        chain::write_chain(channel, root, PageType::UsageMap, &blob)
    }

    /// Loads an owned-page set from the usage-map page chain rooted at
    /// `root`.
    pub fn load(channel: &PageChannel, root: u32) -> Result<Self> {
        let blob = chain::read_chain(channel, root, PageType::UsageMap)?;
        let bitmap = RoaringBitmap::deserialize_from(blob.as_slice())
            .wrap_err("failed to deserialize usage map")?;
        Ok(Self {
            pages: Arc::new(RwLock::new(bitmap)),
        })
    }

    /// A fresh iterator positioned before the first owned page.
    pub fn iterator(&self) -> PageIterator {
        PageIterator {
            pages: Arc::clone(&self.pages),
            position: BEFORE_ALL,
        }
    }
}

/// Walks a table's owned pages forward or backward. Exhaustion is
/// signalled by `INVALID_PAGE_NUMBER`; the iterator then parks at the
/// corresponding end and can be walked back in the other direction.
#[derive(Debug)]
pub struct PageIterator {
    pages: Arc<RwLock<RoaringBitmap>>,
    position: i64,
}

impl PageIterator {
    /// Repositions before the first page (forward) or after the last
    /// page (reverse).
    pub fn reset(&mut self, move_forward: bool) {
        self.position = if move_forward { BEFORE_ALL } else { AFTER_ALL };
    }

    /// The next owned page above the current position, or
    /// `INVALID_PAGE_NUMBER` if none remain.
    pub fn next_page(&mut self) -> i32 {
        let pages = self.pages.read();
        let next = if self.position < 0 {
            pages.min()
        } else if self.position >= AFTER_ALL {
            None
        } else {
            // rank(p) counts members <= p, so selecting that rank yields
            // the smallest member strictly greater than p.
            let rank = pages.rank(self.position as u32);
            pages.select(rank as u32)
        };

        match next {
            Some(page) => {
                self.position = page as i64;
                page as i32
            }
            None => {
                self.position = AFTER_ALL;
                INVALID_PAGE_NUMBER
            }
        }
    }

    /// The nearest owned page below the current position, or
    /// `INVALID_PAGE_NUMBER` if none remain.
    pub fn previous_page(&mut self) -> i32 {
        let pages = self.pages.read();
        let prev = if self.position <= 0 {
            None
        } else if self.position >= AFTER_ALL {
            pages.max()
        } else {
            let rank = pages.rank(self.position as u32 - 1);
            if rank == 0 {
                None
            } else {
                pages.select(rank as u32 - 1)
            }
        };

        match prev {
            Some(page) => {
                self.position = page as i64;
                page as i32
            }
            None => {
                self.position = BEFORE_ALL;
                INVALID_PAGE_NUMBER
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_walk() {
        let map = UsageMap::from_pages([7, 11, 30]);
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), 7);
        assert_eq!(iter.next_page(), 11);
        assert_eq!(iter.next_page(), 30);
        assert_eq!(iter.next_page(), INVALID_PAGE_NUMBER);
        assert_eq!(iter.next_page(), INVALID_PAGE_NUMBER);
    }

    #[test]
    fn reverse_walk_from_end() {
        let map = UsageMap::from_pages([7, 11, 30]);
        let mut iter = map.iterator();
        iter.reset(false);

        assert_eq!(iter.previous_page(), 30);
        assert_eq!(iter.previous_page(), 11);
        assert_eq!(iter.previous_page(), 7);
        assert_eq!(iter.previous_page(), INVALID_PAGE_NUMBER);
    }

    #[test]
    fn direction_switch_mid_walk() {
        let map = UsageMap::from_pages([2, 4, 8]);
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), 2);
        assert_eq!(iter.next_page(), 4);
        assert_eq!(iter.previous_page(), 2);
        assert_eq!(iter.next_page(), 4);
    }

    #[test]
    fn exhausted_forward_then_reverse() {
        let map = UsageMap::from_pages([5]);
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), 5);
        assert_eq!(iter.next_page(), INVALID_PAGE_NUMBER);
        assert_eq!(iter.previous_page(), 5);
    }

    #[test]
    fn empty_map() {
        let map = UsageMap::new();
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), INVALID_PAGE_NUMBER);
        iter.reset(false);
        assert_eq!(iter.previous_page(), INVALID_PAGE_NUMBER);
    }

    #[test]
    fn pages_added_mid_iteration_are_observed() {
        let map = UsageMap::from_pages([3]);
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), 3);
        map.add_page(9);
        assert_eq!(iter.next_page(), 9);
    }

    #[test]
    fn pages_removed_mid_iteration_are_skipped() {
        let map = UsageMap::from_pages([3, 6, 9]);
        let mut iter = map.iterator();

        assert_eq!(iter.next_page(), 3);
        map.remove_page(6);
        assert!(!map.contains(6));
        assert_eq!(iter.next_page(), 9);
    }

    #[test]
    fn to_vec_is_sorted() {
        let map = UsageMap::from_pages([9, 2, 5]);
        assert_eq!(map.to_vec(), vec![2, 5, 9]);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PageChannel::create(dir.path().join("t.jet"), 1).unwrap();
        let root = channel.allocate_page().unwrap();

        let map = UsageMap::from_pages([4, 17, 120]);
        map.save(&channel, root).unwrap();

        let loaded = UsageMap::load(&channel, root).unwrap();
        assert_eq!(loaded.to_vec(), vec![4, 17, 120]);
    }
}
