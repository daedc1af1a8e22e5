//! # Page Chains
//!
//! Variable-length metadata blobs (the catalog, per-table usage maps) are
//! stored as singly-linked chains of pages. Each chain page has an 8-byte
//! header:
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Page type (Catalog or UsageMap)
//! 1       1     Flags (unused)
//! 2       2     Chunk length (u16 little-endian)
//! 4       4     Next chain page, 0 = end of chain (u32 little-endian)
//! 8       ...   Chunk bytes
//! ```
//!
//! Rewriting a chain reuses its existing pages and allocates new ones
//! only when the blob outgrows them; a shrinking blob terminates the
//! chain early and leaves any stale tail pages unreferenced.

use eyre::{ensure, Result};

use super::{PageChannel, PageType, PAGE_SIZE};

pub const CHAIN_PAGE_HEADER_SIZE: usize = 8;
pub const CHAIN_CHUNK_SIZE: usize = PAGE_SIZE - CHAIN_PAGE_HEADER_SIZE;

/// Writes `blob` into the chain rooted at `root`, extending it with
/// freshly allocated pages as needed. The caller must hold the
/// exclusive-write latch.
pub fn write_chain(
    channel: &PageChannel,
    root: u32,
    page_type: PageType,
    blob: &[u8],
) -> Result<()> {
    let mut chunks = blob.chunks(CHAIN_CHUNK_SIZE);
    let mut page_no = root;

    loop {
        let chunk = chunks.next().unwrap_or(&[]);
        let more_chunks = chunk.len() == CHAIN_CHUNK_SIZE;

        // Reuse the existing continuation page if the chain has one.
        let existing_next = channel.with_page(page_no, |buf| {
            if buf[0] == page_type as u8 {
                Ok(u32::from_le_bytes(buf[4..8].try_into().unwrap()))
            } else {
                Ok(0)
            }
        })?;

        let next = if more_chunks {
            if existing_next != 0 {
                existing_next
            } else {
                channel.allocate_page()?
            }
        } else {
            0
        };

        channel.with_page_mut(page_no, |buf| {
            buf.fill(0);
            buf[0] = page_type as u8;
            buf[2..4].copy_from_slice(&(chunk.len() as u16).to_le_bytes());
            buf[4..8].copy_from_slice(&next.to_le_bytes());
            buf[CHAIN_PAGE_HEADER_SIZE..CHAIN_PAGE_HEADER_SIZE + chunk.len()]
                .copy_from_slice(chunk);
            Ok(())
        })?;

        if !more_chunks {
            return Ok(());
        }
        page_no = next;
    }
}

/// Reads the whole blob from the chain rooted at `root`.
pub fn read_chain(channel: &PageChannel, root: u32, page_type: PageType) -> Result<Vec<u8>> {
    let mut blob = Vec::new();
    let mut page_no = root;
    let mut visited = 0u32;

    loop {
        ensure!(
            visited <= channel.page_count(),
            "page chain rooted at {} contains a cycle",
            root
        );
        visited += 1;

        let next = channel.with_page(page_no, |buf| {
            ensure!(
                buf[0] == page_type as u8,
                "page {} is not a {:?} page",
                page_no,
                page_type
            );
            let len = u16::from_le_bytes(buf[2..4].try_into().unwrap()) as usize;
            ensure!(len <= CHAIN_CHUNK_SIZE, "chain chunk length {} too large", len);
            blob.extend_from_slice(&buf[CHAIN_PAGE_HEADER_SIZE..CHAIN_PAGE_HEADER_SIZE + len]);
            Ok(u32::from_le_bytes(buf[4..8].try_into().unwrap()))
        })?;

        if next == 0 {
            return Ok(blob);
        }
        page_no = next;
    }
}
