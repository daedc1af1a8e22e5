//! # File Header
//!
//! Page 0 of a JetDB file begins with a 64-byte header identifying the
//! file and anchoring the catalog page chain.
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "JetDB file v1\x00\x00\x00"
//! 16      4     Version: 1 (u32 little-endian)
//! 20      4     Page size: 4096 (u32 little-endian)
//! 24      4     Catalog root page (u32 little-endian)
//! 28      4     Next table id (u32 little-endian)
//! 32      32    Reserved for future use
//! ```
//!
//! All multi-byte fields use little-endian encoding. The rest of page 0
//! is unused in format V1.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const FILE_MAGIC: &[u8; 16] = b"JetDB file v1\x00\x00\x00";
pub const CURRENT_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DbFileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    catalog_root: U32,
    next_table_id: U32,
    reserved: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<DbFileHeader>() == FILE_HEADER_SIZE);

impl DbFileHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            magic: *FILE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(page_size),
            catalog_root: U32::new(0),
            next_table_id: U32::new(1),
            reserved: [0u8; 32],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for DbFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse DbFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == FILE_MAGIC,
            "invalid magic bytes in database file"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for DbFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse DbFileHeader: {:?}", e))
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn catalog_root(&self) -> u32 {
        self.catalog_root.get()
    }

    pub fn set_catalog_root(&mut self, page_no: u32) {
        self.catalog_root = U32::new(page_no);
    }

    pub fn next_table_id(&self) -> u32 {
        self.next_table_id.get()
    }

    pub fn set_next_table_id(&mut self, id: u32) {
        self.next_table_id = U32::new(id);
    }
}
