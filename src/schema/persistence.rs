//! # Catalog Persistence
//!
//! This module implements serialization and deserialization of the catalog
//! (table definitions, usage-map roots, index definitions, relationship
//! records) to and from the catalog page chain.
//!
//! ## Catalog Blob Format
//!
//! Length-prefixed binary, little-endian throughout. Strings are
//! `u16 length + UTF-8 bytes`. The blob is chunked across a page chain
//! (see `storage::chain`).
//!
//! ```text
//! table_count: u32
//! For each table:
//!   name: str
//!   column_count: u16
//!   For each column: name: str, data_type: u8
//!   usage_map_root: u32
//!   index_count: u16
//!   For each index: name: str, is_unique: u8, column_count: u16, columns: str...
//! relationship_count: u32
//! For each relationship:
//!   name: str
//!   primary_table: str
//!   secondary_table: str
//!   flags: u32
//!   column_pair_count: u16
//!   For each pair: primary_column: str, secondary_column: str
//! checksum: u32   CRC-32 of all preceding bytes
//! ```
//!
//! The trailing CRC-32 detects torn or corrupted catalog writes at open
//! time.

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{bail, ensure, Result};

use crate::relationship::Relationship;
use crate::schema::{ColumnDef, IndexDef};
use crate::types::DataType;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Persisted description of one table: everything the catalog needs to
/// rebuild a `Table` on open. The owned-page set itself lives in the
/// usage-map page chain rooted at `map_root`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub map_root: u32,
    pub indexes: Vec<IndexDef>,
}

pub fn serialize_catalog(tables: &[TableMeta], relationships: &[Relationship]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    buf.extend((tables.len() as u32).to_le_bytes());
    for table in tables {
        write_str(&mut buf, &table.name)?;

        ensure!(
            table.columns.len() <= u16::MAX as usize,
            "table '{}' has too many columns",
            table.name
        );
        buf.extend((table.columns.len() as u16).to_le_bytes());
        for column in &table.columns {
            write_str(&mut buf, column.name())?;
            buf.push(column.data_type() as u8);
        }

        buf.extend(table.map_root.to_le_bytes());

        buf.extend((table.indexes.len() as u16).to_le_bytes());
        for index in &table.indexes {
            write_str(&mut buf, index.name())?;
            buf.push(index.is_unique() as u8);
            buf.extend((index.columns().len() as u16).to_le_bytes());
            for column in index.columns() {
                write_str(&mut buf, column)?;
            }
        }
    }

    buf.extend((relationships.len() as u32).to_le_bytes());
    for rel in relationships {
        write_str(&mut buf, rel.name())?;
        write_str(&mut buf, rel.primary_table())?;
        write_str(&mut buf, rel.secondary_table())?;
        buf.extend(rel.flags().to_le_bytes());

        ensure!(
            rel.primary_columns().len() == rel.secondary_columns().len(),
            "relationship '{}' has mismatched column lists",
            rel.name()
        );
        buf.extend((rel.primary_columns().len() as u16).to_le_bytes());
        for (pcol, scol) in rel.primary_columns().iter().zip(rel.secondary_columns()) {
            write_str(&mut buf, pcol)?;
            write_str(&mut buf, scol)?;
        }
    }

    let checksum = CRC32.checksum(&buf);
    buf.extend(checksum.to_le_bytes());
    Ok(buf)
}

pub fn deserialize_catalog(bytes: &[u8]) -> Result<(Vec<TableMeta>, Vec<Relationship>)> {
    ensure!(bytes.len() >= 4, "catalog blob too small");

    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes(tail.try_into().unwrap());
    let computed = CRC32.checksum(body);
    ensure!(
        stored == computed,
        "catalog checksum mismatch: stored {:08x}, computed {:08x}",
        stored,
        computed
    );

    let mut reader = Reader::new(body);

    let table_count = reader.read_u32()? as usize;
    let mut tables = Vec::with_capacity(table_count);
    for _ in 0..table_count {
        let name = reader.read_str()?;

        let column_count = reader.read_u16()? as usize;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let col_name = reader.read_str()?;
            let data_type = DataType::try_from(reader.read_u8()?)?;
            columns.push(ColumnDef::new(col_name, data_type));
        }

        let map_root = reader.read_u32()?;

        let index_count = reader.read_u16()? as usize;
        let mut indexes = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let idx_name = reader.read_str()?;
            let unique = reader.read_u8()? != 0;
            let idx_col_count = reader.read_u16()? as usize;
            let mut idx_columns = Vec::with_capacity(idx_col_count);
            for _ in 0..idx_col_count {
                idx_columns.push(reader.read_str()?);
            }
            indexes.push(IndexDef::new(idx_name, idx_columns, unique));
        }

        tables.push(TableMeta {
            name,
            columns,
            map_root,
            indexes,
        });
    }

    let rel_count = reader.read_u32()? as usize;
    let mut relationships = Vec::with_capacity(rel_count);
    for _ in 0..rel_count {
        let name = reader.read_str()?;
        let primary_table = reader.read_str()?;
        let secondary_table = reader.read_str()?;
        let flags = reader.read_u32()?;

        let pair_count = reader.read_u16()? as usize;
        let mut primary_columns = Vec::with_capacity(pair_count);
        let mut secondary_columns = Vec::with_capacity(pair_count);
        for _ in 0..pair_count {
            primary_columns.push(reader.read_str()?);
            secondary_columns.push(reader.read_str()?);
        }

        relationships.push(Relationship::new(
            name,
            primary_table,
            secondary_table,
            flags,
            primary_columns,
            secondary_columns,
        ));
    }

    ensure!(
        reader.remaining() == 0,
        "trailing bytes after catalog: {}",
        reader.remaining()
    );

    Ok((tables, relationships))
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    ensure!(
        bytes.len() <= u16::MAX as usize,
        "name '{}' is too long (max {} bytes)",
        s,
        u16::MAX
    );
    buf.extend((bytes.len() as u16).to_le_bytes());
    buf.extend(bytes);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + n <= self.bytes.len(),
            "truncated catalog: need {} bytes at offset {}",
            n,
            self.pos
        );
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(e) => bail!("invalid UTF-8 in catalog string: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tables() -> Vec<TableMeta> {
        vec![
            TableMeta {
                name: "orders".to_string(),
                columns: vec![
                    ColumnDef::new("id", DataType::Int),
                    ColumnDef::new("note", DataType::Text),
                ],
                map_root: 2,
                indexes: vec![IndexDef::new(".rC", vec!["id"], true)],
            },
            TableMeta {
                name: "lines".to_string(),
                columns: vec![ColumnDef::new("order_id", DataType::Int)],
                map_root: 3,
                indexes: vec![],
            },
        ]
    }

    fn sample_relationships() -> Vec<Relationship> {
        vec![Relationship::new(
            "orderslines",
            "orders",
            "lines",
            0x0100,
            vec!["id".to_string()],
            vec!["order_id".to_string()],
        )]
    }

    #[test]
    fn blob_round_trip() {
        let tables = sample_tables();
        let relationships = sample_relationships();

        let blob = serialize_catalog(&tables, &relationships).unwrap();
        let (tables2, relationships2) = deserialize_catalog(&blob).unwrap();

        assert_eq!(tables2, tables);
        assert_eq!(relationships2.len(), 1);
        assert_eq!(relationships2[0].name(), "orderslines");
        assert_eq!(relationships2[0].flags(), 0x0100);
        assert_eq!(relationships2[0].secondary_columns(), ["order_id"]);
    }

    #[test]
    fn empty_catalog_round_trip() {
        let blob = serialize_catalog(&[], &[]).unwrap();
        let (tables, relationships) = deserialize_catalog(&blob).unwrap();

        assert!(tables.is_empty());
        assert!(relationships.is_empty());
    }

    #[test]
    fn corrupted_blob_fails_checksum() {
        let mut blob = serialize_catalog(&sample_tables(), &[]).unwrap();
        blob[4] ^= 0xFF;

        let result = deserialize_catalog(&blob);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("catalog checksum mismatch"));
    }
}
