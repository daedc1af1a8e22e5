//! # Record Serialization
//!
//! This module provides the binary row encoding used on data pages. A
//! record is self-describing: each value carries a one-byte tag, so decode
//! never needs the column metadata to find value boundaries (metadata is
//! still consulted to validate types on the write path).
//!
//! ## Record Binary Layout
//!
//! ```text
//! +--------------+----------------------------+
//! | Value Count  | Tagged Values              |
//! | (u16)        | [tag u8][payload] ...      |
//! +--------------+----------------------------+
//! ```
//!
//! | Tag | Type  | Payload |
//! |-----|-------|---------|
//! | 0   | Null  | none |
//! | 1   | Bool  | 1 byte |
//! | 2   | Int   | 8 bytes, i64 little-endian |
//! | 3   | Float | 8 bytes, f64 little-endian |
//! | 4   | Text  | u16 length + UTF-8 bytes |
//! | 5   | Blob  | u16 length + bytes |
//!
//! Non-null tags are the `DataType` discriminants, so the logical type of
//! a stored value is recoverable without the schema.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::types::{DataType, OwnedValue};

const NULL_TAG: u8 = 0;

/// Encodes a row of values into a fresh buffer.
pub fn encode_row(values: &[OwnedValue]) -> Result<Vec<u8>> {
    ensure!(
        values.len() <= u16::MAX as usize,
        "row has too many values: {}",
        values.len()
    );

    let mut buf = Vec::with_capacity(16 * values.len() + 2);
    buf.extend((values.len() as u16).to_le_bytes());

    for value in values {
        match value {
            OwnedValue::Null => buf.push(NULL_TAG),
            OwnedValue::Bool(b) => {
                buf.push(DataType::Bool as u8);
                buf.push(*b as u8);
            }
            OwnedValue::Int(i) => {
                buf.push(DataType::Int as u8);
                buf.extend(i.to_le_bytes());
            }
            OwnedValue::Float(f) => {
                buf.push(DataType::Float as u8);
                buf.extend(f.to_le_bytes());
            }
            OwnedValue::Text(s) => {
                ensure!(
                    s.len() <= u16::MAX as usize,
                    "text value of {} bytes is too long",
                    s.len()
                );
                buf.push(DataType::Text as u8);
                buf.extend((s.len() as u16).to_le_bytes());
                buf.extend(s.as_bytes());
            }
            OwnedValue::Blob(b) => {
                ensure!(
                    b.len() <= u16::MAX as usize,
                    "blob value of {} bytes is too long",
                    b.len()
                );
                buf.push(DataType::Blob as u8);
                buf.extend((b.len() as u16).to_le_bytes());
                buf.extend(b);
            }
        }
    }

    Ok(buf)
}

/// Decodes every value of an encoded row.
pub fn decode_row(bytes: &[u8]) -> Result<Vec<OwnedValue>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u16()? as usize;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(reader.read_value()?);
    }
    Ok(values)
}

/// Decodes a single value of an encoded row, skipping earlier values
/// without materialising them.
pub fn decode_value_at(bytes: &[u8], index: usize) -> Result<OwnedValue> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u16()? as usize;
    ensure!(
        index < count,
        "value index {} out of bounds for record of {} values",
        index,
        count
    );

    for _ in 0..index {
        reader.skip_value()?;
    }
    reader.read_value()
}

/// Byte offsets where each value's tag begins. Scratch for callers that
/// walk a record more than once.
pub fn value_offsets(bytes: &[u8]) -> Result<SmallVec<[usize; 16]>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u16()? as usize;

    let mut offsets = SmallVec::with_capacity(count);
    for _ in 0..count {
        offsets.push(reader.pos);
        reader.skip_value()?;
    }
    Ok(offsets)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + n <= self.bytes.len(),
            "truncated record: need {} bytes at offset {}, have {}",
            n,
            self.pos,
            self.bytes.len() - self.pos
        );
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_value(&mut self) -> Result<OwnedValue> {
        let tag = self.take(1)?[0];
        if tag == NULL_TAG {
            return Ok(OwnedValue::Null);
        }

        match DataType::try_from(tag)? {
            DataType::Bool => Ok(OwnedValue::Bool(self.take(1)?[0] != 0)),
            DataType::Int => {
                let b = self.take(8)?;
                Ok(OwnedValue::Int(i64::from_le_bytes(b.try_into().unwrap())))
            }
            DataType::Float => {
                let b = self.take(8)?;
                Ok(OwnedValue::Float(f64::from_le_bytes(b.try_into().unwrap())))
            }
            DataType::Text => {
                let len = self.read_u16()? as usize;
                let b = self.take(len)?;
                match std::str::from_utf8(b) {
                    Ok(s) => Ok(OwnedValue::Text(s.to_string())),
                    Err(e) => bail!("invalid UTF-8 in text value: {}", e),
                }
            }
            DataType::Blob => {
                let len = self.read_u16()? as usize;
                Ok(OwnedValue::Blob(self.take(len)?.to_vec()))
            }
        }
    }

    fn skip_value(&mut self) -> Result<()> {
        let tag = self.take(1)?[0];
        if tag == NULL_TAG {
            return Ok(());
        }

        let dt = DataType::try_from(tag)?;
        match dt.fixed_size() {
            Some(n) => {
                self.take(n)?;
            }
            None => {
                let len = self.read_u16()? as usize;
                self.take(len)?;
            }
        }
        Ok(())
    }
}
