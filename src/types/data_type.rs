//! # Logical Column Types
//!
//! This module provides the canonical `DataType` enum for JetDB, used across
//! column definitions, record storage, and relationship validation.
//!
//! ## Design Principles
//!
//! 1. **Single source of truth**: one DataType enum used everywhere
//! 2. **Storage-efficient**: `#[repr(u8)]` for a single-byte discriminant
//! 3. **Metadata-free**: lengths live in the record encoding, not the enum
//!
//! ## Storage Encoding
//!
//! The discriminant doubles as the record tag byte for non-null values,
//! so record decode can recover the logical type without consulting the
//! column metadata.

use eyre::Result;

/// Canonical logical type for all JetDB columns.
///
/// Uses `#[repr(u8)]` so the discriminant can be written directly into
/// record tags and catalog bytes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool = 1,
    Int = 2,
    Float = 3,
    Text = 4,
    Blob = 5,
}

impl DataType {
    /// Returns the fixed byte size of the encoded payload, or None for
    /// variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int => Some(8),
            DataType::Float => Some(8),
            DataType::Text | DataType::Blob => None,
        }
    }

    /// Returns true if this type requires variable-length encoding.
    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }
}

impl TryFrom<u8> for DataType {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Bool),
            2 => Ok(DataType::Int),
            3 => Ok(DataType::Float),
            4 => Ok(DataType::Text),
            5 => Ok(DataType::Blob),
            _ => eyre::bail!("invalid DataType discriminant: {}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminant_round_trip() {
        for dt in [
            DataType::Bool,
            DataType::Int,
            DataType::Float,
            DataType::Text,
            DataType::Blob,
        ] {
            assert_eq!(DataType::try_from(dt as u8).unwrap(), dt);
        }
    }

    #[test]
    fn invalid_discriminant_fails() {
        let result = DataType::try_from(0);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("invalid DataType discriminant"));
    }

    #[test]
    fn variable_width_types() {
        assert!(DataType::Text.is_variable());
        assert!(DataType::Blob.is_variable());
        assert_eq!(DataType::Int.fixed_size(), Some(8));
    }
}
