//! # Value and Type System
//!
//! The logical types JetDB rows can carry, and the owned value enum used
//! across the row read/write API.
//!
//! - `data_type`: the `DataType` enum (single-byte discriminant, stored in
//!   record tags and column metadata)
//! - `value`: `OwnedValue`, a fully-owned row value

mod data_type;
mod value;

pub use data_type::DataType;
pub use value::OwnedValue;
