//! # Column Value Matching
//!
//! Pluggable equality for the cursor's find operations. The default
//! policy is null-safe value equality: two NULLs match, NULL and
//! non-NULL do not, and everything else compares by value. A
//! case-insensitive variant relaxes text comparison and defers to the
//! simple policy for every other type.
//!
//! Matchers are pure and stateless; a cursor can swap its matcher at any
//! time via [`crate::Cursor::set_column_matcher`].

use crate::table::Table;
use crate::types::OwnedValue;

/// Policy deciding whether two column values should be considered a
/// match for the given column of the given table.
pub trait ColumnMatcher {
    /// Returns `true` if `value1` should be considered a match for
    /// `value2` in the named column.
    fn matches(&self, table: &Table, column_name: &str, value1: &OwnedValue, value2: &OwnedValue)
        -> bool;
}

/// Null-safe value equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleColumnMatcher;

impl ColumnMatcher for SimpleColumnMatcher {
    fn matches(
        &self,
        _table: &Table,
        _column_name: &str,
        value1: &OwnedValue,
        value2: &OwnedValue,
    ) -> bool {
        value1 == value2
    }
}

/// Null-safe value equality with case-insensitive text comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveColumnMatcher;

impl ColumnMatcher for CaseInsensitiveColumnMatcher {
    fn matches(
        &self,
        table: &Table,
        column_name: &str,
        value1: &OwnedValue,
        value2: &OwnedValue,
    ) -> bool {
        if let (OwnedValue::Text(t1), OwnedValue::Text(t2)) = (value1, value2) {
            return t1.to_lowercase() == t2.to_lowercase();
        }
        SimpleColumnMatcher.matches(table, column_name, value1, value2)
    }
}
