//! The selected master record

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One record of the master store.
///
/// Immutable once loaded. Shares the header with the store it came from, so
/// selecting a row does not copy the column names.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterRow {
    key: String,
    header: Arc<[String]>,
    values: Vec<String>,
}

impl MasterRow {
    pub(crate) fn new(key: impl Into<String>, header: Arc<[String]>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            header,
            values,
        }
    }

    /// Value of the selection key column.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Column names in file order.
    pub fn columns(&self) -> &[String] {
        &self.header
    }

    /// Whether the row's schema contains `column` (exact, case-sensitive).
    pub fn has_column(&self, column: &str) -> bool {
        self.header.iter().any(|c| c == column)
    }

    /// Raw cell value for a column. Empty cells come back as `Some("")`;
    /// `None` means the column itself does not exist.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    /// Iterate over `(column, value)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Identifying fields used in stage inputs and the report header.
    pub fn summary(&self) -> ListingSummary {
        let field = |column: &str| match self.get(column) {
            Some(v) if !v.trim().is_empty() => v.to_string(),
            _ => "Unknown".to_string(),
        };
        ListingSummary {
            key: self.key.clone(),
            address: field("Property Address"),
            city: field("City"),
            state: field("State"),
        }
    }
}

/// Identifying fields of the listing under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub key: String,
    pub address: String,
    pub city: String,
    pub state: String,
}

impl std::fmt::Display for ListingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {}, {})", self.key, self.address, self.city, self.state)
    }
}
