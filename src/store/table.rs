//! In-memory master table with key-based lookup

use super::row::MasterRow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Column that uniquely identifies a listing in the master store.
pub const DEFAULT_KEY_COLUMN: &str = "StockNumber";

/// Errors raised while loading or querying the master store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("master store not found at {0}")]
    NotFound(PathBuf),

    #[error("key column '{0}' not present in header")]
    KeyColumnMissing(String),

    #[error("column '{0}' appears more than once in header")]
    DuplicateColumn(String),

    #[error("no row with {column} = '{key}'")]
    KeyNotFound { column: String, key: String },

    #[error("{count} rows share {column} = '{key}'")]
    DuplicateKey {
        column: String,
        key: String,
        count: usize,
    },

    #[error("malformed store: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The full master dataset, all rows and all columns.
#[derive(Debug, Clone)]
pub struct TabularStore {
    key_column: String,
    key_index: usize,
    header: Arc<[String]>,
    rows: Vec<Vec<String>>,
}

impl TabularStore {
    /// Load a delimited file with a header row.
    pub fn load(path: &Path, key_column: &str, delimiter: u8) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        let store = Self::from_reader(file, key_column, delimiter)?;
        info!(
            path = %path.display(),
            rows = store.len(),
            columns = store.header.len(),
            "loaded master store"
        );
        Ok(store)
    }

    /// Load from any reader (used for in-memory fixtures).
    pub fn from_reader<R: std::io::Read>(
        reader: R,
        key_column: &str,
        delimiter: u8,
    ) -> StoreResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(reader);

        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut seen = HashSet::with_capacity(header.len());
        for column in &header {
            if !seen.insert(column.as_str()) {
                return Err(StoreError::DuplicateColumn(column.clone()));
            }
        }
        let key_index = header
            .iter()
            .position(|c| c == key_column)
            .ok_or_else(|| StoreError::KeyColumnMissing(key_column.to_string()))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            key_column: key_column.to_string(),
            key_index,
            header: header.into(),
            rows,
        })
    }

    /// Column names in file order.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys available for selection, in file order. Read-only.
    pub fn keys(&self) -> Vec<&str> {
        self.rows
            .iter()
            .map(|row| row[self.key_index].as_str())
            .collect()
    }

    /// Select the single row whose key column equals `key`.
    pub fn select(&self, key: &str) -> StoreResult<MasterRow> {
        let mut matches = self
            .rows
            .iter()
            .filter(|row| row[self.key_index] == key);

        let first = matches.next().ok_or_else(|| StoreError::KeyNotFound {
            column: self.key_column.clone(),
            key: key.to_string(),
        })?;

        let extra = matches.count();
        if extra > 0 {
            return Err(StoreError::DuplicateKey {
                column: self.key_column.clone(),
                key: key.to_string(),
                count: extra + 1,
            });
        }

        debug!(key, "selected master row");
        Ok(MasterRow::new(key, self.header.clone(), first.clone()))
    }
}

/// Resolve an interactive choice against the listed keys.
///
/// Accepts a 1-based position in the listing or an exact key.
pub fn resolve_selection<'a>(input: &str, keys: &[&'a str]) -> Option<&'a str> {
    let choice = input.trim();
    if choice.is_empty() {
        return None;
    }
    if let Ok(position) = choice.parse::<usize>() {
        if (1..=keys.len()).contains(&position) {
            return Some(keys[position - 1]);
        }
    }
    keys.iter().copied().find(|k| *k == choice)
}
