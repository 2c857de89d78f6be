//! Tabular store accessor
//!
//! Loads the master dataset (one delimited file with a header row) into
//! memory and exposes key-based row lookup. Lookup never guesses: an absent
//! key and a duplicated key are both errors.

mod row;
mod table;

pub use row::{ListingSummary, MasterRow};
pub use table::{resolve_selection, StoreError, StoreResult, TabularStore, DEFAULT_KEY_COLUMN};
