//! Ephemeral workspace
//!
//! Run-scoped container for every extract and for the transient semantic
//! index. Lifecycle is `created → populated → consumed → torn down`:
//!
//! - `open` takes the single-run lock for the location, purges residue left
//!   by an unclean shutdown and resets the index.
//! - `put` writes one extract file per schema.
//! - `consume` freezes the extracts into a shared read-only set.
//! - `close` deletes extracts, resets the index, releases file handles and
//!   the lock. It runs once; dropping an unclosed workspace closes it.

mod embedding;
mod handle;
mod index;
mod lock;

pub use embedding::{Embedder, EmbeddingError, HashingEmbedder};
pub use handle::{
    ExtractSet, IndexBackend, TeardownReport, Workspace, WorkspaceError, WorkspaceState, INDEX_FILE,
};
pub use index::{IndexError, IndexHit, IndexResult, InMemoryIndex, SemanticIndex, SqliteIndex};
