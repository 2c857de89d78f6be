//! Run-scoped workspace handle

use super::embedding::{Embedder, HashingEmbedder};
use super::index::{InMemoryIndex, IndexError, SemanticIndex, SqliteIndex};
use super::lock::RunLock;
use crate::segment::Extract;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// File name of the sqlite index inside the workspace directory.
pub const INDEX_FILE: &str = "semantic_index.db";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace {} is in use{}", .root.display(), owner_suffix(.owner))]
    Busy { root: PathBuf, owner: Option<u32> },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("semantic index error: {0}")]
    Index(#[from] IndexError),

    #[error("failed to write extract: {0}")]
    Extract(#[from] csv::Error),

    #[error("cannot {operation} while workspace is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: WorkspaceState,
    },

    #[error("extract '{0}' already stored")]
    DuplicateExtract(String),

    #[error("no extract for schema '{0}'")]
    MissingExtract(String),

    #[error("workspace registry lock poisoned")]
    Poisoned,

    #[error("index dimensions must be at least 1")]
    ZeroDimensions,
}

fn owner_suffix(owner: &Option<u32>) -> String {
    owner
        .map(|pid| format!(" by process {}", pid))
        .unwrap_or_default()
}

/// Lifecycle of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Opened and purged, no extracts yet
    Created,
    /// At least one extract stored
    Populated,
    /// Extracts handed to the pipeline; read-only from here on
    Consumed,
    TornDown,
}

/// Which semantic index implementation backs the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    #[default]
    Sqlite,
}

/// What `close` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub extracts_removed: usize,
    pub index_entries_cleared: usize,
}

/// Read-only view of the populated extracts, shared with stage tasks.
pub type ExtractSet = Arc<BTreeMap<String, Extract>>;

/// Owns every extract and the transient semantic index for one run.
///
/// Whoever opens a workspace owns its teardown: `close` runs at most once,
/// and dropping an unclosed workspace closes it.
pub struct Workspace {
    root: PathBuf,
    extracts: BTreeMap<String, Extract>,
    frozen: Option<ExtractSet>,
    index: Option<Arc<dyn SemanticIndex>>,
    embedder: Arc<dyn Embedder>,
    state: WorkspaceState,
    lock: Option<RunLock>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("state", &self.state)
            .field("extracts", &self.extracts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Workspace {
    /// Open a workspace at `root` with the configured index backend.
    ///
    /// Rejects the location if another run holds it, then purges any residue
    /// left by an earlier unclean shutdown before creating fresh state.
    pub fn open(root: &Path, backend: IndexBackend, dimensions: usize) -> Result<Self, WorkspaceError> {
        if dimensions == 0 {
            return Err(WorkspaceError::ZeroDimensions);
        }
        Self::open_inner(root, Arc::new(HashingEmbedder::new(dimensions)), |dir| {
            let index: Arc<dyn SemanticIndex> = match backend {
                IndexBackend::Memory => Arc::new(InMemoryIndex::new(dimensions)),
                IndexBackend::Sqlite => Arc::new(SqliteIndex::open(&dir.join(INDEX_FILE), dimensions)?),
            };
            Ok(index)
        })
    }

    /// Open with a caller-supplied index and embedder.
    ///
    /// The index is reset as part of opening, exactly like a built-in one.
    pub fn open_with_index(
        root: &Path,
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, WorkspaceError> {
        if embedder.dimensions() == 0 {
            return Err(WorkspaceError::ZeroDimensions);
        }
        Self::open_inner(root, embedder, move |_| Ok(index))
    }

    fn open_inner<F>(root: &Path, embedder: Arc<dyn Embedder>, make_index: F) -> Result<Self, WorkspaceError>
    where
        F: FnOnce(&Path) -> Result<Arc<dyn SemanticIndex>, WorkspaceError>,
    {
        let lock = RunLock::acquire(root)?;
        let root = lock.root().to_path_buf();

        purge(&root)?;
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::Io {
            path: root.clone(),
            source,
        })?;

        let index = make_index(&root)?;
        index.reset()?;

        info!(root = %root.display(), "workspace opened");
        Ok(Self {
            root,
            extracts: BTreeMap::new(),
            frozen: None,
            index: Some(index),
            embedder,
            state: WorkspaceState::Created,
            lock: Some(lock),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Store an extract and write its file under the workspace.
    pub fn put(&mut self, schema_name: &str, extract: Extract) -> Result<(), WorkspaceError> {
        if !matches!(self.state, WorkspaceState::Created | WorkspaceState::Populated) {
            return Err(WorkspaceError::InvalidState {
                operation: "store extract",
                state: self.state,
            });
        }
        if self.extracts.contains_key(schema_name) {
            return Err(WorkspaceError::DuplicateExtract(schema_name.to_string()));
        }

        let path = self.root.join(extract.file_name());
        let file = std::fs::File::create(&path).map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;
        extract.write_csv(file)?;
        debug!(schema = schema_name, path = %path.display(), "wrote extract");

        self.extracts.insert(schema_name.to_string(), extract);
        self.state = WorkspaceState::Populated;
        Ok(())
    }

    pub fn get(&self, schema_name: &str) -> Result<&Extract, WorkspaceError> {
        self.extracts
            .get(schema_name)
            .ok_or_else(|| WorkspaceError::MissingExtract(schema_name.to_string()))
    }

    /// Path of the file written for an extract.
    pub fn extract_path(&self, schema_name: &str) -> Result<PathBuf, WorkspaceError> {
        Ok(self.root.join(self.get(schema_name)?.file_name()))
    }

    /// Freeze the extracts and hand out a shared read-only view.
    ///
    /// After the first call no more extracts can be stored.
    pub fn consume(&mut self) -> Result<ExtractSet, WorkspaceError> {
        match self.state {
            WorkspaceState::Populated => {
                let set: ExtractSet = Arc::new(self.extracts.clone());
                self.frozen = Some(set.clone());
                self.state = WorkspaceState::Consumed;
                Ok(set)
            }
            WorkspaceState::Consumed => match &self.frozen {
                Some(set) => Ok(set.clone()),
                None => Err(WorkspaceError::InvalidState {
                    operation: "consume",
                    state: self.state,
                }),
            },
            state => Err(WorkspaceError::InvalidState {
                operation: "consume",
                state,
            }),
        }
    }

    /// Handle to the semantic index.
    pub fn index(&self) -> Result<Arc<dyn SemanticIndex>, WorkspaceError> {
        self.index.clone().ok_or(WorkspaceError::InvalidState {
            operation: "use index",
            state: self.state,
        })
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    /// Delete all extracts, reset the index, release file handles and the lock.
    ///
    /// Runs every step even when an earlier one fails and reports the first
    /// failure. A second call is an error and does nothing.
    pub fn close(&mut self) -> Result<TeardownReport, WorkspaceError> {
        if self.state == WorkspaceState::TornDown {
            return Err(WorkspaceError::InvalidState {
                operation: "close",
                state: self.state,
            });
        }
        self.state = WorkspaceState::TornDown;

        let mut report = TeardownReport::default();
        let mut first_error: Option<WorkspaceError> = None;

        for extract in self.extracts.values() {
            let path = self.root.join(extract.file_name());
            match std::fs::remove_file(&path) {
                Ok(()) => report.extracts_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    first_error.get_or_insert(WorkspaceError::Io { path, source });
                }
            }
        }
        self.extracts.clear();
        self.frozen = None;

        if let Some(index) = self.index.take() {
            report.index_entries_cleared = index.len().unwrap_or(0);
            if let Err(e) = index.reset() {
                first_error.get_or_insert(e.into());
            }
            if Arc::strong_count(&index) > 1 {
                debug!("semantic index still referenced at teardown");
            }
        }

        if let Err(source) = std::fs::remove_dir_all(&self.root) {
            if source.kind() != std::io::ErrorKind::NotFound {
                first_error.get_or_insert(WorkspaceError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        self.lock = None;

        match first_error {
            Some(err) => {
                error!(root = %self.root.display(), error = %err, "workspace teardown incomplete");
                Err(err)
            }
            None => {
                info!(
                    root = %self.root.display(),
                    extracts = report.extracts_removed,
                    index_entries = report.index_entries_cleared,
                    "workspace torn down"
                );
                Ok(report)
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.state != WorkspaceState::TornDown {
            warn!(root = %self.root.display(), "workspace dropped without close; tearing down");
            let _ = self.close();
        }
    }
}

/// Remove everything a previous run may have left at `root`.
fn purge(root: &Path) -> Result<(), WorkspaceError> {
    match std::fs::symlink_metadata(root) {
        Ok(meta) => {
            let result = if meta.is_dir() {
                std::fs::remove_dir_all(root)
            } else {
                std::fs::remove_file(root)
            };
            result.map_err(|source| WorkspaceError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            warn!(root = %root.display(), "purged residue from a previous run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkspaceError::Io {
            path: root.to_path_buf(),
            source,
        }),
    }
}
