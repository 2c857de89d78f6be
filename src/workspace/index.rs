//! Transient semantic index
//!
//! A key/vector store that stages write their findings into and that
//! fan-in stages query for related material. It is an auxiliary retrieval
//! aid, never authoritative, and it is emptied when the workspace opens and
//! when it closes.
//!
//! Writes are keyed by stage id: each key is owned by exactly one stage, so
//! concurrent inserts commute. A retried stage replaces its own entry.
//!
//! Two backends: `InMemoryIndex` (lock-free map) and `SqliteIndex`
//! (a database file inside the workspace directory).

use super::embedding::{cosine_similarity, l2_normalize};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("index lock poisoned")]
    Poisoned,

    #[error("vector has {actual} dimensions, index expects {expected}")]
    Dimensions { expected: usize, actual: usize },
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One retrieval result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub key: String,
    pub text: String,
    pub similarity: f32,
}

/// Storage and similarity query over embedded texts.
pub trait SemanticIndex: Send + Sync {
    /// Insert or replace the entry for `key`.
    fn insert(&self, key: &str, text: &str, vector: Vec<f32>) -> IndexResult<()>;

    /// Up to `limit` entries most similar to `vector`, skipping `exclude`d keys.
    ///
    /// Ordered by similarity descending, then key ascending.
    fn query(&self, vector: &[f32], limit: usize, exclude: &[&str]) -> IndexResult<Vec<IndexHit>>;

    /// Number of stored entries.
    fn len(&self) -> IndexResult<usize>;

    fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry.
    fn reset(&self) -> IndexResult<()>;
}

fn rank(mut hits: Vec<IndexHit>, limit: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    hits.truncate(limit);
    hits
}

fn check_dimensions(expected: usize, vector: &[f32]) -> IndexResult<()> {
    if vector.len() != expected {
        return Err(IndexError::Dimensions {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// In-memory index.
pub struct InMemoryIndex {
    dimensions: usize,
    entries: DashMap<String, (String, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: DashMap::new(),
        }
    }
}

impl SemanticIndex for InMemoryIndex {
    fn insert(&self, key: &str, text: &str, vector: Vec<f32>) -> IndexResult<()> {
        check_dimensions(self.dimensions, &vector)?;
        self.entries
            .insert(key.to_string(), (text.to_string(), vector));
        Ok(())
    }

    fn query(&self, vector: &[f32], limit: usize, exclude: &[&str]) -> IndexResult<Vec<IndexHit>> {
        check_dimensions(self.dimensions, vector)?;
        let hits = self
            .entries
            .iter()
            .filter(|entry| !exclude.contains(&entry.key().as_str()))
            .map(|entry| {
                let (text, stored) = entry.value();
                IndexHit {
                    key: entry.key().clone(),
                    text: text.clone(),
                    similarity: cosine_similarity(vector, stored),
                }
            })
            .collect();
        Ok(rank(hits, limit))
    }

    fn len(&self) -> IndexResult<usize> {
        Ok(self.entries.len())
    }

    fn reset(&self) -> IndexResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// SQLite-backed index stored in a single database file.
///
/// Vectors are L2-normalized on insert and kept as little-endian `f32`
/// blobs; similarity is computed in process.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteIndex {
    /// Open (or create) the index database at `path`.
    pub fn open(path: &Path, dimensions: usize) -> IndexResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, dimensions)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory(dimensions: usize) -> IndexResult<Self> {
        Self::init(Connection::open_in_memory()?, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> IndexResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                vector BLOB NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }
}

fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl SemanticIndex for SqliteIndex {
    fn insert(&self, key: &str, text: &str, vector: Vec<f32>) -> IndexResult<()> {
        check_dimensions(self.dimensions, &vector)?;
        let mut normalized = vector;
        l2_normalize(&mut normalized);
        let conn = self.conn.lock().map_err(|_| IndexError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (key, text, vector) VALUES (?1, ?2, ?3)",
            params![key, text, to_blob(&normalized)],
        )?;
        Ok(())
    }

    fn query(&self, vector: &[f32], limit: usize, exclude: &[&str]) -> IndexResult<Vec<IndexHit>> {
        check_dimensions(self.dimensions, vector)?;
        let conn = self.conn.lock().map_err(|_| IndexError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT key, text, vector FROM entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (key, text, blob) = row?;
            if exclude.contains(&key.as_str()) {
                continue;
            }
            let stored = from_blob(&blob);
            hits.push(IndexHit {
                key,
                text,
                similarity: cosine_similarity(vector, &stored),
            });
        }
        Ok(rank(hits, limit))
    }

    fn len(&self) -> IndexResult<usize> {
        let conn = self.conn.lock().map_err(|_| IndexError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn reset(&self) -> IndexResult<()> {
        let conn = self.conn.lock().map_err(|_| IndexError::Poisoned)?;
        conn.execute("DELETE FROM entries", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::embedding::{Embedder, HashingEmbedder};

    const DIMS: usize = 256;

    fn exercise(index: &dyn SemanticIndex) {
        let embedder = HashingEmbedder::new(DIMS);
        let flood = "parcel lies in flood zone AE";
        let growth = "population growth strong in both radii";

        index.insert("environmental", flood, embedder.embed(flood).unwrap()).unwrap();
        index.insert("growth", growth, embedder.embed(growth).unwrap()).unwrap();
        assert_eq!(index.len().unwrap(), 2);

        let query = embedder.embed("flood zone risk").unwrap();
        let hits = index.query(&query, 1, &[]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "environmental");
        assert_eq!(hits[0].text, flood);

        let hits = index.query(&query, 5, &["environmental"]).unwrap();
        assert!(hits.iter().all(|h| h.key != "environmental"));

        // Replacing a key keeps one entry per stage.
        index.insert("growth", "revised", embedder.embed("revised").unwrap()).unwrap();
        assert_eq!(index.len().unwrap(), 2);

        index.reset().unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn in_memory_index_behaviour() {
        exercise(&InMemoryIndex::new(DIMS));
    }

    #[test]
    fn sqlite_index_behaviour() {
        exercise(&SqliteIndex::open_in_memory(DIMS).unwrap());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = InMemoryIndex::new(4);
        let err = index.insert("k", "t", vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, IndexError::Dimensions { expected: 4, actual: 3 }));
    }

    #[test]
    fn blob_round_trip_preserves_values() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(from_blob(&to_blob(&v)), v);
    }

    #[test]
    fn sqlite_index_survives_reopen_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let index = SqliteIndex::open(&path, 2).unwrap();
            index.insert("a", "alpha", vec![1.0, 0.0]).unwrap();
        }
        let reopened = SqliteIndex::open(&path, 2).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        reopened.reset().unwrap();
        assert_eq!(reopened.len().unwrap(), 0);
    }
}
