//! Shared fixtures for landeval integration tests
//!
//! - a master dataset carrying every built-in schema column
//! - a run configuration rooted in a temp directory
//! - a scripted capability client with per-target latency, transient and
//!   permanent failures, panics and an invocation log
//! - a semantic index that counts resets

#![allow(dead_code)]

pub mod scripted;

use landeval::workspace::{InMemoryIndex, IndexHit, IndexResult, SemanticIndex};
use landeval::{RunConfig, SchemaSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub use scripted::{Behavior, Invocation, ScriptedClient};

pub const KEY: &str = "ABC123";
pub const OTHER_KEY: &str = "DEF456";

/// Capability targets of the five leaf stages, in declaration order.
pub const LEAF_TARGETS: [&str; 5] = [
    "property_analyst",
    "environmental_evaluator",
    "growth_trends_expert",
    "occupancy_expert",
    "socio_economic_analyst",
];
pub const INTEGRATED_TARGET: &str = "integrated_evaluator";
pub const NARRATIVE_TARGET: &str = "narrative_reporter";

/// StockNumber followed by every column the built-in schemas name.
pub fn master_header() -> Vec<String> {
    let mut header = vec!["StockNumber".to_string()];
    for schema in SchemaSet::builtin().iter() {
        for column in schema.columns() {
            if !header.contains(column) {
                header.push(column.clone());
            }
        }
    }
    header
}

fn value_for(key: &str, column: &str) -> String {
    match (key, column) {
        (_, "StockNumber") => key.to_string(),
        (KEY, "Property Address") => "123 Main St".to_string(),
        (KEY, "City") => "Springfield".to_string(),
        (KEY, "State") => "IL".to_string(),
        (KEY, "Zip") => "62701".to_string(),
        (_, "Property Address") => "9 Elm Rd".to_string(),
        (_, "City") => "Shelbyville".to_string(),
        (_, "State") => "IL".to_string(),
        (_, "Zip") => "62565".to_string(),
        (_, "In SFHA") => "No".to_string(),
        (_, "Fema Flood Zone") => "X".to_string(),
        _ => "1.5".to_string(),
    }
}

/// Write a master dataset with one row per key.
pub fn write_master(path: &Path, keys: &[&str]) -> PathBuf {
    let header = master_header();
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(&header).unwrap();
    for key in keys {
        let row: Vec<String> = header.iter().map(|c| value_for(key, c)).collect();
        writer.write_record(&row).unwrap();
    }
    writer.flush().unwrap();
    path.to_path_buf()
}

/// Master dataset with `ABC123` and `DEF456`, configuration with fast retries
/// and every path under `root`.
pub fn test_config(root: &Path) -> RunConfig {
    let store_path = write_master(&root.join("master.csv"), &[KEY, OTHER_KEY]);
    let mut config = RunConfig::default();
    config.store_path = store_path;
    config.workspace_dir = root.join("cork");
    config.reports_dir = root.join("reports");
    config.max_concurrency = 3;
    config.stage_timeout_secs = 5;
    config.cancel_grace_secs = 1;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

/// Lock file the workspace keeps next to its root while a run holds it.
pub fn lock_path(workspace_dir: &Path) -> PathBuf {
    let mut name = workspace_dir.file_name().unwrap().to_os_string();
    name.push(".lock");
    workspace_dir.with_file_name(name)
}

/// In-memory index that counts how often it is reset.
pub struct CountingIndex {
    inner: InMemoryIndex,
    resets: AtomicUsize,
    inserts: AtomicUsize,
}

impl CountingIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: InMemoryIndex::new(dimensions),
            resets: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

impl SemanticIndex for CountingIndex {
    fn insert(&self, key: &str, text: &str, vector: Vec<f32>) -> IndexResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(key, text, vector)
    }

    fn query(&self, vector: &[f32], limit: usize, exclude: &[&str]) -> IndexResult<Vec<IndexHit>> {
        self.inner.query(vector, limit, exclude)
    }

    fn len(&self) -> IndexResult<usize> {
        self.inner.len()
    }

    fn reset(&self) -> IndexResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.reset()
    }
}
