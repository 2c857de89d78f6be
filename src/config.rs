//! Run configuration
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Discovery order: `./landeval.yaml`, then
//! `<config dir>/landeval/config.yaml`, then built-in defaults.

use crate::analysis::{OrchestratorConfig, RetryPolicy};
use crate::report::ReportFormat;
use crate::store::DEFAULT_KEY_COLUMN;
use crate::workspace::IndexBackend;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "landeval.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub dimensions: usize,
    pub retrieval_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Sqlite,
            dimensions: 64,
            retrieval_top_k: 3,
        }
    }
}

/// How the external analysis capability is launched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            program: "llm-orc".to_string(),
            args: vec!["invoke".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub primary: ReportFormat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Master dataset (delimited file with a header row)
    pub store_path: PathBuf,
    pub key_column: String,
    pub delimiter: char,
    /// Ephemeral workspace location; purged on open, removed on close
    pub workspace_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub max_concurrency: usize,
    pub stage_timeout_secs: u64,
    pub cancel_grace_secs: u64,
    pub retry: RetryConfig,
    pub index: IndexConfig,
    pub capability: CapabilityConfig,
    pub report: ReportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("database/master.csv"),
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            delimiter: ',',
            workspace_dir: PathBuf::from("database/cork"),
            reports_dir: PathBuf::from("reports"),
            max_concurrency: 3,
            stage_timeout_secs: 120,
            cancel_grace_secs: 10,
            retry: RetryConfig::default(),
            index: IndexConfig::default(),
            capability: CapabilityConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl RunConfig {
    /// Read and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Candidate files in lookup order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("landeval").join("config.yaml"));
        }
        paths
    }

    /// Load the first existing file from [`Self::search_paths`], or defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load(&path),
            None => {
                debug!("no configuration file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.key_column.trim().is_empty() {
            return invalid("key_column must not be empty");
        }
        if !self.delimiter.is_ascii() {
            return invalid("delimiter must be a single ASCII character");
        }
        if self.max_concurrency == 0 {
            return invalid("max_concurrency must be at least 1");
        }
        if self.stage_timeout_secs == 0 {
            return invalid("stage_timeout_secs must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.index.dimensions == 0 {
            return invalid("index.dimensions must be at least 1");
        }
        if self.capability.program.trim().is_empty() {
            return invalid("capability.program must not be empty");
        }
        Ok(())
    }

    /// Delimiter as the byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or(b',')
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.max_concurrency,
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            retry: self.retry_policy(),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            retrieval_top_k: self.index.retrieval_top_k,
        }
    }
}
