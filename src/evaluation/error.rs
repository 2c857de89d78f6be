//! Run-level error taxonomy

use crate::analysis::{GraphError, OrchestratorError};
use crate::config::ConfigError;
use crate::report::RenderError;
use crate::segment::SegmentError;
use crate::store::StoreError;
use crate::workspace::WorkspaceError;
use thiserror::Error;

/// Every way a run can fail. Selection, segmentation and configuration
/// errors happen before the workspace exists; the rest are surfaced only
/// after teardown.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid stage graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Pipeline(#[from] OrchestratorError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl RunError {
    /// Stable name of the error class, shown in the terminal status line.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Graph(_) => "ConfigError",
            Self::Store(StoreError::KeyNotFound { .. }) => "KeyNotFound",
            Self::Store(StoreError::DuplicateKey { .. }) => "DuplicateKey",
            Self::Store(_) => "StoreError",
            Self::Segment(_) => "SchemaValidationError",
            Self::Workspace(_) => "WorkspaceError",
            Self::Pipeline(OrchestratorError::StageFailed { .. }) => "PermanentStageError",
            Self::Pipeline(OrchestratorError::StageCrashed { .. }) => "StageCrashed",
            Self::Pipeline(OrchestratorError::Cancelled { .. }) => "Cancelled",
            Self::Pipeline(OrchestratorError::MissingExtract { .. } | OrchestratorError::Incomplete(_)) => {
                "ConfigError"
            }
            Self::Render(_) => "RenderError",
        }
    }

    /// Process exit code; never zero.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            "ConfigError" => 2,
            "KeyNotFound" | "DuplicateKey" | "StoreError" => 3,
            "SchemaValidationError" => 4,
            "WorkspaceError" => 5,
            "PermanentStageError" | "StageCrashed" => 6,
            "RenderError" => 7,
            "Cancelled" => 130,
            _ => 1,
        }
    }

    /// Whether the error was raised before any workspace state existed.
    pub fn is_pre_pipeline(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Graph(_) | Self::Store(_) | Self::Segment(_)
        )
    }
}
