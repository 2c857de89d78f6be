//! Landeval: single-parcel land evaluation engine
//!
//! Pulls one listing out of a wide master dataset, splits it into
//! topic-scoped extracts, runs a dependency-ordered analysis pipeline over
//! them and joins the findings into one report.
//!
//! # Core Concepts
//!
//! - **MasterRow**: one listing, selected by its unique key
//! - **SegmentSchema / Extract**: a named column projection and its
//!   single-row materialization
//! - **Workspace**: run-scoped owner of extracts and the transient semantic
//!   index, torn down exactly once
//! - **StageGraph / Orchestrator**: five leaf analyses, an integrated
//!   evaluation over them, a narrative report over that
//! - **Report**: deterministic composition of every finding plus run metadata
//!
//! # Example
//!
//! ```no_run
//! use landeval::{CancellationToken, Evaluation, RunConfig, SubprocessClient};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), landeval::RunError> {
//! let evaluation = Evaluation::new(RunConfig::default(), Arc::new(SubprocessClient::default()));
//! let outcome = evaluation.run("ABC123", &CancellationToken::new()).await?;
//! println!("{}", outcome.artifact.path.display());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod capability;
pub mod config;
pub mod evaluation;
pub mod report;
pub mod segment;
pub mod store;
pub mod workspace;

pub use analysis::{
    builtin_stages, CancellationToken, Finding, FindingStatus, Orchestrator, OrchestratorConfig, StageDefinition,
    StageGraph, StageId,
};
pub use capability::{CapabilityClient, CapabilityError, CapabilityResponse, MockClient, SubprocessClient};
pub use config::RunConfig;
pub use evaluation::{Evaluation, RunError, RunOutcome};
pub use report::{Artifact, ReportFormat, ReportSynthesizer};
pub use segment::{segment, Extract, SchemaSet, SegmentSchema};
pub use store::{resolve_selection, ListingSummary, MasterRow, TabularStore};
pub use workspace::{IndexBackend, Workspace};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
