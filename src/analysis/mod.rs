//! Staged analysis pipeline
//!
//! Runs the land evaluation stages over one listing's extracts.
//!
//! # Architecture
//!
//! - **StageDefinition**: a named unit of analysis with declared dependencies
//!   on extracts and on other stages, a capability target and a failure policy
//! - **StageGraph**: validated at construction (unique ids, resolvable
//!   dependencies, acyclic); exposes topological and report orderings
//! - **Orchestrator**: executes the graph with a dependency-count join,
//!   bounded concurrency, per-attempt timeouts and retry with backoff
//! - **Finding**: immutable output of one stage, or the "unavailable"
//!   sentinel substituted for a leaf that failed permanently
//!
//! # Built-in pipeline
//!
//! Five leaves (property, environmental, growth trends, occupancy,
//! socio-economic), each reading one extract, feed `integrated_evaluation`,
//! which feeds `narrative_report`. Leaves degrade on failure; the two
//! downstream stages are fatal.
//!
//! # Example
//!
//! ```ignore
//! let graph = StageGraph::new(builtin_stages(), &schemas.names())?;
//! let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());
//! let outcome = orchestrator.execute(&graph, &ctx, &CancellationToken::new()).await?;
//! ```

mod cancel;
pub mod graph;
mod orchestrator;
mod payload;
mod retry;
mod types;

pub use cancel::CancellationToken;
pub use graph::{builtin_stages, GraphError, StageGraph};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, PipelineOutcome, StageContext};
pub use payload::{build_input, parse_response};
pub use retry::{Invocation, RetryPolicy, StageError, Transition};
pub use types::{
    Dependency, FailurePolicy, FieldValue, Finding, FindingBody, FindingStatus, StageDefinition, StageId,
    StageRole,
};
