//! End-to-end run driver

use super::RunError;
use crate::analysis::{
    builtin_stages, CancellationToken, Finding, Orchestrator, PipelineOutcome, StageContext, StageDefinition,
    StageGraph, StageId,
};
use crate::capability::CapabilityClient;
use crate::config::RunConfig;
use crate::report::{Artifact, ReportMetadata, ReportSynthesizer};
use crate::segment::{segment, Extract, SchemaSet};
use crate::store::{ListingSummary, TabularStore};
use crate::workspace::{Embedder, SemanticIndex, TeardownReport, Workspace};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub listing: ListingSummary,
    pub run_id: Uuid,
    pub artifact: Artifact,
    pub findings: BTreeMap<StageId, Finding>,
    /// Stages reported as unavailable
    pub degraded: Vec<StageId>,
    pub teardown: Option<TeardownReport>,
    /// Teardown problems that did not change the run's result
    pub teardown_warnings: Vec<String>,
}

/// Evaluates one listing per call to [`Evaluation::run`].
///
/// Owns the static parts of a run (schemas, stage definitions, capability
/// client, report synthesizer); everything run-scoped lives in a
/// [`Workspace`] that is opened and torn down inside `run`.
pub struct Evaluation {
    config: RunConfig,
    schemas: SchemaSet,
    stages: Vec<StageDefinition>,
    client: Arc<dyn CapabilityClient>,
    synthesizer: ReportSynthesizer,
    custom_index: Option<(Arc<dyn SemanticIndex>, Arc<dyn Embedder>)>,
}

impl Evaluation {
    /// Built-in schemas and stages; report backend and paths from `config`.
    pub fn new(config: RunConfig, client: Arc<dyn CapabilityClient>) -> Self {
        let synthesizer = ReportSynthesizer::for_format(config.report.primary, config.reports_dir.clone());
        Self {
            config,
            schemas: SchemaSet::builtin(),
            stages: builtin_stages(),
            client,
            synthesizer,
            custom_index: None,
        }
    }

    pub fn with_schemas(mut self, schemas: SchemaSet) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_stages(mut self, stages: Vec<StageDefinition>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: ReportSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Use a caller-supplied semantic index instead of the configured backend.
    pub fn with_index(mut self, index: Arc<dyn SemanticIndex>, embedder: Arc<dyn Embedder>) -> Self {
        self.custom_index = Some((index, embedder));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Validate the stage definitions against the schema set.
    pub fn graph(&self) -> Result<StageGraph, RunError> {
        Ok(StageGraph::new(self.stages.clone(), &self.schemas.names())?)
    }

    /// Load the master store named in the configuration.
    pub fn load_store(&self) -> Result<TabularStore, RunError> {
        Ok(TabularStore::load(
            &self.config.store_path,
            &self.config.key_column,
            self.config.delimiter_byte(),
        )?)
    }

    /// Load the store and evaluate `key`.
    pub async fn run(&self, key: &str, cancel: &CancellationToken) -> Result<RunOutcome, RunError> {
        let store = self.load_store()?;
        self.run_with_store(&store, key, cancel).await
    }

    /// Evaluate `key` against an already loaded store.
    ///
    /// Selection and segmentation happen before the workspace is opened, so
    /// their failures leave nothing to clean up. Once the workspace is open,
    /// it is closed exactly once before this returns, whatever the outcome.
    pub async fn run_with_store(
        &self,
        store: &TabularStore,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let graph = self.graph()?;
        let row = store.select(key)?;
        let extracts = segment(&row, &self.schemas)?;
        let listing = row.summary();
        info!(listing = %listing, extracts = extracts.len(), "listing selected and segmented");

        let mut workspace = self.open_workspace()?;
        let metadata = ReportMetadata::new(listing.clone());
        let run_id = metadata.run_id;

        let result = self
            .execute(&mut workspace, &graph, extracts, listing.clone(), metadata, cancel)
            .await;

        let mut teardown_warnings = Vec::new();
        let teardown = match workspace.close() {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "workspace teardown failed");
                teardown_warnings.push(e.to_string());
                None
            }
        };

        let (artifact, pipeline) = result?;
        info!(run_id = %run_id, artifact = %artifact.path.display(), "run complete");
        Ok(RunOutcome {
            listing,
            run_id,
            artifact,
            findings: pipeline.findings,
            degraded: pipeline.degraded,
            teardown,
            teardown_warnings,
        })
    }

    fn open_workspace(&self) -> Result<Workspace, RunError> {
        let root = &self.config.workspace_dir;
        let workspace = match &self.custom_index {
            Some((index, embedder)) => Workspace::open_with_index(root, index.clone(), embedder.clone())?,
            None => Workspace::open(root, self.config.index.backend, self.config.index.dimensions)?,
        };
        Ok(workspace)
    }

    async fn execute(
        &self,
        workspace: &mut Workspace,
        graph: &StageGraph,
        extracts: BTreeMap<String, Extract>,
        listing: ListingSummary,
        metadata: ReportMetadata,
        cancel: &CancellationToken,
    ) -> Result<(Artifact, PipelineOutcome), RunError> {
        for (name, extract) in extracts {
            workspace.put(&name, extract)?;
        }
        let ctx = StageContext {
            listing,
            extracts: workspace.consume()?,
            index: workspace.index()?,
            embedder: workspace.embedder(),
        };

        let orchestrator = Orchestrator::new(self.client.clone(), self.config.orchestrator());
        let pipeline = orchestrator.execute(graph, &ctx, cancel).await?;
        drop(ctx);

        if !pipeline.degraded.is_empty() {
            warn!(degraded = ?pipeline.degraded, "report will mark unavailable stages");
        }
        let artifact = self.synthesizer.render(graph, &pipeline.findings, metadata)?;
        Ok((artifact, pipeline))
    }
}
