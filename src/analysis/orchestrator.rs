//! Pipeline orchestrator
//!
//! Executes a validated stage graph against one run's extracts. Scheduling is
//! a dependency-count join: each stage starts with a count of unconcluded
//! upstream stages and is spawned the moment that count reaches zero, so a
//! stage never observes a missing dependency. Concurrency is bounded by a
//! semaphore held only for the duration of each capability call.
//!
//! Failure policy per stage:
//! - `Degrade`: a permanent failure is replaced by an "unavailable" finding
//!   and dependents proceed.
//! - `Abort`: a permanent failure stops the run; in-flight stages are aborted.
//!
//! A panicking stage task is always fatal.

use super::cancel::CancellationToken;
use super::graph::StageGraph;
use super::payload::{build_input, parse_response};
use super::retry::{Invocation, RetryPolicy, StageError, Transition};
use super::types::{FailurePolicy, Finding, FindingBody, StageDefinition, StageId};
use crate::capability::{CapabilityClient, CapabilityError};
use crate::segment::Extract;
use crate::store::ListingSummary;
use crate::workspace::{Embedder, ExtractSet, IndexHit, SemanticIndex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("stage {stage} failed permanently: {source}")]
    StageFailed {
        stage: StageId,
        #[source]
        source: StageError,
    },

    #[error("stage {stage} crashed: {message}")]
    StageCrashed { stage: StageId, message: String },

    #[error("run cancelled with {completed} of {total} stages concluded")]
    Cancelled { completed: usize, total: usize },

    #[error("stage {stage} needs extract '{extract}' but the workspace holds none")]
    MissingExtract { stage: StageId, extract: String },

    #[error("stages never became ready: {0:?}")]
    Incomplete(Vec<StageId>),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum capability calls in flight
    pub max_concurrency: usize,
    /// Per-attempt limit on a capability call
    pub stage_timeout: Duration,
    pub retry: RetryPolicy,
    /// How long in-flight stages may keep running after cancellation
    pub cancel_grace: Duration,
    /// Related findings retrieved for stages with stage dependencies; 0 disables
    pub retrieval_top_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            stage_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            cancel_grace: Duration::from_secs(10),
            retrieval_top_k: 3,
        }
    }
}

/// Everything stages read from the run: the listing, the frozen extracts and
/// the workspace's semantic index.
#[derive(Clone)]
pub struct StageContext {
    pub listing: ListingSummary,
    pub extracts: ExtractSet,
    pub index: Arc<dyn SemanticIndex>,
    pub embedder: Arc<dyn Embedder>,
}

/// Result of a pipeline that reached its end.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// One finding per stage, real or sentinel
    pub findings: BTreeMap<StageId, Finding>,
    /// Stages whose finding is a sentinel
    pub degraded: Vec<StageId>,
    /// Stages in the order they concluded
    pub completion_order: Vec<StageId>,
}

pub struct Orchestrator {
    client: Arc<dyn CapabilityClient>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn CapabilityClient>, config: OrchestratorConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every stage of `graph`. Returns once all stages have concluded,
    /// on the first fatal failure, or after cancellation.
    ///
    /// No stage task outlives this call.
    pub async fn execute(
        &self,
        graph: &StageGraph,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        for stage in graph.stages() {
            if let Some(missing) = stage.extract_dependencies().find(|e| !ctx.extracts.contains_key(*e)) {
                return Err(OrchestratorError::MissingExtract {
                    stage: stage.id.clone(),
                    extract: missing.to_string(),
                });
            }
        }

        let total = graph.len();
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { completed: 0, total });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut waiting: Vec<usize> = (0..total).map(|i| graph.upstream(i).len()).collect();
        let mut findings: Vec<Option<Finding>> = vec![None; total];
        let mut degraded = Vec::new();
        let mut completion_order = Vec::with_capacity(total);
        let mut in_flight = InFlight::default();

        info!(stages = total, max_concurrency = self.config.max_concurrency, "pipeline started");
        for &i in graph.topological_indices() {
            if waiting[i] == 0 {
                self.spawn_stage(i, graph, ctx, &findings, &semaphore, &mut in_flight);
            }
        }

        while !in_flight.is_empty() {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = in_flight.next() => Some(joined),
            };
            let Some(joined) = joined else {
                let completed = findings.iter().filter(|f| f.is_some()).count();
                warn!(completed, in_flight = in_flight.len(), "cancellation requested");
                in_flight.wind_down(self.config.cancel_grace).await;
                return Err(OrchestratorError::Cancelled { completed, total });
            };
            let Some((i, result)) = joined else { break };
            let stage = graph.stage(i);

            let finding = match result {
                Ok(Ok(finding)) => {
                    info!(stage = %stage.id, attempts = finding.attempts(), "stage complete");
                    finding
                }
                Ok(Err(err)) => match stage.on_failure {
                    FailurePolicy::Degrade => {
                        warn!(stage = %stage.id, error = %err, "stage failed; substituting unavailable finding");
                        degraded.push(stage.id.clone());
                        Finding::unavailable(stage, err.cause().to_string(), err.attempts())
                    }
                    FailurePolicy::Abort => {
                        error!(stage = %stage.id, error = %err, "stage failed; aborting run");
                        in_flight.abort_all().await;
                        return Err(OrchestratorError::StageFailed {
                            stage: stage.id.clone(),
                            source: err,
                        });
                    }
                },
                Err(join_err) => {
                    let message = panic_message(join_err);
                    error!(stage = %stage.id, message = %message, "stage task crashed; aborting run");
                    in_flight.abort_all().await;
                    return Err(OrchestratorError::StageCrashed {
                        stage: stage.id.clone(),
                        message,
                    });
                }
            };

            completion_order.push(stage.id.clone());
            findings[i] = Some(finding);

            if cancel.is_cancelled() {
                continue;
            }
            for &next in graph.downstream(i) {
                waiting[next] -= 1;
                if waiting[next] == 0 {
                    self.spawn_stage(next, graph, ctx, &findings, &semaphore, &mut in_flight);
                }
            }
        }

        let completed = findings.iter().filter(|f| f.is_some()).count();
        if completed < total {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled { completed, total });
            }
            let missing = (0..total)
                .filter(|&i| findings[i].is_none())
                .map(|i| graph.stage(i).id.clone())
                .collect();
            return Err(OrchestratorError::Incomplete(missing));
        }

        info!(stages = total, degraded = degraded.len(), "pipeline complete");
        Ok(PipelineOutcome {
            findings: findings
                .into_iter()
                .flatten()
                .map(|f| (f.stage().clone(), f))
                .collect(),
            degraded,
            completion_order,
        })
    }

    fn spawn_stage(
        &self,
        i: usize,
        graph: &StageGraph,
        ctx: &StageContext,
        findings: &[Option<Finding>],
        semaphore: &Arc<Semaphore>,
        in_flight: &mut InFlight,
    ) {
        let stage = graph.stage(i);
        let extracts: Vec<&Extract> = stage
            .extract_dependencies()
            .filter_map(|name| ctx.extracts.get(name))
            .collect();
        let upstream: Vec<&Finding> = graph
            .upstream(i)
            .iter()
            .filter_map(|&j| findings[j].as_ref())
            .collect();
        let related = if upstream.is_empty() {
            Vec::new()
        } else {
            self.related_findings(stage, &upstream, ctx)
        };

        let task = StageTask {
            stage: stage.clone(),
            input: build_input(stage, &ctx.listing, &extracts, &upstream, &related),
            client: self.client.clone(),
            semaphore: semaphore.clone(),
            timeout: self.config.stage_timeout,
            retry: self.config.retry,
            index: ctx.index.clone(),
            embedder: ctx.embedder.clone(),
        };
        debug!(stage = %stage.id, upstream = upstream.len(), related = related.len(), "stage ready");
        in_flight.spawn(i, task.run());
    }

    /// Top-k prior findings similar to what this stage is about to combine.
    fn related_findings(&self, stage: &StageDefinition, upstream: &[&Finding], ctx: &StageContext) -> Vec<IndexHit> {
        let k = self.config.retrieval_top_k;
        if k == 0 {
            return Vec::new();
        }
        let mut query = stage.instructions.clone();
        for finding in upstream {
            query.push('\n');
            query.push_str(finding.text());
        }
        let vector = match ctx.embedder.embed(&query) {
            Ok(v) => v,
            Err(e) => {
                warn!(stage = %stage.id, error = %e, "retrieval embedding failed");
                return Vec::new();
            }
        };
        match ctx.index.query(&vector, k, &[stage.id.as_str()]) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(stage = %stage.id, error = %e, "semantic index query failed");
                Vec::new()
            }
        }
    }
}

/// One stage invocation, owned by its task.
struct StageTask {
    stage: StageDefinition,
    input: String,
    client: Arc<dyn CapabilityClient>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    retry: RetryPolicy,
    index: Arc<dyn SemanticIndex>,
    embedder: Arc<dyn Embedder>,
}

impl StageTask {
    async fn run(self) -> Result<Finding, StageError> {
        let mut invocation = Invocation::new(self.retry);
        loop {
            let outcome = self.attempt(invocation.attempt()).await;
            match invocation.record(outcome) {
                Transition::Succeeded { value, attempts } => {
                    let finding = Finding::complete(&self.stage, value, attempts);
                    self.record_in_index(&finding);
                    return Ok(finding);
                }
                Transition::Retry { delay, attempt, error } => {
                    warn!(
                        stage = %self.stage.id,
                        next_attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient stage failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Transition::Failed(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, attempt: u32) -> Result<FindingBody, CapabilityError> {
        let response = {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| CapabilityError::Unavailable(format!("concurrency limiter closed: {}", e)))?;
            debug!(stage = %self.stage.id, attempt, target = %self.stage.target, "invoking capability");
            match tokio::time::timeout(self.timeout, self.client.invoke(&self.stage.target, &self.input)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(self.timeout.as_secs())),
            }
        };
        let response = response?.into_result()?;
        parse_response(&self.stage.id, response)
    }

    /// Stages own their key, so concurrent writes commute.
    fn record_in_index(&self, finding: &Finding) {
        let text = format!("{}\n{}", finding.title(), finding.text());
        let result = self
            .embedder
            .embed(&text)
            .map_err(|e| e.to_string())
            .and_then(|vector| {
                self.index
                    .insert(self.stage.id.as_str(), finding.text(), vector)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(stage = %self.stage.id, error = %e, "failed to index finding");
        }
    }
}

type StageResult = Result<Result<Finding, StageError>, JoinError>;

/// Spawned stage tasks. Each stage runs in its own task so a panic surfaces
/// as a `JoinError` attributed to its stage index.
#[derive(Default)]
struct InFlight {
    watchers: JoinSet<(usize, StageResult)>,
    handles: Vec<AbortHandle>,
}

impl InFlight {
    fn spawn<F>(&mut self, index: usize, future: F)
    where
        F: std::future::Future<Output = Result<Finding, StageError>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push(handle.abort_handle());
        self.watchers.spawn(async move { (index, handle.await) });
    }

    fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    fn len(&self) -> usize {
        self.watchers.len()
    }

    async fn next(&mut self) -> Option<(usize, StageResult)> {
        loop {
            match self.watchers.join_next().await? {
                Ok(joined) => return Some(joined),
                // watchers are never aborted, so this is unreachable in practice
                Err(e) => warn!(error = %e, "stage watcher failed"),
            }
        }
    }

    /// Abort every stage task and wait until all of them have stopped.
    async fn abort_all(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        while self.watchers.join_next().await.is_some() {}
    }

    /// Let in-flight stages finish within `grace`, then abort the rest.
    async fn wind_down(&mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, async {
            while self.watchers.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!(grace_ms = grace.as_millis() as u64, "grace period elapsed; abandoning in-flight stages");
            self.abort_all().await;
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}
