//! Stage graph: a validated, acyclic set of stage definitions
//!
//! Validation happens once, at construction. A `StageGraph` value is proof that
//! ids are unique, every dependency resolves to a known extract or stage, and
//! the dependency relation is acyclic. Stages that consume other stages'
//! findings always abort the run when they fail; only leaves may degrade.

use super::types::{FailurePolicy, StageDefinition, StageId, StageRole};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Configuration errors found while validating a stage graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("stage graph has no stages")]
    Empty,
    #[error("duplicate stage id: {0}")]
    DuplicateStage(StageId),
    #[error("stage {0} declares no inputs")]
    NoInputs(StageId),
    #[error("stage {stage} depends on unknown extract '{extract}'")]
    UnknownExtract { stage: StageId, extract: String },
    #[error("stage {stage} depends on unknown stage '{dependency}'")]
    UnknownStage { stage: StageId, dependency: StageId },
    #[error("dependency cycle among stages: {}", join_ids(.0))]
    Cycle(Vec<StageId>),
}

fn join_ids(ids: &[StageId]) -> String {
    ids.iter().map(StageId::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<StageDefinition>,
    /// Indices into `stages` in topological order
    order: Vec<usize>,
    /// Stage dependencies per stage, as indices
    upstream: Vec<Vec<usize>>,
    /// Dependents per stage, as indices
    downstream: Vec<Vec<usize>>,
    roles: Vec<StageRole>,
}

impl StageGraph {
    /// Validate `stages` against the extract names that will be available.
    ///
    /// Fan-in and terminal stages are given `FailurePolicy::Abort` regardless
    /// of what they declared.
    pub fn new(mut stages: Vec<StageDefinition>, extracts: &[&str]) -> Result<Self, GraphError> {
        if stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index: HashMap<&StageId, usize> = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(&stage.id, i).is_some() {
                return Err(GraphError::DuplicateStage(stage.id.clone()));
            }
        }

        let known_extracts: HashSet<&str> = extracts.iter().copied().collect();
        let mut upstream = vec![Vec::new(); stages.len()];
        let mut downstream = vec![Vec::new(); stages.len()];

        for (i, stage) in stages.iter().enumerate() {
            if stage.dependencies.is_empty() {
                return Err(GraphError::NoInputs(stage.id.clone()));
            }
            for extract in stage.extract_dependencies() {
                if !known_extracts.contains(extract) {
                    return Err(GraphError::UnknownExtract {
                        stage: stage.id.clone(),
                        extract: extract.to_string(),
                    });
                }
            }
            for dep in stage.stage_dependencies() {
                let j = *index.get(dep).ok_or_else(|| GraphError::UnknownStage {
                    stage: stage.id.clone(),
                    dependency: dep.clone(),
                })?;
                if !upstream[i].contains(&j) {
                    upstream[i].push(j);
                    downstream[j].push(i);
                }
            }
        }

        let order = topological_order(&upstream, &downstream).map_err(|remaining| {
            GraphError::Cycle(remaining.into_iter().map(|i| stages[i].id.clone()).collect())
        })?;

        let roles: Vec<StageRole> = (0..stages.len())
            .map(|i| match (upstream[i].is_empty(), downstream[i].is_empty()) {
                (true, _) => StageRole::Leaf,
                (false, false) => StageRole::FanIn,
                (false, true) => StageRole::Terminal,
            })
            .collect();

        for (stage, role) in stages.iter_mut().zip(&roles) {
            if *role != StageRole::Leaf && stage.on_failure != FailurePolicy::Abort {
                warn!(stage = %stage.id, ?role, "only leaf stages may degrade; failure will abort the run");
                stage.on_failure = FailurePolicy::Abort;
            }
        }

        debug!(stages = stages.len(), "stage graph validated");
        Ok(Self {
            stages,
            order,
            upstream,
            downstream,
            roles,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in declaration order.
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> &StageDefinition {
        &self.stages[index]
    }

    pub fn index_of(&self, id: &StageId) -> Option<usize> {
        self.stages.iter().position(|s| &s.id == id)
    }

    pub fn get(&self, id: &StageId) -> Option<&StageDefinition> {
        self.index_of(id).map(|i| &self.stages[i])
    }

    pub fn role(&self, index: usize) -> StageRole {
        self.roles[index]
    }

    /// Indices of the stages `index` waits for.
    pub fn upstream(&self, index: usize) -> &[usize] {
        &self.upstream[index]
    }

    /// Indices of the stages waiting for `index`.
    pub fn downstream(&self, index: usize) -> &[usize] {
        &self.downstream[index]
    }

    /// Stage indices in a topological order; ties keep declaration order.
    pub fn topological_indices(&self) -> &[usize] {
        &self.order
    }

    pub fn topological_order(&self) -> impl Iterator<Item = &StageDefinition> {
        self.order.iter().map(|&i| &self.stages[i])
    }

    /// Section order for reports: terminal stages, then fan-in stages, then
    /// leaves, each group in declaration order.
    pub fn report_order(&self) -> Vec<&StageDefinition> {
        let mut out = Vec::with_capacity(self.stages.len());
        for role in [StageRole::Terminal, StageRole::FanIn, StageRole::Leaf] {
            out.extend(
                self.stages
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| self.roles[*i] == role)
                    .map(|(_, s)| s),
            );
        }
        out
    }
}

/// Kahn's algorithm. On a cycle, returns the indices that never became ready.
fn topological_order(upstream: &[Vec<usize>], downstream: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut pending: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..pending.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(pending.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &next in &downstream[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() == pending.len() {
        Ok(order)
    } else {
        Err((0..pending.len()).filter(|&i| pending[i] > 0).collect())
    }
}

pub const PROPERTY_ANALYSIS: &str = "property_analysis";
pub const ENVIRONMENTAL_ANALYSIS: &str = "environmental_analysis";
pub const GROWTH_TRENDS_ANALYSIS: &str = "growth_trends_analysis";
pub const OCCUPANCY_ANALYSIS: &str = "occupancy_analysis";
pub const SOCIO_ECONOMIC_ANALYSIS: &str = "socio_economic_analysis";
pub const INTEGRATED_EVALUATION: &str = "integrated_evaluation";
pub const NARRATIVE_REPORT: &str = "narrative_report";

/// The land evaluation pipeline: five leaf analyses over one extract each,
/// an integrated evaluation over all five, and a narrative report over that.
pub fn builtin_stages() -> Vec<StageDefinition> {
    use crate::segment::{ENVIRONMENTAL, GROWTH_TRENDS, OCCUPANCY, PROPERTY, SOCIO_ECONOMIC};

    let leaves = [
        (
            PROPERTY_ANALYSIS,
            "Property Analysis",
            "property_analyst",
            PROPERTY,
            "Assess location, access and physical characteristics of the parcel.",
        ),
        (
            ENVIRONMENTAL_ANALYSIS,
            "Environmental Evaluation",
            "environmental_evaluator",
            ENVIRONMENTAL,
            "Assess flood exposure: SFHA status, FEMA zone, map date and floodplain coverage.",
        ),
        (
            GROWTH_TRENDS_ANALYSIS,
            "Growth Trends",
            "growth_trends_expert",
            GROWTH_TRENDS,
            "Assess population and housing unit growth across the reported radii.",
        ),
        (
            OCCUPANCY_ANALYSIS,
            "Housing Units and Occupancy",
            "occupancy_expert",
            OCCUPANCY,
            "Assess housing stock, vacancy and owner/renter mix at 5 and 10 miles.",
        ),
        (
            SOCIO_ECONOMIC_ANALYSIS,
            "Demographics and Affordability",
            "socio_economic_analyst",
            SOCIO_ECONOMIC,
            "Assess income, age, education and housing affordability of the area.",
        ),
    ];

    let mut stages: Vec<StageDefinition> = leaves
        .iter()
        .map(|(id, title, target, extract, instructions)| {
            StageDefinition::new(*id, *title)
                .with_target(*target)
                .with_instructions(*instructions)
                .depends_on_extract(*extract)
                .on_failure(FailurePolicy::Degrade)
        })
        .collect();

    let mut integrated = StageDefinition::new(INTEGRATED_EVALUATION, "Integrated Evaluation")
        .with_target("integrated_evaluator")
        .with_instructions(
            "Combine the five analyses into an overall suitability assessment. \
             Treat unavailable analyses as unknowns and say so.",
        )
        .on_failure(FailurePolicy::Abort);
    for (id, ..) in &leaves {
        integrated = integrated.depends_on_stage(*id);
    }
    stages.push(integrated);

    stages.push(
        StageDefinition::new(NARRATIVE_REPORT, "Narrative Report")
            .with_target("narrative_reporter")
            .with_instructions(
                "Write the final evaluation narrative for this listing. \
                 End with 'Final Answer:' followed by the report text.",
            )
            .depends_on_stage(INTEGRATED_EVALUATION)
            .on_failure(FailurePolicy::Abort),
    );

    stages
}
