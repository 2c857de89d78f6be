//! Core types for the staged analysis pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier of a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An input a stage waits for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Dependency {
    /// A workspace extract, by schema name
    Extract(String),
    /// The finding of another stage
    Stage(StageId),
}

/// What a permanent failure of a stage does to the run.
///
/// `StageGraph` forces `Abort` on any stage that depends on another stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Substitute an "unavailable" finding and let dependents proceed
    Degrade,
    /// Fail the run
    Abort,
}

/// Position of a stage in the graph, derived from its edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Depends on no other stage
    Leaf,
    /// Depends on other stages and has dependents
    FanIn,
    /// Depends on other stages, nothing depends on it
    Terminal,
}

/// A named unit of analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    /// Section heading used in the report
    pub title: String,
    /// Capability target invoked for this stage
    pub target: String,
    /// Instructions passed to the capability with the inputs
    pub instructions: String,
    pub dependencies: Vec<Dependency>,
    pub on_failure: FailurePolicy,
}

impl StageDefinition {
    /// A stage that degrades on failure and targets a capability named like its id.
    pub fn new(id: impl Into<StageId>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            target: id.as_str().to_string(),
            id,
            title: title.into(),
            instructions: String::new(),
            dependencies: Vec::new(),
            on_failure: FailurePolicy::Degrade,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn depends_on_extract(mut self, schema: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::Extract(schema.into()));
        self
    }

    pub fn depends_on_stage(mut self, stage: impl Into<StageId>) -> Self {
        self.dependencies.push(Dependency::Stage(stage.into()));
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn extract_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|d| match d {
            Dependency::Extract(name) => Some(name.as_str()),
            Dependency::Stage(_) => None,
        })
    }

    pub fn stage_dependencies(&self) -> impl Iterator<Item = &StageId> {
        self.dependencies.iter().filter_map(|d| match d {
            Dependency::Stage(id) => Some(id),
            Dependency::Extract(_) => None,
        })
    }
}

/// Scalar attached to a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Category(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Flag(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Category(s) => f.write_str(s),
        }
    }
}

/// Whether a finding carries real analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindingStatus {
    Complete,
    /// Sentinel substituted for a stage that failed permanently
    Unavailable { reason: String },
}

/// Structured text and fields parsed from a capability response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindingBody {
    pub text: String,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Immutable output of one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    stage: StageId,
    title: String,
    #[serde(flatten)]
    status: FindingStatus,
    text: String,
    fields: BTreeMap<String, FieldValue>,
    attempts: u32,
}

impl Finding {
    pub fn complete(def: &StageDefinition, body: FindingBody, attempts: u32) -> Self {
        Self {
            stage: def.id.clone(),
            title: def.title.clone(),
            status: FindingStatus::Complete,
            text: body.text,
            fields: body.fields,
            attempts,
        }
    }

    /// The sentinel used in place of a permanently failed stage.
    pub fn unavailable(def: &StageDefinition, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            stage: def.id.clone(),
            title: def.title.clone(),
            status: FindingStatus::Unavailable {
                reason: reason.into(),
            },
            text: String::new(),
            fields: BTreeMap::new(),
            attempts,
        }
    }

    pub fn stage(&self) -> &StageId {
        &self.stage
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> &FindingStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, FindingStatus::Complete)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Capability calls spent producing this finding.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Serialized form handed to dependent stages.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
