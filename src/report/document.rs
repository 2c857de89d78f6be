//! Backend-independent report content

use super::RenderError;
use crate::analysis::{FieldValue, Finding, FindingStatus, StageGraph, StageId, StageRole};
use crate::store::ListingSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use uuid::Uuid;

/// Run metadata shown in the report header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub listing: ListingSummary,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl ReportMetadata {
    pub fn new(listing: ListingSummary) -> Self {
        Self {
            listing,
            generated_at: Utc::now(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn key(&self) -> &str {
        &self.listing.key
    }
}

/// One stage's contribution to the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub stage: StageId,
    pub title: String,
    pub role: StageRole,
    /// `None` when the stage produced a real finding
    pub unavailable: Option<String>,
    pub text: String,
    pub fields: Vec<(String, FieldValue)>,
}

/// Ordered sections plus metadata. Composition is deterministic: the same
/// findings and metadata always give the same document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub metadata: ReportMetadata,
    pub sections: Vec<ReportSection>,
}

impl ReportDocument {
    /// One section per stage, in the graph's report order. Every stage must
    /// have a finding.
    pub fn compose(
        graph: &StageGraph,
        findings: &BTreeMap<StageId, Finding>,
        metadata: ReportMetadata,
    ) -> Result<Self, RenderError> {
        let mut sections = Vec::with_capacity(graph.len());
        for stage in graph.report_order() {
            let finding = findings
                .get(&stage.id)
                .ok_or_else(|| RenderError::MissingFinding(stage.id.clone()))?;
            let role = graph
                .index_of(&stage.id)
                .map(|i| graph.role(i))
                .unwrap_or(StageRole::Leaf);
            sections.push(ReportSection {
                stage: stage.id.clone(),
                title: stage.title.clone(),
                role,
                unavailable: match finding.status() {
                    FindingStatus::Complete => None,
                    FindingStatus::Unavailable { reason } => Some(reason.clone()),
                },
                text: finding.text().to_string(),
                fields: finding
                    .fields()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            });
        }
        Ok(Self { metadata, sections })
    }

    pub fn title(&self) -> String {
        format!("Land Evaluation Report: {}", self.metadata.key())
    }

    pub fn unavailable_sections(&self) -> impl Iterator<Item = &ReportSection> {
        self.sections.iter().filter(|s| s.unavailable.is_some())
    }

    /// Markdown source shared by every backend.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let listing = &self.metadata.listing;
        // writing to a String cannot fail
        let _ = writeln!(out, "# {}\n", self.title());
        let _ = writeln!(out, "- **Listing:** {}", listing.key);
        let _ = writeln!(out, "- **Address:** {}", listing.address);
        let _ = writeln!(out, "- **City:** {}", listing.city);
        let _ = writeln!(out, "- **State:** {}", listing.state);
        let _ = writeln!(
            out,
            "- **Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "- **Run:** {}", self.metadata.run_id);

        for section in &self.sections {
            let _ = writeln!(out, "\n## {}\n", section.title);
            if let Some(reason) = &section.unavailable {
                let _ = writeln!(out, "> **Unavailable:** this analysis could not be completed ({}).", reason);
                continue;
            }
            let _ = writeln!(out, "{}", section.text.trim_end());
            if !section.fields.is_empty() {
                let _ = writeln!(out, "\n| Field | Value |\n|---|---|");
                for (name, value) in &section.fields {
                    let _ = writeln!(out, "| {} | {} |", escape_cell(name), escape_cell(&value.to_string()));
                }
            }
        }
        out
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
