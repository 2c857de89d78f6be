//! Report synthesis
//!
//! Joins the pipeline's findings into one artifact per run. A
//! [`ReportDocument`] is composed deterministically from the findings and run
//! metadata (terminal stage first, then the fan-in stage, then leaves), and
//! handed to a [`ReportBackend`]. The primary backend renders a styled HTML
//! page; if it fails, the Markdown fallback renders the same document with
//! the same sections. Unavailable stages appear as marked sections, never
//! dropped.

mod backend;
mod document;
mod synthesizer;

pub use backend::{HtmlRenderer, MarkdownRenderer, ReportBackend};
pub use document::{ReportDocument, ReportMetadata, ReportSection};
pub use synthesizer::{artifact_stem, write_artifact, Artifact, RenderError, ReportFormat, ReportSynthesizer};
