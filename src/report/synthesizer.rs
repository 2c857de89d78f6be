//! Report synthesis: compose, render with fallback, write the artifact

use super::backend::{HtmlRenderer, MarkdownRenderer, ReportBackend};
use super::document::{ReportDocument, ReportMetadata};
use crate::analysis::{Finding, StageGraph, StageId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no finding for stage {0}")]
    MissingFinding(StageId),

    #[error("{backend} backend failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("primary backend failed ({primary}); fallback failed ({fallback})")]
    FallbackFailed { primary: String, fallback: String },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which backend renders first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Html,
    Markdown,
}

/// A report written to durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Name of the backend that produced it
    pub backend: String,
    pub used_fallback: bool,
}

pub struct ReportSynthesizer {
    primary: Box<dyn ReportBackend>,
    fallback: Option<Box<dyn ReportBackend>>,
    output_dir: PathBuf,
}

impl ReportSynthesizer {
    pub fn new(
        primary: Box<dyn ReportBackend>,
        fallback: Option<Box<dyn ReportBackend>>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            primary,
            fallback,
            output_dir: output_dir.into(),
        }
    }

    /// HTML with a Markdown fallback, or Markdown alone.
    pub fn for_format(format: ReportFormat, output_dir: impl Into<PathBuf>) -> Self {
        match format {
            ReportFormat::Html => Self::new(
                Box::new(HtmlRenderer::new()),
                Some(Box::new(MarkdownRenderer::new())),
                output_dir,
            ),
            ReportFormat::Markdown => Self::new(Box::new(MarkdownRenderer::new()), None, output_dir),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Compose the report and write it once.
    ///
    /// A primary backend failure falls back to the fallback backend with the
    /// same document; only a failure of both is an error.
    pub fn render(
        &self,
        graph: &StageGraph,
        findings: &BTreeMap<StageId, Finding>,
        metadata: ReportMetadata,
    ) -> Result<Artifact, RenderError> {
        let document = ReportDocument::compose(graph, findings, metadata)?;

        let (backend, bytes, used_fallback) = match self.primary.render(&document) {
            Ok(bytes) => (&*self.primary, bytes, false),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                warn!(
                    primary = self.primary.name(),
                    fallback = fallback.name(),
                    error = %primary_err,
                    "primary report backend failed; using fallback"
                );
                match fallback.render(&document) {
                    Ok(bytes) => (&**fallback, bytes, true),
                    Err(fallback_err) => {
                        return Err(RenderError::FallbackFailed {
                            primary: primary_err.to_string(),
                            fallback: fallback_err.to_string(),
                        })
                    }
                }
            }
        };

        let path = write_artifact(
            &self.output_dir,
            &artifact_stem(&document.metadata),
            backend.extension(),
            &bytes,
        )?;
        info!(path = %path.display(), backend = backend.name(), "report written");
        Ok(Artifact {
            path,
            backend: backend.name().to_string(),
            used_fallback,
        })
    }
}

/// `Land_Evaluation_<key>_<YYYYmmdd_HHMMSS>` with the key made filename-safe.
pub fn artifact_stem(metadata: &ReportMetadata) -> String {
    let key: String = metadata
        .key()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "Land_Evaluation_{}_{}",
        key,
        metadata.generated_at.format("%Y%m%d_%H%M%S")
    )
}

/// Write `bytes` to `<dir>/<stem>.<ext>`, or `<stem>_<n>.<ext>` for the first
/// free `n` when earlier runs already used the name. Never overwrites.
pub fn write_artifact(dir: &Path, stem: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf, RenderError> {
    std::fs::create_dir_all(dir).map_err(|source| RenderError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut n = 0u32;
    loop {
        let name = if n == 0 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, n, extension)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)
                    .and_then(|()| file.sync_all())
                    .map_err(|source| RenderError::Io {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(source) => return Err(RenderError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FindingBody, StageDefinition};
    use crate::store::ListingSummary;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    struct Broken(&'static str);

    impl ReportBackend for Broken {
        fn name(&self) -> &str {
            self.0
        }
        fn extension(&self) -> &str {
            "bin"
        }
        fn render(&self, _document: &ReportDocument) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Backend {
                backend: self.0.to_string(),
                reason: "engine missing".into(),
            })
        }
    }

    fn metadata(key: &str) -> ReportMetadata {
        ReportMetadata {
            listing: ListingSummary {
                key: key.into(),
                address: "Unknown".into(),
                city: "Unknown".into(),
                state: "Unknown".into(),
            },
            generated_at: Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap(),
            run_id: Uuid::nil(),
        }
    }

    fn single_stage() -> (StageGraph, BTreeMap<StageId, Finding>) {
        let def = StageDefinition::new("only", "Only").depends_on_extract("X");
        let graph = StageGraph::new(vec![def.clone()], &["X"]).unwrap();
        let finding = Finding::complete(
            &def,
            FindingBody {
                text: "Body".into(),
                ..Default::default()
            },
            1,
        );
        let findings = BTreeMap::from([(def.id.clone(), finding)]);
        (graph, findings)
    }

    #[test]
    fn stem_sanitizes_key() {
        assert_eq!(
            artifact_stem(&metadata("AB/12 3")),
            "Land_Evaluation_AB_12_3_20261018_093000"
        );
    }

    #[test]
    fn colliding_names_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_artifact(dir.path(), "r", "md", b"one").unwrap();
        let second = write_artifact(dir.path(), "r", "md", b"two").unwrap();
        let third = write_artifact(dir.path(), "r", "md", b"three").unwrap();
        assert_eq!(first.file_name().unwrap(), "r.md");
        assert_eq!(second.file_name().unwrap(), "r_1.md");
        assert_eq!(third.file_name().unwrap(), "r_2.md");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
    }

    #[test]
    fn html_primary_writes_html() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, findings) = single_stage();
        let synth = ReportSynthesizer::for_format(ReportFormat::Html, dir.path());
        let artifact = synth.render(&graph, &findings, metadata("K1")).unwrap();
        assert!(!artifact.used_fallback);
        assert_eq!(artifact.backend, "html");
        assert_eq!(artifact.path.extension().unwrap(), "html");
    }

    #[test]
    fn primary_failure_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, findings) = single_stage();
        let synth = ReportSynthesizer::new(
            Box::new(Broken("pdf")),
            Some(Box::new(MarkdownRenderer::new())),
            dir.path(),
        );
        let artifact = synth.render(&graph, &findings, metadata("K1")).unwrap();
        assert!(artifact.used_fallback);
        assert_eq!(artifact.path.extension().unwrap(), "md");
        let content = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(content.contains("## Only"));
    }

    #[test]
    fn both_backends_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, findings) = single_stage();
        let synth = ReportSynthesizer::new(Box::new(Broken("pdf")), Some(Box::new(Broken("text"))), dir.path());
        let err = synth.render(&graph, &findings, metadata("K1")).unwrap_err();
        assert!(matches!(err, RenderError::FallbackFailed { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
