//! Schema-driven fan-out of one master row

use super::extract::Extract;
use super::schema::SchemaSet;
use crate::store::MasterRow;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error};

/// Columns one schema expects but the master row lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub schema: String,
    pub missing_columns: Vec<String>,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: missing [{}]", self.schema, self.missing_columns.join(", "))
    }
}

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("schema validation failed: {}", format_violations(.0))]
    SchemaValidation(Vec<SchemaViolation>),

    #[error("invalid schema '{schema}': {reason}")]
    InvalidSchema { schema: String, reason: String },
}

impl SegmentError {
    /// Violations behind a validation failure, empty for other variants.
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            Self::SchemaValidation(v) => v,
            Self::InvalidSchema { .. } => &[],
        }
    }
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check every schema against the row's columns without producing anything.
pub fn validate(row: &MasterRow, schemas: &SchemaSet) -> Result<(), SegmentError> {
    let violations: Vec<SchemaViolation> = schemas
        .iter()
        .filter_map(|schema| {
            let missing = schema.missing_from(row.columns());
            (!missing.is_empty()).then(|| SchemaViolation {
                schema: schema.name().to_string(),
                missing_columns: missing,
            })
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        for violation in &violations {
            error!(schema = %violation.schema, missing = ?violation.missing_columns, "schema references absent columns");
        }
        Err(SegmentError::SchemaValidation(violations))
    }
}

/// Project `row` onto every schema in `schemas`.
///
/// All schemas are validated before any extract is built, so the result is
/// either a complete set or an error. Values are copied verbatim, including
/// empty cells.
pub fn segment(
    row: &MasterRow,
    schemas: &SchemaSet,
) -> Result<BTreeMap<String, Extract>, SegmentError> {
    validate(row, schemas)?;

    let extracts = schemas
        .iter()
        .map(|schema| {
            let columns = schema
                .columns()
                .iter()
                .map(|column| {
                    let value = row.get(column).unwrap_or_default().to_string();
                    (column.clone(), value)
                })
                .collect();
            debug!(schema = schema.name(), columns = schema.columns().len(), "built extract");
            (
                schema.name().to_string(),
                Extract::new(schema.name(), schema.file_name(), columns),
            )
        })
        .collect();

    Ok(extracts)
}
