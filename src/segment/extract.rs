//! Materialized schema projections

use serde::Serialize;
use std::io::Write;

/// One schema applied to one master row: an ordered single-row mapping
/// from column name to the verbatim cell value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extract {
    schema: String,
    file_name: String,
    columns: Vec<(String, String)>,
}

impl Extract {
    pub(crate) fn new(
        schema: impl Into<String>,
        file_name: impl Into<String>,
        columns: Vec<(String, String)>,
    ) -> Self {
        Self {
            schema: schema.into(),
            file_name: file_name.into(),
            columns,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// `(column, value)` pairs in the schema's declared order.
    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    pub fn value(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Write header plus the single data row as delimited text.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(self.columns.iter().map(|(c, _)| c.as_str()))?;
        out.write_record(self.columns.iter().map(|(_, v)| v.as_str()))?;
        out.flush()?;
        Ok(())
    }

    /// JSON object of the extract, for stage inputs.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|(c, v)| (c.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}
