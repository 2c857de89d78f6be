//! Stage input serialization and response parsing
//!
//! Input is one JSON document per invocation. Responses may be free text,
//! a JSON object (bare, fenced or embedded in prose), or either of those
//! after a `Final Answer:` marker.

use super::types::{FieldValue, Finding, FindingBody, StageDefinition, StageId};
use crate::capability::{CapabilityError, CapabilityResponse};
use crate::segment::Extract;
use crate::store::ListingSummary;
use crate::workspace::IndexHit;
use serde_json::json;
use std::collections::BTreeMap;

const FINAL_ANSWER: &str = "Final Answer:";

/// Keys whose string value becomes the finding text.
const TEXT_KEYS: [&str; 3] = ["summary", "text", "finding"];

/// Build the serialized input for one stage.
///
/// `extracts` and `findings` hold only this stage's declared dependencies.
pub fn build_input(
    stage: &StageDefinition,
    listing: &ListingSummary,
    extracts: &[&Extract],
    findings: &[&Finding],
    related: &[IndexHit],
) -> String {
    let extracts: serde_json::Map<String, serde_json::Value> = extracts
        .iter()
        .map(|e| (e.schema().to_string(), e.to_json()))
        .collect();
    let findings: serde_json::Map<String, serde_json::Value> = findings
        .iter()
        .map(|f| (f.stage().to_string(), f.to_json()))
        .collect();
    let related: Vec<serde_json::Value> = related
        .iter()
        .map(|hit| {
            json!({
                "stage": hit.key,
                "similarity": hit.similarity,
                "text": hit.text,
            })
        })
        .collect();

    json!({
        "stage": stage.id,
        "title": stage.title,
        "instructions": stage.instructions,
        "listing": listing,
        "extracts": extracts,
        "findings": findings,
        "related": related,
    })
    .to_string()
}

/// Parse a completed capability response into a finding body.
///
/// An empty response is a permanent parse failure.
pub fn parse_response(stage: &StageId, response: CapabilityResponse) -> Result<FindingBody, CapabilityError> {
    let raw = response.response.unwrap_or_default();
    let answer = final_answer(&raw).trim();
    if answer.is_empty() {
        return Err(CapabilityError::ParseError(format!(
            "stage {} returned an empty response",
            stage
        )));
    }

    let Some(serde_json::Value::Object(map)) = extract_json(answer) else {
        return Ok(FindingBody {
            text: answer.to_string(),
            fields: BTreeMap::new(),
        });
    };

    let mut text = None;
    let mut fields = BTreeMap::new();
    for (key, value) in map {
        match value {
            serde_json::Value::String(s) if text.is_none() && TEXT_KEYS.contains(&key.as_str()) => {
                text = Some(s);
            }
            serde_json::Value::String(s) => {
                fields.insert(key, FieldValue::Category(s));
            }
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    fields.insert(key, FieldValue::Number(f));
                }
            }
            serde_json::Value::Bool(b) => {
                fields.insert(key, FieldValue::Flag(b));
            }
            // nested values are not scalar fields
            _ => {}
        }
    }

    Ok(FindingBody {
        text: text.unwrap_or_else(|| answer.to_string()),
        fields,
    })
}

/// Text after the last `Final Answer:` marker, or all of it.
fn final_answer(text: &str) -> &str {
    match text.rfind(FINAL_ANSWER) {
        Some(pos) => &text[pos + FINAL_ANSWER.len()..],
        None => text,
    }
}

/// Extract a JSON object from LLM response text.
///
/// Handles bare JSON, fenced code blocks, and JSON embedded in prose.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}
