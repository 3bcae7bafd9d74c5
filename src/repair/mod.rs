// SPDX-License-Identifier: MIT

//! Repair strategies for malformed structured output
//!
//! Extraction first tries a direct parse; when that fails it walks an ordered
//! list of strategies and keeps the first record one of them produces:
//! - [`IncrementalRepair`] - mechanical text fixes, no LLM involved
//! - [`LlmRepair`] - asks the provider to rewrite the text as valid JSON
//! - [`FieldFallback`] - pattern-matches known field names out of the text

mod fallback;
mod incremental;
mod llm;

pub use fallback::FieldFallback;
pub use incremental::{repair_text, IncrementalRepair};
pub use llm::{LlmRepair, DEFAULT_REPAIR_TIMEOUT};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::llm::LlmProvider;
use crate::node::NodeContext;
use crate::schema::OutputSchema;

/// A structured record produced by extraction
pub type Record = Map<String, Value>;

/// Why a strategy could not produce a record
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct RepairFailure(pub String);

impl RepairFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A pluggable repair algorithm
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    /// Label used in warnings, e.g. "incremental repair"
    fn name(&self) -> &str;

    /// Turn malformed text into a record matching the schema's field set
    async fn repair(
        &self,
        raw: &str,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, RepairFailure>;
}

/// Built-in strategy selector used by pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    Incremental,
    Llm,
    #[serde(alias = "fallback")]
    Regex,
}

impl RepairKind {
    /// The full chain in its canonical order
    pub fn default_chain() -> Vec<RepairKind> {
        vec![RepairKind::Incremental, RepairKind::Llm, RepairKind::Regex]
    }

    /// Instantiate the strategy; LLM repair shares the extraction provider
    pub fn build(&self, provider: &Arc<dyn LlmProvider>, timeout: Option<Duration>) -> Arc<dyn RepairStrategy> {
        match self {
            RepairKind::Incremental => Arc::new(IncrementalRepair),
            RepairKind::Llm => Arc::new(LlmRepair::new(provider.clone()).with_timeout(timeout)),
            RepairKind::Regex => Arc::new(FieldFallback),
        }
    }
}

/// The default chain built against one provider
pub fn default_strategies(provider: &Arc<dyn LlmProvider>) -> Vec<Arc<dyn RepairStrategy>> {
    RepairKind::default_chain()
        .iter()
        .map(|kind| kind.build(provider, Some(DEFAULT_REPAIR_TIMEOUT)))
        .collect()
}

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("valid regex"));

/// Content of the first markdown code fence, or the input unchanged
pub(crate) fn strip_code_fences(input: &str) -> &str {
    CODE_FENCE_RE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(input)
}

/// Parse text as a record without altering its syntax
///
/// Accepts a bare JSON object, one wrapped in a code fence, or one embedded
/// in surrounding prose. The object must mention at least one schema field.
pub fn parse_record(text: &str, schema: &OutputSchema) -> Result<Record, RepairFailure> {
    let trimmed = strip_code_fences(text.trim()).trim();
    if trimmed.is_empty() {
        return Err(RepairFailure::new("empty text"));
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(direct_err) => match embedded_object(trimmed) {
            Some(span) => serde_json::from_str::<Value>(span)
                .map_err(|e| RepairFailure::new(format!("invalid JSON: {}", e)))?,
            None => return Err(RepairFailure::new(format!("invalid JSON: {}", direct_err))),
        },
    };

    let record = match value {
        Value::Object(record) => record,
        other => {
            return Err(RepairFailure::new(format!(
                "expected a JSON object, got {}",
                crate::state::value_kind(&other)
            )))
        }
    };

    if !schema.recognises(&record) {
        return Err(RepairFailure::new("object contains none of the schema fields"));
    }
    Ok(record)
}

/// The first balanced `{...}` span in the text, if any
fn embedded_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let substring = &input[start..];
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&substring[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            FieldSpec::integer("timeline_months"),
            FieldSpec::float("disruption_score"),
        ])
    }

    #[test]
    fn test_parse_plain_object() {
        let record = parse_record(r#"{"timeline_months": 18, "disruption_score": 8.5}"#, &schema())
            .unwrap();
        assert_eq!(record["timeline_months"], json!(18));
    }

    #[test]
    fn test_parse_code_fence() {
        let text = "Here you go:\n```json\n{\"timeline_months\": 18}\n```";
        assert!(parse_record(text, &schema()).is_ok());
    }

    #[test]
    fn test_parse_embedded_in_prose() {
        let text = r#"The answer is {"timeline_months": 18} as requested."#;
        assert_eq!(parse_record(text, &schema()).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_rejects_trailing_comma() {
        assert!(parse_record(r#"{"timeline_months": 18,}"#, &schema()).is_err());
    }

    #[test]
    fn test_parse_rejects_unrelated_object() {
        let err = parse_record(r#"{"other": 1}"#, &schema()).unwrap_err();
        assert!(err.0.contains("none of the schema fields"));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_record("[1, 2]", &schema()).is_err());
        assert!(parse_record("", &schema()).is_err());
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            RepairKind::default_chain(),
            vec![RepairKind::Incremental, RepairKind::Llm, RepairKind::Regex]
        );
        let kind: RepairKind = serde_yaml::from_str("fallback").unwrap();
        assert_eq!(kind, RepairKind::Regex);
    }

    #[test]
    fn test_default_strategies_names() {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(crate::node::testing::ScriptedProvider::new(vec![]));
        let names: Vec<String> = default_strategies(&provider)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["incremental repair", "llm repair", "regex fallback"]);
    }
}
