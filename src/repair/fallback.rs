// SPDX-License-Identifier: MIT

//! Last-resort field recovery by pattern matching
//!
//! Scans free text for `name: value` / `"name" = value` pairs for each schema
//! field and builds a partial record from what it finds.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Number, Value};

use super::{Record, RepairFailure, RepairStrategy};
use crate::node::NodeContext;
use crate::schema::{FieldSpec, FieldType, OutputSchema};

const VALUE_PATTERN: &str = r#"(?P<value>"(?:[^"\\]|\\.)*"|'[^']*'|-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?|true|false|null|[^,}\n]+)"#;

#[derive(Debug, Default, Clone, Copy)]
pub struct FieldFallback;

impl FieldFallback {
    pub fn new() -> Self {
        Self
    }

    /// Regex matching `field_name: value`, tolerant of quoting and of
    /// underscores written as spaces or hyphens
    fn field_regex(name: &str) -> Option<Regex> {
        let words: Vec<String> = name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        if words.is_empty() {
            return None;
        }
        let pattern = format!(
            r#"(?i)["']?\b{}\b["']?\s*[:=]\s*{}"#,
            words.join(r"[_\s-]?"),
            VALUE_PATTERN
        );
        match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("Failed to build fallback pattern for '{}': {}", name, e);
                None
            }
        }
    }

    fn convert(field: &FieldSpec, captured: &str) -> Option<Value> {
        let text = captured.trim();
        let unquoted = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            .unwrap_or(text)
            .trim();

        match field.field_type {
            FieldType::Integer => {
                let n: f64 = leading_number(unquoted)?.parse().ok()?;
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Some(Value::from(n as i64))
                } else {
                    Number::from_f64(n).map(Value::Number)
                }
            }
            FieldType::Float => {
                let n: f64 = leading_number(unquoted)?.parse().ok()?;
                Number::from_f64(n).map(Value::Number)
            }
            FieldType::Boolean => match unquoted.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldType::String => {
                if unquoted.is_empty() || unquoted == "null" {
                    None
                } else {
                    Some(Value::String(unquoted.to_string()))
                }
            }
            FieldType::Array | FieldType::Object => serde_json::from_str::<Value>(text)
                .ok()
                .filter(|v| field.field_type.matches(v)),
        }
    }
}

/// The numeric prefix of a value like "18 months" or "8.5/10"
fn leading_number(text: &str) -> Option<&str> {
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let number = &text[..end];
    (!number.is_empty() && number != "-").then_some(number)
}

#[async_trait]
impl RepairStrategy for FieldFallback {
    fn name(&self) -> &str {
        "regex fallback"
    }

    async fn repair(
        &self,
        raw: &str,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, RepairFailure> {
        let mut record = Record::new();
        let mut missing = Vec::new();

        for field in schema.fields() {
            let found = Self::field_regex(&field.name).and_then(|re| {
                re.captures_iter(raw)
                    .filter_map(|caps| caps.name("value"))
                    .find_map(|m| Self::convert(field, m.as_str()))
            });
            match found {
                Some(value) => {
                    record.insert(field.name.clone(), value);
                }
                None => missing.push(field.name.clone()),
            }
        }

        if record.is_empty() {
            return Err(RepairFailure::new("no schema fields found in text"));
        }
        if !missing.is_empty() {
            cx.warn(format!(
                "regex fallback recovered {} of {} fields; missing {:?}",
                record.len(),
                schema.fields().len(),
                missing
            ));
        }
        Ok(record)
    }
}
