// SPDX-License-Identifier: MIT

//! Retry-with-repair validation
//!
//! On violation, the record, the schema and the violations are sent back to
//! the provider at temperature zero with a request for corrected values. The
//! reply is re-validated; at most `max_attempts` round-trips are made.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::ValidationStrategy;
use crate::error::IevError;
use crate::llm::{LlmProvider, Message};
use crate::node::NodeContext;
use crate::repair::{parse_record, repair_text, Record, DEFAULT_REPAIR_TIMEOUT};
use crate::schema::{OutputSchema, Violation};

/// Round-trips made before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

pub struct RetryWithRepair {
    provider: Arc<dyn LlmProvider>,
    max_attempts: u32,
    temperature: f32,
    timeout: Option<Duration>,
}

impl RetryWithRepair {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            temperature: 0.0,
            timeout: Some(DEFAULT_REPAIR_TIMEOUT),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn messages(record: &Record, schema: &OutputSchema, violations: &[Violation]) -> Vec<Message> {
        let problems = violations
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n");
        let current = serde_json::to_string_pretty(&Value::Object(record.clone()))
            .unwrap_or_else(|_| "{}".to_string());
        vec![
            Message::system(
                "You correct structured records so they satisfy a schema. \
                 Reply with a single JSON object and nothing else.",
            ),
            Message::user(format!(
                "Schema:\n{}\n\nRecord:\n{}\n\nProblems:\n{}\n\n\
                 Return the corrected JSON object with every field.",
                schema.describe(),
                current,
                problems
            )),
        ]
    }
}

#[async_trait]
impl ValidationStrategy for RetryWithRepair {
    fn name(&self) -> &str {
        "retry-with-repair"
    }

    async fn validate(
        &self,
        record: Record,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, IevError> {
        let mut current = record;
        let mut violations = schema.validate(&current);

        let mut attempt = 0;
        while !violations.is_empty() && attempt < self.max_attempts {
            attempt += 1;
            let messages = Self::messages(&current, schema, &violations);
            let response = match cx
                .complete(self.provider.as_ref(), &messages, self.temperature, self.timeout)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    cx.warn(format!("retry-with-repair attempt {} failed: {}", attempt, e));
                    continue;
                }
            };

            match parse_record(&response, schema).or_else(|_| parse_record(&repair_text(&response), schema)) {
                Ok(candidate) => {
                    current = candidate;
                    violations = schema.validate(&current);
                    if violations.is_empty() {
                        cx.warn(format!("retry-with-repair corrected record on attempt {}", attempt));
                    } else {
                        cx.warn(format!(
                            "retry-with-repair attempt {} left {} violation(s)",
                            attempt,
                            violations.len()
                        ));
                    }
                }
                Err(e) => {
                    cx.warn(format!("retry-with-repair attempt {} unparseable: {}", attempt, e));
                }
            }
        }

        if violations.is_empty() {
            Ok(current)
        } else {
            Err(IevError::validation(cx.node_name(), violations))
        }
    }
}
