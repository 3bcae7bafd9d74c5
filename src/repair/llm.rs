// SPDX-License-Identifier: MIT

//! LLM-assisted repair: a second, low-temperature completion that rewrites
//! the malformed text as a valid JSON object

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{parse_record, repair_text, Record, RepairFailure, RepairStrategy};
use crate::llm::{LlmProvider, Message};
use crate::node::NodeContext;
use crate::schema::OutputSchema;

/// Default deadline for a repair completion
pub const DEFAULT_REPAIR_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You repair malformed JSON. Reply with a single valid JSON object and nothing else.";

pub struct LlmRepair {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    timeout: Option<Duration>,
}

impl LlmRepair {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            temperature: 0.0,
            timeout: Some(DEFAULT_REPAIR_TIMEOUT),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn messages(raw: &str, schema: &OutputSchema) -> Vec<Message> {
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "The text below was meant to be a JSON object with these fields:\n{}\n\n\
                 Text:\n{}\n\nReturn only the corrected JSON object.",
                schema.describe(),
                raw
            )),
        ]
    }
}

#[async_trait]
impl RepairStrategy for LlmRepair {
    fn name(&self) -> &str {
        "llm repair"
    }

    async fn repair(
        &self,
        raw: &str,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, RepairFailure> {
        if raw.trim().is_empty() {
            return Err(RepairFailure::new("nothing to repair"));
        }

        let messages = Self::messages(raw, schema);
        let response = cx
            .complete(self.provider.as_ref(), &messages, self.temperature, self.timeout)
            .await
            .map_err(|e| RepairFailure::new(format!("repair call failed: {}", e)))?;

        parse_record(&response, schema)
            .or_else(|_| parse_record(&repair_text(&response), schema))
            .map_err(|e| RepairFailure::new(format!("repaired text still unparseable: {}", e)))
    }
}
