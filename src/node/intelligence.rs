// SPDX-License-Identifier: MIT

//! Intelligence node - free-form reasoning over state
//!
//! Renders its prompt from state keys, makes exactly one completion call at a
//! high temperature and writes the text under `analysis`. The prompt and the
//! response are appended to the `history` array as `{role, content}` objects.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{ensure_input, render, MetricsSlot, Node, NodeContext, ANALYSIS_KEY, HISTORY_KEY};
use crate::error::IevError;
use crate::llm::{LlmProvider, Message, Role};
use crate::prompt::PromptTemplate;
use crate::state::State;
use crate::workflow::metrics::NodeMetrics;

/// Default sampling temperature for reasoning
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

pub struct IntelligenceNode {
    name: String,
    description: String,
    provider: Arc<dyn LlmProvider>,
    template: PromptTemplate,
    template_key: Option<String>,
    system_message: Option<String>,
    temperature: f32,
    output_key: String,
    history_key: String,
    max_retries: u32,
    call_timeout: Option<Duration>,
    required: Vec<String>,
    outputs: Vec<String>,
    metrics: MetricsSlot,
}

impl IntelligenceNode {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        template: impl Into<PromptTemplate>,
    ) -> Self {
        let template = template.into();
        let mut node = Self {
            name: name.into(),
            description: "Free-form reasoning".to_string(),
            provider,
            required: required_from(&template),
            template,
            template_key: None,
            system_message: None,
            temperature: DEFAULT_TEMPERATURE,
            output_key: ANALYSIS_KEY.to_string(),
            history_key: HISTORY_KEY.to_string(),
            max_retries: 0,
            call_timeout: None,
            outputs: Vec::new(),
            metrics: MetricsSlot::default(),
        };
        node.refresh_outputs();
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Fabric key consulted for a hot-swapped template before each run
    pub fn with_template_key(mut self, key: impl Into<String>) -> Self {
        self.template_key = Some(key.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self.refresh_outputs();
        self
    }

    pub fn with_history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = key.into();
        self.refresh_outputs();
        self
    }

    /// Re-issue the call up to `max_retries` times after an execution error
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    fn refresh_outputs(&mut self) {
        self.outputs = vec![self.output_key.clone(), self.history_key.clone()];
    }

    fn messages(&self, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_message {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));
        messages
    }
}

/// Top-level state keys named by a template's placeholders
pub(crate) fn required_from(template: &PromptTemplate) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for placeholder in template.placeholders() {
        let root = placeholder.split('.').next().unwrap_or(&placeholder).to_string();
        if !keys.contains(&root) {
            keys.push(root);
        }
    }
    keys
}

#[async_trait]
impl Node for IntelligenceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_keys(&self) -> &[String] {
        &self.required
    }

    fn output_keys(&self) -> &[String] {
        &self.outputs
    }

    async fn execute(&self, state: &State, cx: &mut NodeContext) -> Result<State, IevError> {
        ensure_input(self, state)?;

        let template = cx.template(self.template_key.as_deref(), &self.template).await;
        let prompt = render(&self.name, &template, state)?;
        let messages = self.messages(&prompt);

        let response = cx
            .complete(self.provider.as_ref(), &messages, self.temperature, self.call_timeout)
            .await
            .map_err(|e| IevError::execution(&self.name, e.to_string()))?;

        if response.trim().is_empty() {
            return Err(IevError::execution(&self.name, "provider returned an empty completion"));
        }
        log::info!("[{}] analysis received ({} chars)", self.name, response.chars().count());

        let mut next = state.clone();
        next.insert(self.output_key.clone(), json!(response))?;
        next.append(
            self.history_key.clone(),
            json!({"role": Role::User.as_str(), "content": prompt}),
        )?;
        next.append(
            self.history_key.clone(),
            json!({"role": Role::Assistant.as_str(), "content": response}),
        )?;
        Ok(next)
    }

    async fn on_error(
        &self,
        error: IevError,
        state: &State,
        cx: &mut NodeContext,
    ) -> Result<State, IevError> {
        let mut last = error;
        for attempt in 1..=self.max_retries {
            if !matches!(last, IevError::Execution { .. }) || cx.is_cancelled() {
                break;
            }
            cx.warn(format!(
                "retry {} of {} after execution error: {}",
                attempt, self.max_retries, last
            ));
            match self.execute(state, cx).await {
                Ok(next) => return Ok(next),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    fn get_metrics(&self) -> NodeMetrics {
        self.metrics.snapshot(&self.name)
    }

    fn record_metrics(&self, metrics: &NodeMetrics) {
        self.metrics.store(metrics);
    }
}
