// SPDX-License-Identifier: MIT

//! Node module - units of work in a workflow
//!
//! This module provides the core `Node` trait and implementations:
//! - `IntelligenceNode` - free-form reasoning at high temperature
//! - `ExtractionNode` - structured extraction with a repair chain
//! - `ValidationNode` - schema gate plus advisory semantic rules
//! - `FnNode` - custom node backed by an async closure

mod extraction;
mod func;
mod intelligence;
mod validation;

pub use extraction::{ExtractionNode, DEFAULT_TEMPERATURE as EXTRACTION_TEMPERATURE};
pub use func::{Additions, FnNode};
pub use intelligence::{IntelligenceNode, DEFAULT_TEMPERATURE as INTELLIGENCE_TEMPERATURE};
pub use validation::ValidationNode;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{IevError, ProviderError};
use crate::fabric::CacheFabric;
use crate::llm::{complete_structured_within, complete_within, LlmProvider, Message};
use crate::prompt::PromptTemplate;
use crate::state::State;
use crate::workflow::metrics::NodeMetrics;

/// Default state key written by [`IntelligenceNode`]
pub const ANALYSIS_KEY: &str = "analysis";
/// Default state key holding the running conversation
pub const HISTORY_KEY: &str = "history";
/// Default state key written by [`ExtractionNode`]
pub const EXTRACTED_KEY: &str = "extracted";
/// Default state key written by [`ValidationNode`]
pub const VALIDATED_KEY: &str = "validated";

/// Core trait for all node types
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique name within a workflow
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// State keys that must be present before the node runs
    fn required_keys(&self) -> &[String];

    /// State keys the node guarantees to add on success
    fn output_keys(&self) -> &[String];

    /// Required keys that are absent or null
    fn missing_keys(&self, state: &State) -> Vec<String> {
        self.required_keys()
            .iter()
            .filter(|k| matches!(state.get(k), None | Some(Value::Null)))
            .cloned()
            .collect()
    }

    /// Cheap precondition check; never performs the node's work
    fn validate_input(&self, state: &State) -> bool {
        self.missing_keys(state).is_empty()
    }

    /// Do the work; returns the input state plus this node's additions
    async fn execute(&self, state: &State, cx: &mut NodeContext) -> Result<State, IevError>;

    /// Handle a failed `execute`; the default re-raises
    async fn on_error(
        &self,
        error: IevError,
        _state: &State,
        _cx: &mut NodeContext,
    ) -> Result<State, IevError> {
        Err(error)
    }

    /// Most recent execution's metrics, or a not-run marker
    fn get_metrics(&self) -> NodeMetrics {
        NodeMetrics::not_run(self.name())
    }

    /// Called by the executor after each run of this node
    fn record_metrics(&self, _metrics: &NodeMetrics) {}
}

/// Fail fast with a precondition error if the node's inputs are incomplete
pub fn ensure_input<N: Node + ?Sized>(node: &N, state: &State) -> Result<(), IevError> {
    if node.validate_input(state) {
        return Ok(());
    }
    let mut missing = node.missing_keys(state);
    if missing.is_empty() {
        // Keys exist but a node-specific shape check rejected them
        missing = node.required_keys().to_vec();
    }
    Err(IevError::precondition(node.name(), missing))
}

/// Per-execution context handed to a node
///
/// Collects warnings and LLM call counts for the node's metrics and carries
/// the invocation's cancellation token and optional cache fabric.
pub struct NodeContext {
    invocation_id: String,
    node: String,
    warnings: Vec<String>,
    llm_calls: u32,
    fabric: Option<Arc<dyn CacheFabric>>,
    cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(invocation_id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            node: node.into(),
            warnings: Vec::new(),
            llm_calls: 0,
            fabric: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_fabric(mut self, fabric: Option<Arc<dyn CacheFabric>>) -> Self {
        self.fabric = fabric;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// Record a warning on this node's metrics
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{}] {}", self.node, message);
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn llm_calls(&self) -> u32 {
        self.llm_calls
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Issue a counted completion call
    pub async fn complete(
        &mut self,
        provider: &dyn LlmProvider,
        messages: &[Message],
        temperature: f32,
        timeout: Option<Duration>,
    ) -> Result<String, ProviderError> {
        self.llm_calls += 1;
        log::debug!(
            "[{}] completion call {} to {} (temperature {})",
            self.node,
            self.llm_calls,
            provider.name(),
            temperature
        );
        complete_within(provider, messages, temperature, timeout).await
    }

    /// Issue a counted structured completion call
    pub async fn complete_structured(
        &mut self,
        provider: &dyn LlmProvider,
        messages: &[Message],
        schema: &Value,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, ProviderError> {
        self.llm_calls += 1;
        log::debug!(
            "[{}] structured call {} to {}",
            self.node,
            self.llm_calls,
            provider.name()
        );
        complete_structured_within(provider, messages, schema, timeout).await
    }

    /// Resolve a template, preferring the fabric's current value for `key`
    pub async fn template(&mut self, key: Option<&str>, fallback: &PromptTemplate) -> PromptTemplate {
        let (Some(key), Some(fabric)) = (key, self.fabric.clone()) else {
            return fallback.clone();
        };
        match fabric.read_template(key).await {
            Ok(Some(source)) => PromptTemplate::new(source),
            Ok(None) => fallback.clone(),
            Err(e) => {
                self.warn(format!(
                    "cache fabric read for '{}' failed, using configured template: {}",
                    key, e
                ));
                fallback.clone()
            }
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, u32) {
        (self.warnings, self.llm_calls)
    }
}

/// Last-run metrics holder for built-in nodes
#[derive(Debug, Default)]
pub struct MetricsSlot(Mutex<Option<NodeMetrics>>);

impl MetricsSlot {
    pub fn store(&self, metrics: &NodeMetrics) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(metrics.clone());
    }

    pub fn snapshot(&self, node: &str) -> NodeMetrics {
        let slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().unwrap_or_else(|| NodeMetrics::not_run(node))
    }
}

/// Render a template, mapping missing keys to a precondition error
pub(crate) fn render(
    node: &str,
    template: &PromptTemplate,
    state: &State,
) -> Result<String, IevError> {
    template
        .render(state)
        .map_err(|missing| IevError::precondition(node, missing))
}
