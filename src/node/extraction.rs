// SPDX-License-Identifier: MIT

//! Extraction node - analysis text to a structured record
//!
//! Order of attempts, stopping at the first record produced:
//! 1. native structured output, when the provider supports it
//! 2. direct parse of the completion text
//! 3. each configured repair strategy in turn
//!
//! Every strategy that runs leaves a warning. When all of them fail the node
//! raises a recovery error carrying an excerpt of the text.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::intelligence::required_from;
use super::{ensure_input, render, MetricsSlot, Node, NodeContext, ANALYSIS_KEY, EXTRACTED_KEY};
use crate::error::IevError;
use crate::llm::{LlmProvider, Message};
use crate::prompt::PromptTemplate;
use crate::repair::{default_strategies, parse_record, Record, RepairStrategy};
use crate::schema::OutputSchema;
use crate::state::State;
use crate::workflow::metrics::NodeMetrics;

/// Default sampling temperature for extraction
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

pub struct ExtractionNode {
    name: String,
    description: String,
    provider: Arc<dyn LlmProvider>,
    template: PromptTemplate,
    template_key: Option<String>,
    temperature: f32,
    schema: OutputSchema,
    strategies: Vec<Arc<dyn RepairStrategy>>,
    input_key: String,
    output_key: String,
    call_timeout: Option<Duration>,
    required: Vec<String>,
    outputs: Vec<String>,
    metrics: MetricsSlot,
}

impl ExtractionNode {
    /// New node with the full repair chain (incremental, LLM, regex fallback)
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        template: impl Into<PromptTemplate>,
        schema: OutputSchema,
    ) -> Self {
        let strategies = default_strategies(&provider);
        let mut node = Self {
            name: name.into(),
            description: "Structured extraction".to_string(),
            provider,
            template: template.into(),
            template_key: None,
            temperature: DEFAULT_TEMPERATURE,
            schema,
            strategies,
            input_key: ANALYSIS_KEY.to_string(),
            output_key: EXTRACTED_KEY.to_string(),
            call_timeout: None,
            required: Vec::new(),
            outputs: Vec::new(),
            metrics: MetricsSlot::default(),
        };
        node.refresh_keys();
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

    /// Replace the repair chain; an empty chain means direct parse only
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn RepairStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_template_key(mut self, key: impl Into<String>) -> Self {
        self.template_key = Some(key.into());
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self.refresh_keys();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self.refresh_keys();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn refresh_keys(&mut self) {
        let mut required = vec![self.input_key.clone()];
        for key in required_from(&self.template) {
            if !required.contains(&key) {
                required.push(key);
            }
        }
        self.required = required;
        self.outputs = vec![self.output_key.clone()];
    }

    fn messages(&self, prompt: &str) -> Vec<Message> {
        vec![
            Message::system(format!(
                "Extract structured data. Reply with a single JSON object with these fields:\n{}",
                self.schema.describe()
            )),
            Message::user(prompt),
        ]
    }

    /// Native structured output, if the provider offers it and it yields a
    /// usable object
    async fn structured(&self, messages: &[Message], cx: &mut NodeContext) -> Option<Record> {
        if !self.provider.supports_structured_output() {
            return None;
        }
        match cx
            .complete_structured(
                self.provider.as_ref(),
                messages,
                &self.schema.to_json_schema(),
                self.call_timeout,
            )
            .await
        {
            Ok(Some(Value::Object(record))) if self.schema.recognises(&record) => Some(record),
            Ok(Some(_)) => {
                cx.warn("structured output did not match the schema, falling back to text");
                None
            }
            Ok(None) => None,
            Err(e) => {
                cx.warn(format!("structured output failed, falling back to text: {}", e));
                None
            }
        }
    }

    /// Direct parse, then each strategy in order
    async fn recover(&self, raw: &str, cx: &mut NodeContext) -> Result<Record, IevError> {
        let original = match parse_record(raw, &self.schema) {
            Ok(record) => return Ok(record),
            Err(e) => e,
        };
        log::info!("[{}] direct parse failed: {}", self.name, original);

        for strategy in &self.strategies {
            match strategy.repair(raw, &self.schema, cx).await {
                Ok(record) => {
                    cx.warn(format!("{} applied", strategy.name()));
                    return Ok(record);
                }
                Err(reason) => cx.warn(format!("{} failed: {}", strategy.name(), reason)),
            }
        }

        Err(IevError::recovery(
            &self.name,
            format!(
                "direct parse failed ({}) and {} repair strategies were exhausted",
                original,
                self.strategies.len()
            ),
            raw,
        ))
    }
}

#[async_trait]
impl Node for ExtractionNode {
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

    /// The analysis must be text, not just present
    fn missing_keys(&self, state: &State) -> Vec<String> {
        self.required
            .iter()
            .filter(|k| match state.get(k) {
                None | Some(Value::Null) => true,
                Some(value) => *k == &self.input_key && !value.is_string(),
            })
            .cloned()
            .collect()
    }

    async fn execute(&self, state: &State, cx: &mut NodeContext) -> Result<State, IevError> {
        ensure_input(self, state)?;

        let template = cx.template(self.template_key.as_deref(), &self.template).await;
        let prompt = render(&self.name, &template, state)?;
        let messages = self.messages(&prompt);

        let record = match self.structured(&messages, cx).await {
            Some(record) => record,
            None => {
                let raw = cx
                    .complete(self.provider.as_ref(), &messages, self.temperature, self.call_timeout)
                    .await
                    .map_err(|e| IevError::execution(&self.name, e.to_string()))?;
                self.recover(&raw, cx).await?
            }
        };
        log::info!("[{}] extracted {} fields", self.name, record.len());

        let mut next = state.clone();
        next.insert(self.output_key.clone(), Value::Object(record))?;
        Ok(next)
    }

    fn get_metrics(&self) -> NodeMetrics {
        self.metrics.snapshot(&self.name)
    }

    fn record_metrics(&self, metrics: &NodeMetrics) {
        self.metrics.store(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::node::testing::ScriptedProvider;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            FieldSpec::integer("timeline_months").range(1.0, 60.0),
            FieldSpec::float("disruption_score").range(0.0, 10.0),
        ])
    }

    fn analysed() -> State {
        State::new()
            .with("event", json!("Patent X"))
            .unwrap()
            .with("analysis", json!("The patent will reshape the market within 18 months."))
            .unwrap()
    }

    fn node(provider: Arc<ScriptedProvider>) -> ExtractionNode {
        ExtractionNode::new("extraction", provider, "Extract from: {analysis}", schema())
    }

    #[tokio::test]
    async fn test_direct_parse() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"timeline_months": 18, "disruption_score": 8.5}"#,
        ]));
        let mut cx = NodeContext::new("inv", "extraction");
        let input = analysed();

        let out = node(provider.clone()).execute(&input, &mut cx).await.unwrap();
        assert_eq!(out.get("extracted"), Some(&json!({"timeline_months": 18, "disruption_score": 8.5})));
        assert_eq!(out.get("analysis"), input.get("analysis"));
        assert!(cx.warnings().is_empty());

        let seen = provider.seen.lock().unwrap();
        assert!((seen[0].1 - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_trailing_comma_uses_incremental_repair_only() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"timeline_months": 18,}"#]));
        let mut cx = NodeContext::new("inv", "extraction");

        let out = node(provider.clone()).execute(&analysed(), &mut cx).await.unwrap();
        assert_eq!(out.get_path("extracted.timeline_months"), Some(&json!(18)));
        assert_eq!(cx.warnings(), &["incremental repair applied".to_string()]);
        // No repair completion was issued
        assert_eq!(provider.calls(), 1);
        assert_eq!(cx.llm_calls(), 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_llm_repair() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "timeline is about eighteen months, very disruptive",
            r#"{"timeline_months": 18, "disruption_score": 9}"#,
        ]));
        let mut cx = NodeContext::new("inv", "extraction");

        let out = node(provider.clone()).execute(&analysed(), &mut cx).await.unwrap();
        assert_eq!(out.get_path("extracted.disruption_score"), Some(&json!(9)));
        assert_eq!(cx.warnings().len(), 2);
        assert!(cx.warnings()[0].starts_with("incremental repair failed"));
        assert_eq!(cx.warnings()[1], "llm repair applied");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_falls_through_to_regex_fallback() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![
            Ok("Timeline months: 24. Disruption score: 6.5 overall".to_string()),
            Err("repair backend down".to_string()),
        ]));
        let mut cx = NodeContext::new("inv", "extraction");

        let out = node(provider).execute(&analysed(), &mut cx).await.unwrap();
        assert_eq!(out.get_path("extracted.timeline_months"), Some(&json!(24)));
        assert_eq!(out.get_path("extracted.disruption_score"), Some(&json!(6.5)));
        assert_eq!(cx.warnings().last().map(String::as_str), Some("regex fallback applied"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_recovery_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![""]));
        let mut cx = NodeContext::new("inv", "extraction");

        let err = node(provider).execute(&analysed(), &mut cx).await.unwrap_err();
        match err {
            IevError::Recovery { node, reason, excerpt } => {
                assert_eq!(node, "extraction");
                assert!(reason.contains("direct parse failed"));
                assert!(excerpt.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cx.warnings().len(), 3);
    }

    #[tokio::test]
    async fn test_recovery_error_carries_truncated_excerpt() {
        let garbage = "x".repeat(500);
        let provider = Arc::new(ScriptedProvider::new(vec![garbage.as_str(), "still garbage"]));
        let mut cx = NodeContext::new("inv", "extraction");

        let err = node(provider).execute(&analysed(), &mut cx).await.unwrap_err();
        match err {
            IevError::Recovery { excerpt, .. } => assert_eq!(excerpt.chars().count(), 203),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_analysis_must_be_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut cx = NodeContext::new("inv", "extraction");
        let state = State::new().with("analysis", json!({"not": "text"})).unwrap();

        let err = node(provider).execute(&state, &mut cx).await.unwrap_err();
        assert!(matches!(err, IevError::Precondition { .. }));
    }

    #[tokio::test]
    async fn test_empty_chain_is_direct_parse_only() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"timeline_months": 18,}"#]));
        let mut cx = NodeContext::new("inv", "extraction");
        let node = node(provider).with_strategies(vec![]);

        assert!(node.strategy_names().is_empty());
        let err = node.execute(&analysed(), &mut cx).await.unwrap_err();
        assert!(matches!(err, IevError::Recovery { .. }));
    }

    struct StructuredProvider;

    #[async_trait]
    impl LlmProvider for StructuredProvider {
        fn name(&self) -> &str {
            "structured"
        }

        async fn complete(&self, _messages: &[Message], _temperature: f32) -> Result<String, ProviderError> {
            Err(ProviderError::Unavailable("text path not expected".into()))
        }

        async fn complete_structured(
            &self,
            _messages: &[Message],
            schema: &Value,
        ) -> Result<Option<Value>, ProviderError> {
            assert_eq!(schema["type"], "object");
            Ok(Some(json!({"timeline_months": 12, "disruption_score": 3.0})))
        }

        fn supports_structured_output(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_structured_output_preferred() {
        let node = ExtractionNode::new("extraction", Arc::new(StructuredProvider), "{analysis}", schema());
        let mut cx = NodeContext::new("inv", "extraction");

        let out = node.execute(&analysed(), &mut cx).await.unwrap();
        assert_eq!(out.get_path("extracted.timeline_months"), Some(&json!(12)));
        assert_eq!(cx.llm_calls(), 1);
    }

    struct StalledStructuredProvider;

    #[async_trait]
    impl LlmProvider for StalledStructuredProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _messages: &[Message], _temperature: f32) -> Result<String, ProviderError> {
            Ok(r#"{"timeline_months": 18, "disruption_score": 7.5}"#.to_string())
        }

        async fn complete_structured(
            &self,
            _messages: &[Message],
            _schema: &Value,
        ) -> Result<Option<Value>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Some(json!({"timeline_months": 1, "disruption_score": 0.0})))
        }

        fn supports_structured_output(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_structured_call_respects_timeout() {
        let node = ExtractionNode::new("extraction", Arc::new(StalledStructuredProvider), "{analysis}", schema())
            .with_call_timeout(Some(Duration::from_millis(50)));
        let mut cx = NodeContext::new("inv", "extraction");

        let started = std::time::Instant::now();
        let out = node.execute(&analysed(), &mut cx).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(out.get_path("extracted.timeline_months"), Some(&json!(18)));
        assert_eq!(cx.llm_calls(), 2);
        assert!(cx.warnings().iter().any(|w| w.contains("structured output failed")));
    }
}
