// SPDX-License-Identifier: MIT

//! Validation node - schema gate plus advisory rules
//!
//! A record that already satisfies the schema passes straight through. A
//! violating record goes to the configured strategy when `repair_on_fail` is
//! set, and fails immediately otherwise. Semantic rules run on the final
//! record and only add warnings.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{ensure_input, MetricsSlot, Node, NodeContext, EXTRACTED_KEY, VALIDATED_KEY};
use crate::error::IevError;
use crate::schema::OutputSchema;
use crate::state::State;
use crate::validation::{Strict, ValidationRule, ValidationStrategy};
use crate::workflow::metrics::NodeMetrics;

pub struct ValidationNode {
    name: String,
    description: String,
    schema: OutputSchema,
    strategy: Arc<dyn ValidationStrategy>,
    repair_on_fail: bool,
    rules: Vec<ValidationRule>,
    input_key: String,
    output_key: String,
    required: Vec<String>,
    outputs: Vec<String>,
    metrics: MetricsSlot,
}

impl ValidationNode {
    /// Strict validation of `extracted` into `validated`
    pub fn new(name: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            name: name.into(),
            description: "Schema and rule validation".to_string(),
            schema,
            strategy: Arc::new(Strict),
            repair_on_fail: true,
            rules: Vec::new(),
            input_key: EXTRACTED_KEY.to_string(),
            output_key: VALIDATED_KEY.to_string(),
            required: vec![EXTRACTED_KEY.to_string()],
            outputs: vec![VALIDATED_KEY.to_string()],
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ValidationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// When false, any violation fails the node whatever the strategy
    pub fn with_repair_on_fail(mut self, repair_on_fail: bool) -> Self {
        self.repair_on_fail = repair_on_fail;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = ValidationRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self.required = vec![self.input_key.clone()];
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self.outputs = vec![self.output_key.clone()];
        self
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }
}

#[async_trait]
impl Node for ValidationNode {
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

    /// The input must be an object
    fn missing_keys(&self, state: &State) -> Vec<String> {
        match state.get(&self.input_key) {
            Some(Value::Object(_)) => Vec::new(),
            _ => vec![self.input_key.clone()],
        }
    }

    async fn execute(&self, state: &State, cx: &mut NodeContext) -> Result<State, IevError> {
        ensure_input(self, state)?;
        let record = state
            .get(&self.input_key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let violations = self.schema.validate(&record);
        let validated = if violations.is_empty() {
            record
        } else if !self.repair_on_fail {
            return Err(IevError::validation(&self.name, violations));
        } else {
            log::info!(
                "[{}] {} violation(s), applying {} validation",
                self.name,
                violations.len(),
                self.strategy.name()
            );
            self.strategy.validate(record, &self.schema, cx).await?
        };

        for rule in &self.rules {
            if !rule.check(&validated) {
                cx.warn(format!("rule '{}' not satisfied", rule.name()));
            }
        }

        let mut next = state.clone();
        next.insert(self.output_key.clone(), Value::Object(validated))?;
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
    use crate::node::testing::ScriptedProvider;
    use crate::repair::Record;
    use crate::schema::FieldSpec;
    use crate::validation::{BestEffort, RetryWithRepair};
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            FieldSpec::integer("timeline_months").range(1.0, 60.0),
            FieldSpec::float("disruption_score").range(0.0, 10.0),
        ])
    }

    fn extracted(record: Value) -> State {
        State::new()
            .with("analysis", json!("text"))
            .unwrap()
            .with("extracted", record)
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_record_passes_unchanged() {
        let node = ValidationNode::new("validation", schema()).with_strategy(Arc::new(BestEffort));
        let mut cx = NodeContext::new("inv", "validation");
        let record = json!({"timeline_months": 18, "disruption_score": 8.5});

        let out = node.execute(&extracted(record.clone()), &mut cx).await.unwrap();
        assert_eq!(out.get("validated"), Some(&record));
        assert!(cx.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_best_effort_clamps() {
        let node = ValidationNode::new("validation", schema()).with_strategy(Arc::new(BestEffort));
        let mut cx = NodeContext::new("inv", "validation");

        let out = node
            .execute(
                &extracted(json!({"timeline_months": 150, "disruption_score": 9.0})),
                &mut cx,
            )
            .await
            .unwrap();
        assert_eq!(out.get_path("validated.timeline_months"), Some(&json!(60)));
        // The extracted record is left as it was
        assert_eq!(out.get_path("extracted.timeline_months"), Some(&json!(150)));
        assert_eq!(cx.warnings().len(), 1);
        assert!(cx.warnings()[0].contains("clamp"));
    }

    #[tokio::test]
    async fn test_strict_fails() {
        let node = ValidationNode::new("validation", schema());
        let mut cx = NodeContext::new("inv", "validation");
        let err = node
            .execute(&extracted(json!({"timeline_months": 150, "disruption_score": 9.0})), &mut cx)
            .await
            .unwrap_err();
        assert!(matches!(err, IevError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_repair_disabled_is_strict() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"timeline_months": 12, "disruption_score": 9.0}"#,
        ]));
        let node = ValidationNode::new("validation", schema())
            .with_strategy(Arc::new(RetryWithRepair::new(provider.clone())))
            .with_repair_on_fail(false);
        let mut cx = NodeContext::new("inv", "validation");

        let err = node
            .execute(&extracted(json!({"timeline_months": 150, "disruption_score": 9.0})), &mut cx)
            .await
            .unwrap_err();
        assert!(matches!(err, IevError::Validation { .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_rules_warn_but_never_fail() {
        let node = ValidationNode::new("validation", schema())
            .with_rule(ValidationRule::new("score matches timeline", |r: &Record| {
                r["disruption_score"].as_f64().unwrap_or(0.0) < 5.0
            }))
            .with_rule(ValidationRule::new("timeline positive", |r: &Record| {
                r["timeline_months"].as_i64().unwrap_or(0) > 0
            }));
        let mut cx = NodeContext::new("inv", "validation");

        let out = node
            .execute(&extracted(json!({"timeline_months": 18, "disruption_score": 8.5})), &mut cx)
            .await
            .unwrap();
        assert!(out.contains_key("validated"));
        assert_eq!(cx.warnings(), &["rule 'score matches timeline' not satisfied".to_string()]);
    }

    #[tokio::test]
    async fn test_requires_object_input() {
        let node = ValidationNode::new("validation", schema());
        let mut cx = NodeContext::new("inv", "validation");
        let state = State::new().with("extracted", json!("oops")).unwrap();
        let err = node.execute(&state, &mut cx).await.unwrap_err();
        assert!(matches!(err, IevError::Precondition { .. }));
    }
}
