// SPDX-License-Identifier: MIT

//! Validation strategies and semantic rules
//!
//! A `ValidationStrategy` decides what happens when an extracted record
//! violates its schema:
//! - [`Strict`] - any violation is fatal
//! - [`RetryWithRepair`] - bounded LLM round-trips asking for corrected values
//! - [`BestEffort`] - mechanical clamping, defaults and coercion
//!
//! [`ValidationRule`]s run after the schema gate passes and only ever produce
//! warnings.

mod best_effort;
mod retry;
mod strict;

pub use best_effort::{coerce, BestEffort};
pub use retry::{RetryWithRepair, DEFAULT_MAX_ATTEMPTS};
pub use strict::Strict;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::IevError;
use crate::llm::LlmProvider;
use crate::node::NodeContext;
use crate::repair::Record;
use crate::schema::OutputSchema;

/// Policy applied to a record against its schema
#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    /// Label used in logs, e.g. "best-effort"
    fn name(&self) -> &str;

    /// Return a record satisfying the schema or a validation error
    async fn validate(
        &self,
        record: Record,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, IevError>;
}

/// Strategy selector used by pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    Strict,
    #[serde(alias = "retry")]
    RetryWithRepair,
    BestEffort,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Strict => "strict",
            ValidationMode::RetryWithRepair => "retry_with_repair",
            ValidationMode::BestEffort => "best_effort",
        }
    }

    /// Instantiate the strategy; retry mode needs a provider to talk to
    pub fn strategy(
        &self,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Arc<dyn ValidationStrategy>, IevError> {
        match self {
            ValidationMode::Strict => Ok(Arc::new(Strict)),
            ValidationMode::BestEffort => Ok(Arc::new(BestEffort)),
            ValidationMode::RetryWithRepair => provider
                .map(|p| Arc::new(RetryWithRepair::new(p)) as Arc<dyn ValidationStrategy>)
                .ok_or_else(|| IevError::config("retry_with_repair validation requires an LLM provider")),
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Predicate = dyn Fn(&Record) -> bool + Send + Sync;

/// Named advisory predicate over a validated record
#[derive(Clone)]
pub struct ValidationRule {
    name: String,
    predicate: Arc<Predicate>,
}

impl ValidationRule {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, record: &Record) -> bool {
        (self.predicate)(record)
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_check() {
        let rule = ValidationRule::new("short timeline is disruptive", |r: &Record| {
            r.get("timeline_months").and_then(|v| v.as_i64()).unwrap_or(0) < 24
        });
        let record = json!({"timeline_months": 18}).as_object().cloned().unwrap();
        assert!(rule.check(&record));
        assert_eq!(rule.name(), "short timeline is disruptive");
        assert!(format!("{:?}", rule).contains("short timeline"));
    }

    #[test]
    fn test_mode_from_yaml() {
        let mode: ValidationMode = serde_yaml::from_str("best_effort").unwrap();
        assert_eq!(mode, ValidationMode::BestEffort);
        let mode: ValidationMode = serde_yaml::from_str("retry").unwrap();
        assert_eq!(mode, ValidationMode::RetryWithRepair);
        assert_eq!(ValidationMode::default().to_string(), "strict");
    }

    #[test]
    fn test_mode_builds_strategy() {
        assert_eq!(ValidationMode::Strict.strategy(None).unwrap().name(), "strict");
        assert_eq!(ValidationMode::BestEffort.strategy(None).unwrap().name(), "best-effort");
        assert!(matches!(
            ValidationMode::RetryWithRepair.strategy(None),
            Err(IevError::Config(_))
        ));

        let provider: Arc<dyn LlmProvider> =
            Arc::new(crate::node::testing::ScriptedProvider::new(vec![]));
        let strategy = ValidationMode::RetryWithRepair.strategy(Some(provider)).unwrap();
        assert_eq!(strategy.name(), "retry-with-repair");
    }
}
