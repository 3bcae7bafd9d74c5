// SPDX-License-Identifier: MIT

//! Pipeline builder - turns a `PipelineConfig` into the three-node
//! intelligence -> extraction -> validation workflow

use std::env;
use std::sync::Arc;

use super::config::{validate_base_url, ModelConfig, PipelineConfig};
use crate::error::IevError;
use crate::fabric::CacheFabric;
use crate::llm::openai::OpenAIProvider;
use crate::llm::LlmProvider;
use crate::node::{ExtractionNode, IntelligenceNode, Node, ValidationNode};
use crate::validation::{RetryWithRepair, ValidationMode, ValidationRule, ValidationStrategy};
use crate::workflow::Workflow;

pub const INTELLIGENCE_NODE: &str = "intelligence";
pub const EXTRACTION_NODE: &str = "extraction";
pub const VALIDATION_NODE: &str = "validation";

/// Builds an IEV workflow from configuration
pub struct PipelineBuilder {
    config: PipelineConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    rules: Vec<ValidationRule>,
    fabric: Option<Arc<dyn CacheFabric>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            provider: None,
            rules: Vec::new(),
            fabric: None,
        }
    }

    /// Use this provider instead of one built from the model section
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
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

    pub fn with_fabric(mut self, fabric: Arc<dyn CacheFabric>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn build(self) -> Result<Workflow, IevError> {
        self.config.validate()?;
        let provider = match self.provider {
            Some(provider) => provider,
            None => create_provider(&self.config.model)?,
        };
        let config = &self.config;
        let repair_timeout = Some(config.timeouts.repair());

        let mut intelligence = IntelligenceNode::new(
            INTELLIGENCE_NODE,
            provider.clone(),
            config.intelligence.prompt.clone(),
        )
        .with_temperature(config.intelligence.temperature)
        .with_max_retries(config.intelligence.max_retries)
        .with_call_timeout(config.timeouts.llm_call());
        if let Some(message) = &config.intelligence.system_message {
            intelligence = intelligence.with_system_message(message.clone());
        }
        if let Some(key) = &config.intelligence.template_key {
            intelligence = intelligence.with_template_key(key.clone());
        }

        let strategies = config
            .extraction
            .repair
            .iter()
            .map(|kind| kind.build(&provider, repair_timeout))
            .collect();
        let mut extraction = ExtractionNode::new(
            EXTRACTION_NODE,
            provider.clone(),
            config.extraction.prompt.clone(),
            config.schema.clone(),
        )
        .with_temperature(config.extraction.temperature)
        .with_strategies(strategies)
        .with_call_timeout(config.timeouts.llm_call());
        if let Some(key) = &config.extraction.template_key {
            extraction = extraction.with_template_key(key.clone());
        }

        let strategy: Arc<dyn ValidationStrategy> = match config.validation.mode {
            ValidationMode::RetryWithRepair => Arc::new(
                RetryWithRepair::new(provider.clone())
                    .with_max_attempts(config.validation.max_attempts)
                    .with_timeout(repair_timeout),
            ),
            mode => mode.strategy(Some(provider.clone()))?,
        };
        let validation = ValidationNode::new(VALIDATION_NODE, config.schema.clone())
            .with_strategy(strategy)
            .with_repair_on_fail(config.validation.repair_on_fail)
            .with_rules(self.rules);

        let nodes: Vec<Arc<dyn Node>> = vec![
            Arc::new(intelligence),
            Arc::new(extraction),
            Arc::new(validation),
        ];
        let workflow = Workflow::new(
            config.name.clone(),
            nodes,
            [
                (INTELLIGENCE_NODE, EXTRACTION_NODE),
                (EXTRACTION_NODE, VALIDATION_NODE),
            ],
        )?;

        Ok(match self.fabric {
            Some(fabric) => workflow.with_fabric(fabric),
            None => workflow,
        })
    }
}

/// Provider for the model section, reading credentials from the environment
pub fn create_provider(model: &ModelConfig) -> Result<Arc<dyn LlmProvider>, IevError> {
    let model_name = model.resolve_model_name();
    match model.provider_name() {
        "openai" => {}
        other => return Err(IevError::config(format!("unsupported model provider '{}'", other))),
    }

    let base_url = match &model.base_url {
        Some(url) => Some(url.clone()),
        None => env::var("OPENAI_BASE_URL").ok(),
    };
    log::debug!("Using provider 'openai' with model '{}'", model_name);

    let provider = match base_url {
        Some(url) => {
            validate_base_url(&url)?;
            let api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| IevError::config("OPENAI_API_KEY is not set"))?;
            OpenAIProvider::with_parts(api_key, model_name, url)
        }
        None => OpenAIProvider::new(model_name).map_err(|e| IevError::config(e.to_string()))?,
    };
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::ScriptedProvider;
    use crate::pipeline::PipelineLoader;
    use crate::state::State;
    use serde_json::json;

    const YAML: &str = r#"
name: patents
schema:
  - name: timeline_months
    type: integer
    min: 1
    max: 60
  - name: disruption_score
    type: float
    min: 0
    max: 10
validation:
  mode: best_effort
"#;

    #[test]
    fn test_build_topology() {
        let config = PipelineLoader::parse_yaml(YAML).unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let workflow = PipelineBuilder::new(config)
            .with_provider(provider)
            .build()
            .unwrap();

        assert_eq!(workflow.name(), "patents");
        assert_eq!(
            workflow.topology().order(),
            &["intelligence", "extraction", "validation"].map(String::from)
        );
        assert_eq!(workflow.topology().entry(), INTELLIGENCE_NODE);
        assert!(workflow.node(VALIDATION_NODE).is_some());
    }

    #[test]
    fn test_retry_mode_uses_provider() {
        let mut config = PipelineLoader::parse_yaml(YAML).unwrap();
        config.validation.mode = ValidationMode::RetryWithRepair;
        let built = PipelineBuilder::new(config)
            .with_provider(Arc::new(ScriptedProvider::new(vec![])))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineLoader::parse_yaml(YAML).unwrap();
        config.extraction.temperature = -1.0;
        let err = PipelineBuilder::new(config)
            .with_provider(Arc::new(ScriptedProvider::new(vec![])))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, IevError::Config(_)));
    }

    #[tokio::test]
    async fn test_built_pipeline_runs() {
        let config = PipelineLoader::parse_yaml(YAML).unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            "Broad claims, 18 months to market, highly disruptive.",
            r#"{"timeline_months": 150, "disruption_score": 8.5}"#,
        ]));
        let workflow = PipelineBuilder::new(config)
            .with_provider(provider.clone())
            .with_rule(ValidationRule::new("fast", |r| {
                r["timeline_months"].as_i64().unwrap_or(0) < 24
            }))
            .build()
            .unwrap();

        let input = State::new().with("event", json!("Patent X")).unwrap();
        let result = workflow.invoke(input).await.unwrap();

        assert_eq!(result.get("validated"), Some(&json!({"timeline_months": 60, "disruption_score": 8.5})));
        assert_eq!(provider.calls(), 2);
        let warnings: Vec<&str> = result.metrics.warnings().map(|(_, w)| w).collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("clamp")));
        assert!(warnings.contains(&"rule 'fast' not satisfied"));
    }
}
