// SPDX-License-Identifier: MIT

//! Pipeline loader - YAML file loading and parsing

use std::fs;
use std::path::Path;

use super::config::PipelineConfig;
use crate::error::IevError;

/// Loads pipeline definitions from YAML files
pub struct PipelineLoader;

impl PipelineLoader {
    /// Load and validate a pipeline definition from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, IevError> {
        let path = path.as_ref();
        log::debug!("Loading pipeline from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            IevError::config(format!("cannot read pipeline file {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&content)
    }

    /// Parse and validate a pipeline definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<PipelineConfig, IevError> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        log::info!(
            "Loaded pipeline '{}' with {} schema fields, {} validation",
            config.name,
            config.schema.fields().len(),
            config.validation.mode
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repair::RepairKind;
    use crate::schema::FieldType;
    use crate::validation::ValidationMode;
    use std::time::Duration;

    const PATENT_PIPELINE: &str = r#"
name: patent-disruption
description: "Estimate how disruptive a patent filing is"

model:
  model_name: gpt-4o
  base_url: http://localhost:8080/v1

intelligence:
  prompt: "Assess the market impact of this filing: {event}"
  system_message: "You are a technology analyst."
  temperature: 0.8
  template_key: prompts/patent-intelligence
  max_retries: 1

extraction:
  repair: [incremental, fallback]

schema:
  - name: timeline_months
    type: integer
    min: 1
    max: 60
  - name: disruption_score
    type: number
    min: 0
    max: 10
  - name: summary
    type: string
    required: false
    max_length: 280

validation:
  mode: best_effort

timeouts:
  invocation_secs: 120
  llm_call_secs: 45
"#;

    #[test]
    fn test_parse_full_pipeline() {
        let config = PipelineLoader::parse_yaml(PATENT_PIPELINE).unwrap();
        assert_eq!(config.name, "patent-disruption");
        assert_eq!(config.model.resolve_model_name(), "gpt-4o");
        assert_eq!(config.intelligence.temperature, 0.8);
        assert_eq!(config.intelligence.max_retries, 1);
        assert_eq!(
            config.intelligence.template_key.as_deref(),
            Some("prompts/patent-intelligence")
        );
        // Unset extraction values keep their defaults
        assert_eq!(config.extraction.temperature, 0.1);
        assert_eq!(config.extraction.repair, vec![RepairKind::Incremental, RepairKind::Regex]);

        let fields = config.schema.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "timeline_months");
        assert_eq!(fields[1].field_type, FieldType::Float);
        assert!(!fields[2].required);

        assert_eq!(config.validation.mode, ValidationMode::BestEffort);
        assert!(config.validation.repair_on_fail);
        assert_eq!(config.timeouts.invocation(), Some(Duration::from_secs(120)));
        assert_eq!(config.invoke_options().timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.timeouts.repair(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_minimal_pipeline() {
        let yaml = r#"
name: minimal
schema:
  - name: score
    type: float
"#;
        let config = PipelineLoader::parse_yaml(yaml).unwrap();
        assert_eq!(config.validation.mode, ValidationMode::Strict);
        assert_eq!(config.extraction.repair, RepairKind::default_chain());
        assert!(config.invoke_options().timeout.is_none());
    }

    #[test]
    fn test_invalid_yaml_is_serialization_error() {
        let err = PipelineLoader::parse_yaml("name: [unclosed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_semantic_errors_are_config_errors() {
        let yaml = r#"
name: bad-url
model:
  base_url: "not a url"
schema:
  - name: score
    type: float
"#;
        let err = PipelineLoader::parse_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineLoader::load("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
