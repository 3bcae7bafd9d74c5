// SPDX-License-Identifier: MIT

//! YAML schema types for IEV pipeline definitions
//!
//! Everything except `name` and `schema` has a default, so a minimal file is
//! a name plus a field list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use url::Url;

use crate::error::IevError;
use crate::node::{EXTRACTION_TEMPERATURE, INTELLIGENCE_TEMPERATURE};
use crate::prompt::PromptTemplate;
use crate::repair::{RepairKind, DEFAULT_REPAIR_TIMEOUT};
use crate::schema::OutputSchema;
use crate::validation::{ValidationMode, DEFAULT_MAX_ATTEMPTS};
use crate::workflow::InvokeOptions;

/// Model used when neither the file nor `IEV_MODEL` names one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_INTELLIGENCE_PROMPT: &str = "Analyze the following event and describe its likely \
impact, the actors involved and the expected timeline.\n\nEvent: {event}";

pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract the requested fields from this analysis.\n\n\
Analysis:\n{analysis}";

/// Top-level pipeline definition
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub intelligence: IntelligenceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Ordered list of output fields
    pub schema: OutputSchema,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Model configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ModelConfig {
    /// Only "openai" (any OpenAI-compatible endpoint) is built in
    pub provider: Option<String>,
    pub model_name: Option<String>,
    /// Overrides `OPENAI_BASE_URL`
    pub base_url: Option<String>,
}

impl ModelConfig {
    /// File value, then `IEV_MODEL`, then [`DEFAULT_MODEL`]
    pub fn resolve_model_name(&self) -> String {
        self.model_name
            .clone()
            .or_else(|| env::var("IEV_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("openai")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IntelligenceConfig {
    #[serde(default = "default_intelligence_prompt")]
    pub prompt: PromptTemplate,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default = "default_intelligence_temperature")]
    pub temperature: f32,
    /// Cache fabric key that overrides `prompt` when set
    #[serde(default)]
    pub template_key: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            prompt: default_intelligence_prompt(),
            system_message: None,
            temperature: default_intelligence_temperature(),
            template_key: None,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_prompt")]
    pub prompt: PromptTemplate,
    #[serde(default = "default_extraction_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub template_key: Option<String>,
    /// Repair chain in the order it is tried
    #[serde(default = "RepairKind::default_chain")]
    pub repair: Vec<RepairKind>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            prompt: default_extraction_prompt(),
            temperature: default_extraction_temperature(),
            template_key: None,
            repair: RepairKind::default_chain(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
    #[serde(default = "default_true")]
    pub repair_on_fail: bool,
    /// Round-trips allowed in retry_with_repair mode
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            repair_on_fail: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// All values in seconds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutConfig {
    /// Whole-invocation deadline, checked between nodes
    #[serde(default)]
    pub invocation_secs: Option<u64>,
    /// Per completion call made by the intelligence and extraction nodes
    #[serde(default)]
    pub llm_call_secs: Option<u64>,
    /// Per repair call (LLM repair and retry-with-repair)
    #[serde(default = "default_repair_secs")]
    pub repair_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            invocation_secs: None,
            llm_call_secs: None,
            repair_secs: default_repair_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn invocation(&self) -> Option<Duration> {
        self.invocation_secs.map(Duration::from_secs)
    }

    pub fn llm_call(&self) -> Option<Duration> {
        self.llm_call_secs.map(Duration::from_secs)
    }

    pub fn repair(&self) -> Duration {
        Duration::from_secs(self.repair_secs)
    }
}

fn default_intelligence_prompt() -> PromptTemplate {
    PromptTemplate::new(DEFAULT_INTELLIGENCE_PROMPT)
}

fn default_extraction_prompt() -> PromptTemplate {
    PromptTemplate::new(DEFAULT_EXTRACTION_PROMPT)
}

fn default_intelligence_temperature() -> f32 {
    INTELLIGENCE_TEMPERATURE
}

fn default_extraction_temperature() -> f32 {
    EXTRACTION_TEMPERATURE
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_repair_secs() -> u64 {
    DEFAULT_REPAIR_TIMEOUT.as_secs()
}

impl PipelineConfig {
    /// Invocation options carrying the configured deadline
    pub fn invoke_options(&self) -> InvokeOptions {
        let options = InvokeOptions::new();
        match self.timeouts.invocation() {
            Some(limit) => options.with_timeout(limit),
            None => options,
        }
    }

    /// Check the values serde cannot check on its own
    pub fn validate(&self) -> Result<(), IevError> {
        if self.name.trim().is_empty() {
            return Err(IevError::config("pipeline name must not be empty"));
        }
        if self.schema.is_empty() {
            return Err(IevError::config(format!(
                "pipeline '{}' declares no schema fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in self.schema.fields() {
            if !seen.insert(field.name.as_str()) {
                return Err(IevError::config(format!("duplicate schema field '{}'", field.name)));
            }
            if let (Some(min), Some(max)) = (field.min, field.max) {
                if min > max {
                    return Err(IevError::config(format!(
                        "field '{}' has min {} above max {}",
                        field.name, min, max
                    )));
                }
            }
        }

        for (stage, temperature) in [
            ("intelligence", self.intelligence.temperature),
            ("extraction", self.extraction.temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(IevError::config(format!(
                    "{} temperature {} is outside 0.0..=2.0",
                    stage, temperature
                )));
            }
        }

        let mut kinds = HashSet::new();
        if let Some(dup) = self.extraction.repair.iter().find(|k| !kinds.insert(**k)) {
            return Err(IevError::config(format!("repair strategy {:?} listed twice", dup)));
        }

        if self.validation.max_attempts == 0 {
            return Err(IevError::config("validation.max_attempts must be at least 1"));
        }

        if let Some(base_url) = &self.model.base_url {
            validate_base_url(base_url)?;
        }

        if self.model.provider_name() != "openai" {
            return Err(IevError::config(format!(
                "unsupported model provider '{}'",
                self.model.provider_name()
            )));
        }

        Ok(())
    }
}

/// Reject anything that is not an absolute http(s) URL
pub fn validate_base_url(raw: &str) -> Result<Url, IevError> {
    let url = Url::parse(raw).map_err(|e| IevError::config(format!("invalid base_url '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(IevError::config(format!(
            "base_url '{}' must use http or https, not {}",
            raw, other
        ))),
    }
}
