// SPDX-License-Identifier: MIT

//! Pipeline module - configuration-driven IEV workflows
//!
//! This module provides:
//! - `PipelineConfig` - YAML pipeline definition with defaults
//! - `PipelineLoader` - file and string loading with validation
//! - `PipelineBuilder` - the canonical intelligence -> extraction -> validation workflow

mod builder;
mod config;
mod loader;

pub use builder::{create_provider, PipelineBuilder, EXTRACTION_NODE, INTELLIGENCE_NODE, VALIDATION_NODE};
pub use config::{
    validate_base_url, ExtractionConfig, IntelligenceConfig, ModelConfig, PipelineConfig, TimeoutConfig,
    ValidationConfig, DEFAULT_EXTRACTION_PROMPT, DEFAULT_INTELLIGENCE_PROMPT, DEFAULT_MODEL,
};
pub use loader::PipelineLoader;
