// SPDX-License-Identifier: MIT

//! LLM provider boundary
//!
//! This module provides the core `LlmProvider` trait and shared message types.
//! Concrete backends live in their own submodules:
//! - [openai] - OpenAI-compatible chat completions API

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ProviderError;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Core trait for completion backends
///
/// Implementations must be safe to share across concurrent workflow
/// invocations. Transport-level retries, API keys and model selection are the
/// provider's concern.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name used in logs and errors
    fn name(&self) -> &str;

    /// Issue a completion for the message history
    async fn complete(&self, messages: &[Message], temperature: f32)
        -> Result<String, ProviderError>;

    /// Ask for output constrained to a JSON schema
    ///
    /// Returns `Ok(None)` when the backend cannot honour the request.
    async fn complete_structured(
        &self,
        _messages: &[Message],
        _schema: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        Ok(None)
    }

    /// Whether `complete_structured` is natively supported
    fn supports_structured_output(&self) -> bool {
        false
    }
}

/// Run a completion with an optional per-call deadline
pub async fn complete_within(
    provider: &dyn LlmProvider,
    messages: &[Message],
    temperature: f32,
    timeout: Option<Duration>,
) -> Result<String, ProviderError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, provider.complete(messages, temperature))
            .await
            .map_err(|_| ProviderError::Timeout(limit.as_millis() as u64))?,
        None => provider.complete(messages, temperature).await,
    }
}

/// Structured counterpart of [`complete_within`]
pub async fn complete_structured_within(
    provider: &dyn LlmProvider,
    messages: &[Message],
    schema: &Value,
    timeout: Option<Duration>,
) -> Result<Option<Value>, ProviderError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, provider.complete_structured(messages, schema))
            .await
            .map_err(|_| ProviderError::Timeout(limit.as_millis() as u64))?,
        None => provider.complete_structured(messages, schema).await,
    }
}
