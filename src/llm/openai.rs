// SPDX-License-Identifier: MIT

//! OpenAI Provider - chat completions API implementation

use super::{LlmProvider, Message};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::env;

const PROVIDER: &str = "openai";

/// OpenAI-compatible chat completions backend
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAIProvider
    ///
    /// Requires `OPENAI_API_KEY` environment variable to be set.
    /// Optionally uses `OPENAI_BASE_URL` for custom endpoints.
    pub fn new(model_name: String) -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::ApiKeyMissing(PROVIDER.to_string()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self::with_parts(api_key, model_name, base_url))
    }

    /// Create a provider from explicit settings
    pub fn with_parts(api_key: String, model_name: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn request_body(&self, messages: &[Message], temperature: f32) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        json!({
            "model": self.model_name,
            "messages": messages,
            "temperature": temperature,
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            let text = resp.text().await?;
            return Err(ProviderError::Unavailable(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                message: text,
            });
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("OpenAI response: {}", resp_json);
        Ok(resp_json)
    }

    /// Pull the assistant text out of a chat completions response
    fn parse_response_text(response: &Value) -> Result<String, ProviderError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        choice["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("Choice has no text content".into()))
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let body = self.request_body(messages, temperature);
        let response = self.post(&body).await?;
        Self::parse_response_text(&response)
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let mut body = self.request_body(messages, 0.0);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "extraction",
                "schema": schema,
            }
        });

        let response = self.post(&body).await?;
        let text = Self::parse_response_text(&response)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) if value.is_object() => Ok(Some(value)),
            _ => {
                log::warn!("OpenAI structured output was not a JSON object");
                Ok(None)
            }
        }
    }

    fn supports_structured_output(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::with_parts(
            "key".to_string(),
            "gpt-4o-mini".to_string(),
            "http://localhost:9/v1/".to_string(),
        )
    }

    #[test]
    fn test_request_body() {
        let body = provider().request_body(
            &[Message::system("You are helpful"), Message::user("Hello")],
            0.7,
        );
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider().base_url, "http://localhost:9/v1");
    }

    #[test]
    fn test_parse_text_response() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello, how can I help?"
                }
            }]
        });

        let text = OpenAIProvider::parse_response_text(&response).unwrap();
        assert_eq!(text, "Hello, how can I help?");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let result = OpenAIProvider::parse_response_text(&json!({"choices": []}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert!(provider().supports_structured_output());
    }
}
