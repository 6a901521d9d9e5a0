//! OpenAI-compatible chat completion provider

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{LLMError, LLMProvider, Message};
use crate::config::OpenAIConfig;

pub struct OpenAIProvider {
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
    client: Client,
}

impl OpenAIProvider {
    /// Create a provider with an explicit key
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            organization: None,
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create a provider from config, reading the key and organization from
    /// the configured environment variables
    pub fn from_config(config: &OpenAIConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        let organization = std::env::var(&config.organization_env)
            .ok()
            .filter(|o| !o.is_empty());

        Self {
            organization,
            ..Self::new(&config.base_url, api_key)
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f32,
    ) -> super::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LLMError::AuthenticationFailed("API key not set".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);

        let api_messages: Vec<_> = messages
            .iter()
            .map(|msg| match &msg.name {
                Some(name) => json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                    "name": name,
                }),
                None => json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                }),
            })
            .collect();

        let payload = json!({
            "model": model,
            "messages": api_messages,
            "temperature": temperature,
        });

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.json(&payload).send().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::NetworkError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))
    }
}
