//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for chat-completion providers
//! (OpenAI-compatible endpoints and Ollama). The LLMProvider trait is the raw
//! transport; `completion::CompletionClient` wraps it with the formatting
//! directive and the retry policy the step engine relies on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::LLMConfig;
use sdk::errors::EngineError;

pub mod completion;
pub mod ollama;
pub mod openai;

pub use completion::{CompletionClient, RetryPolicy};

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
///
/// Every variant is treated as transient by the completion client.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation history
///
/// Equality is structural over role, content and name. The chat context
/// relies on this to detect repeated turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Ability name for function messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new function result message tagged with the ability name
    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Ability result message
    Function,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Function => write!(f, "function"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider
    fn is_local(&self) -> bool;

    /// Send one chat-completion request and return the assistant text
    ///
    /// A call either returns the complete reply or fails; no partial output
    /// is exposed.
    async fn chat(&self, messages: &[Message], model: &str, temperature: f32) -> Result<String>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the provider named by `default_provider`
pub fn provider_from_config(
    config: &LLMConfig,
) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    match config.default_provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAIProvider::from_config(&config.openai))),
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
        ))),
        other => Err(EngineError::Config(format!("Unknown provider: {}", other))),
    }
}

/// Locate the JSON object in a model reply.
///
/// Handles:
/// 1. Raw JSON: the whole reply is an object
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. An object embedded in prose, found by brace matching
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        let inner = inner.trim();
        if inner.starts_with('{') {
            return Some(inner);
        }
    }

    let pos = trimmed.find('{')?;
    extract_balanced_json(&trimmed[pos..])
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");
        assert_eq!(user_msg.name, None);

        let system_msg = Message::system("You are a helpful assistant");
        assert_eq!(system_msg.role, MessageRole::System);

        let fn_msg = Message::function("read_file", "contents");
        assert_eq!(fn_msg.role, MessageRole::Function);
        assert_eq!(fn_msg.name.as_deref(), Some("read_file"));
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = crate::config::Config::default_config().llm;

        config.default_provider = "ollama".to_string();
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());

        config.default_provider = "carrier-pigeon".to_string();
        assert!(matches!(
            provider_from_config(&config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_message_equality_includes_name() {
        assert_eq!(Message::user("a"), Message::user("a"));
        assert_ne!(Message::user("a"), Message::system("a"));
        assert_ne!(
            Message::function("read_file", "x"),
            Message::function("list_files", "x")
        );
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::function("finish", "done");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"function""#));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);

        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("name"));
    }

    #[test]
    fn test_extract_raw_json() {
        let reply = r#"  {"thoughts": {"speak": "hi"}}  "#;
        assert_eq!(
            extract_json_object(reply),
            Some(r#"{"thoughts": {"speak": "hi"}}"#)
        );
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_text() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\nLet me know.";
        assert_eq!(extract_json_object(reply), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_embedded_json() {
        let reply = r#"Sure thing {"a": "brace } in string", "b": {"c": 2}} trailing"#;
        assert_eq!(
            extract_json_object(reply),
            Some(r#"{"a": "brace } in string", "b": {"c": 2}}"#)
        );
    }

    #[test]
    fn test_extract_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{ unterminated"), None);
    }
}
