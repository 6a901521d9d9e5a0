//! Persona generation
//!
//! Asks the model which expert should work on a task. Replies are parsed as
//! `{name, expertise}`; after the configured number of failed attempts the
//! default persona is used.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{extract_json_object, CompletionClient, Message};
use crate::prompts::{PromptTemplateSource, ROLE_SELECTION};
use sdk::errors::EngineError;

const PERSONA_TEMPERATURE: f32 = 0.6;

const PERSONA_FORMAT: &str = r#"Reply only in JSON in the following format: {"name": "name of the expert", "expertise": "area of expertise"}"#;

/// Role the model plays for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub expertise: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Joe Anybody".to_string(),
            expertise: "Project Manager".to_string(),
        }
    }
}

impl Persona {
    /// Parse a model reply; the JSON may be fenced or wrapped in prose
    pub fn parse(raw: &str) -> Option<Self> {
        let persona: Persona = serde_json::from_str(extract_json_object(raw)?).ok()?;
        if persona.name.trim().is_empty() || persona.expertise.trim().is_empty() {
            return None;
        }
        Some(persona)
    }
}

pub struct PersonaGenerator {
    client: CompletionClient,
    prompts: Arc<dyn PromptTemplateSource>,
    model: String,
    attempts: u32,
}

impl PersonaGenerator {
    pub fn new(
        client: CompletionClient,
        prompts: Arc<dyn PromptTemplateSource>,
        model: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            client,
            prompts,
            model: model.into(),
            attempts,
        }
    }

    fn messages(&self, task: &str) -> Result<Vec<Message>, EngineError> {
        Ok(vec![
            Message::system(PERSONA_FORMAT),
            Message::system("You are a professional HR Specialist"),
            Message::user(self.prompts.load(ROLE_SELECTION, &json!({ "task": task }))?),
        ])
    }

    /// Pick a persona for the task
    ///
    /// Only a template failure is an error; completion and parse failures use
    /// up attempts and end in the default persona.
    pub async fn generate(&self, task: &str) -> Result<Persona, EngineError> {
        let messages = self.messages(task)?;

        for attempt in 1..=self.attempts {
            match self
                .client
                .complete(&messages, &self.model, PERSONA_TEMPERATURE)
                .await
            {
                Ok(reply) => match Persona::parse(&reply) {
                    Some(persona) => {
                        info!("Persona: {} ({})", persona.name, persona.expertise);
                        return Ok(persona);
                    }
                    None => debug!(attempt, "Persona reply did not parse: {}", reply),
                },
                Err(e) => warn!(attempt, "Persona request failed: {}", e),
            }
        }

        let persona = Persona::default();
        warn!(
            "No persona after {} attempts, using {}",
            self.attempts, persona.name
        );
        Ok(persona)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMError, LLMProvider, RetryPolicy};
    use crate::prompts::PromptEngine;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Replies(Mutex<Vec<String>>);

    #[async_trait]
    impl LLMProvider for Replies {
        fn name(&self) -> &str {
            "replies"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _model: &str,
            _temperature: f32,
        ) -> crate::llm::Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return Err(LLMError::ProviderUnavailable("no more replies".to_string()));
            }
            Ok(replies.remove(0))
        }
    }

    fn generator(replies: &[&str], attempts: u32) -> PersonaGenerator {
        let provider = Arc::new(Replies(Mutex::new(
            replies.iter().map(|r| r.to_string()).collect(),
        )));
        let policy = RetryPolicy {
            max_attempts: 1,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        PersonaGenerator::new(
            CompletionClient::new(provider, policy),
            Arc::new(PromptEngine::new().unwrap()),
            "test-model",
            attempts,
        )
    }

    #[test]
    fn test_parse_fenced() {
        let persona =
            Persona::parse("```json\n{\"name\": \"Ada\", \"expertise\": \"Python\"}\n```").unwrap();
        assert_eq!(persona.name, "Ada");
        assert!(Persona::parse("{\"name\": \"\", \"expertise\": \"x\"}").is_none());
        assert!(Persona::parse("no json").is_none());
    }

    #[tokio::test]
    async fn test_generate_retries_until_parsed() {
        let generator = generator(
            &["not json", r#"{"name": "Ada Lovelace", "expertise": "Mathematics"}"#],
            3,
        );
        let persona = generator.generate("compute").await.unwrap();
        assert_eq!(persona.name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_generate_falls_back_after_bound() {
        let generator = generator(&["nope", "still nope", "{}"], 2);
        assert_eq!(generator.generate("task").await.unwrap(), Persona::default());
    }
}
