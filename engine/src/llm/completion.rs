//! Completion client
//!
//! Wraps an [`LLMProvider`] with the formatting directive every request
//! carries and an exponential backoff retry policy with jitter. Stateless
//! apart from the provider it holds.

use rand::Rng;
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LLMProvider, Message};
use crate::config::RetryConfig;

/// Appended to the first message of every outbound request.
pub const JSON_DIRECTIVE: &str = " Reply in JSON mode only and do not return base64.";

/// Exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(40),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Upper bound of the wait after the given failed attempt (1-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }

    /// Jittered wait after the given failed attempt, within `[min_delay, ceiling]`
    pub fn delay(&self, attempt: u32) -> Duration {
        let low = self.min_delay.as_millis() as u64;
        let high = self.ceiling(attempt).as_millis() as u64;
        let millis = rand::thread_rng().gen_range(low..=high);
        Duration::from_millis(millis)
    }
}

/// Completion client with retry
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn LLMProvider>,
    policy: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Request a completion for the given conversation
    ///
    /// The directive is appended to an outbound copy of the first message;
    /// the caller's messages are left untouched. Every provider failure is
    /// retried until `max_attempts` is exhausted, then reported as
    /// [`EngineError::Transport`] carrying the last cause.
    pub async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f32,
    ) -> Result<String, EngineError> {
        let mut outbound = messages.to_vec();
        if let Some(first) = outbound.first_mut() {
            first.content.push_str(JSON_DIRECTIVE);
        }

        let attempts = self.policy.max_attempts.max(1);
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            match self.provider.chat(&outbound, model, temperature).await {
                Ok(text) => {
                    debug!(
                        provider = self.provider.name(),
                        attempt, "Completion succeeded"
                    );
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        max_attempts = attempts,
                        "Completion attempt failed: {}",
                        e
                    );
                    last_cause = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
            }
        }

        Err(EngineError::Transport {
            attempts,
            cause: last_cause,
        })
    }
}
