//! Planning stage
//!
//! Turns a goal into a numbered textual plan with one completion call. The
//! plan is opaque prose and is embedded into the seed instructions as is.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::{CompletionClient, Message};
use crate::prompts::{PromptTemplateSource, ABILITIES_LIST, GET_STEPS};
use sdk::errors::EngineError;

const PLANNING_TEMPERATURE: f32 = 0.0;

pub struct Planner {
    client: CompletionClient,
    prompts: Arc<dyn PromptTemplateSource>,
    model: String,
    attempts: u32,
}

impl Planner {
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

    /// Request a plan for `goal` given the ability catalog lines
    pub async fn create_plan(&self, goal: &str, catalog: &[String]) -> Result<String, EngineError> {
        let messages = vec![
            Message::system(
                self.prompts
                    .load(ABILITIES_LIST, &json!({ "abilities": catalog }))?,
            ),
            Message::system("You are a professional Project Manager."),
            Message::system(self.prompts.load(GET_STEPS, &json!({ "task": goal }))?),
        ];

        let plan = self
            .client
            .complete(&messages, &self.model, PLANNING_TEMPERATURE)
            .await?;
        Ok(plan.trim().to_string())
    }

    /// Plan with bounded retries, falling back to [`Planner::default_plan`]
    pub async fn plan_or_fallback(&self, goal: &str, catalog: &[String]) -> String {
        for attempt in 1..=self.attempts {
            match self.create_plan(goal, catalog).await {
                Ok(plan) if !plan.is_empty() => {
                    info!("Plan created on attempt {}", attempt);
                    return plan;
                }
                Ok(_) => warn!(attempt, "Planner returned an empty plan"),
                Err(e) => warn!(attempt, "Planning failed: {}", e),
            }
        }

        warn!("Planning gave up after {} attempts, using default plan", self.attempts);
        Self::default_plan(goal)
    }

    /// Plan used when the planner cannot produce one
    pub fn default_plan(goal: &str) -> String {
        format!(
            "1. Work out what is needed to accomplish: {}\n2. Use the available abilities to do it\n3. Call the finish ability with a summary",
            goal
        )
    }
}
