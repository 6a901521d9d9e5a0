//! Step executor
//!
//! One invocation is one turn of a task: ask the model what to do next,
//! validate the reply, dispatch the requested abilities and fold the results
//! back into the chat context.
//!
//! Every path ends with the step persisted in a defined state:
//!
//! - completion failed: `error`
//! - reply missing required keys: `created`, corrective message appended
//! - reply names no abilities: `created`
//! - abilities dispatched: `completed`, `is_last` when the terminal ability ran
//! - anything unexpected: `completed`, not last, apology appended

use chrono::Local;
use sdk::ability::AbilityContext;
use sdk::errors::{EngineError, ForgeErrorExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::chat_context::ChatContext;
use super::reply::AgentReply;
use crate::abilities::AbilityRegistry;
use crate::db::{store_error, Step, StepRequestBody, StepStatus, TaskStore};
use crate::llm::{CompletionClient, Message};
use crate::prompts::{PromptTemplateSource, SYSTEM_FORMAT};

const APOLOGY: &str =
    "Something went wrong with processing on our end. Please reformat your reply and try again.";

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Key under which a step records the calls the model requested
///
/// The executor owns this key in `additional_input`; any other caller-supplied
/// keys are kept as sent.
pub const STEP_ABILITIES_KEY: &str = "requested_abilities";

/// Model settings for step completions
#[derive(Debug, Clone)]
pub struct StepSettings {
    pub model: String,
    pub temperature: f32,
    pub terminal_ability: String,
}

pub struct StepExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<AbilityRegistry>,
    client: CompletionClient,
    abilities: AbilityContext,
    settings: StepSettings,
    reformat_notice: String,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<AbilityRegistry>,
        client: CompletionClient,
        abilities: AbilityContext,
        prompts: &dyn PromptTemplateSource,
        settings: StepSettings,
    ) -> Result<Self, EngineError> {
        let format = prompts.load(SYSTEM_FORMAT, &serde_json::json!({}))?;
        Ok(Self {
            store,
            registry,
            client,
            abilities,
            settings,
            reformat_notice: format!("Your reply was not in the given JSON format.\n{}", format),
        })
    }

    /// Run one step of a task against its locked chat context
    ///
    /// Only store failures are returned as errors; every other outcome is
    /// recorded on the returned step.
    pub async fn execute(
        &self,
        task_id: &str,
        request: &StepRequestBody,
        context: &mut ChatContext,
    ) -> Result<Step, EngineError> {
        let mut step = self
            .store
            .create_step(task_id, request, false)
            .await
            .map_err(store_error)?;
        let number = context.next_step();
        info!(task_id, step = number, "Executing step {}", step.step_id);

        if let Err(e) = self.run_turn(&mut step, context).await {
            error!(task_id, "Step {} failed unexpectedly: {}", step.step_id, e);
            step.status = StepStatus::Completed;
            step.is_last = false;
            context.append(Message::system(format!("{}\n{}", APOLOGY, e)));
        }

        self.store.update_step(&step).await.map_err(store_error)?;
        info!(
            task_id,
            step = number,
            status = step.status.as_str(),
            is_last = step.is_last,
            "Step finished"
        );

        if step.is_last {
            match serde_json::to_string_pretty(context.messages()) {
                Ok(history) => info!(task_id, "Final chat history:\n{}", history),
                Err(e) => warn!(task_id, "Could not render chat history: {}", e),
            }
        }

        let stored = self
            .store
            .get_step(task_id, &step.step_id)
            .await
            .map_err(store_error)?;
        Ok(stored.unwrap_or(step))
    }

    async fn run_turn(&self, step: &mut Step, context: &mut ChatContext) -> Result<(), EngineError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

        let raw = match self
            .client
            .complete(context.messages(), &self.settings.model, self.settings.temperature)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(task_id = %step.task_id, "Completion failed: {}", e);
                step.status = StepStatus::Error;
                step.output = Some(e.user_hint().to_string());
                return Ok(());
            }
        };
        debug!(task_id = %step.task_id, "Model reply:\n{}", raw);

        let reply = match AgentReply::parse(&raw) {
            Ok(reply) => reply,
            Err(e) if e.is_schema_error() => {
                warn!(task_id = %step.task_id, "Malformed reply: {}", e);
                context.append(Message::system(self.reformat_notice.clone()));
                return Ok(());
            }
            Err(e) => return Err(EngineError::MalformedResponse(e.to_string())),
        };

        step.output = Some(reply.thoughts.speak.clone());
        let requested = serde_json::to_value(&reply.commands)
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
        step.additional_input
            .insert(STEP_ABILITIES_KEY.to_string(), requested);

        let calls: Vec<_> = reply
            .commands
            .iter()
            .filter(|c| !c.is_placeholder())
            .collect();
        if calls.is_empty() {
            debug!(task_id = %step.task_id, "Reply requested no abilities");
            return Ok(());
        }

        step.status = StepStatus::Running;
        self.store.update_step(step).await.map_err(store_error)?;

        let ctx = self.abilities.for_step(step.step_id.clone());
        for call in calls {
            info!(task_id = %step.task_id, ability = %call.name, "Running ability");

            match self
                .registry
                .dispatch(&ctx, &step.task_id, &call.name, call.args.clone())
                .await
            {
                Ok(output) => {
                    let output = output.into_text();
                    debug!(ability = %call.name, "Ability output:\n{}", output);
                    let content = match &call.args {
                        Some(args) => {
                            format!("[Arguments {}]: {}", Value::Object(args.clone()), output)
                        }
                        None => output,
                    };
                    context.append(Message::function(call.name.as_str(), content));

                    if call.name == self.settings.terminal_ability {
                        step.is_last = true;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(task_id = %step.task_id, ability = %call.name, "Ability failed: {}", e);
                    context.append(Message::system(format!(
                        "[{}] Ability {} failed to run: {}",
                        timestamp,
                        call.name,
                        failure_reason(&e)
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        step.status = StepStatus::Completed;
        Ok(())
    }
}

fn failure_reason(err: &EngineError) -> String {
    match err {
        EngineError::AbilityExecution { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
