//! Agent Core
//!
//! Entry point for task execution. `create_task` persists a task, prepares
//! its workspace and seeds the chat context:
//!
//! 1. Response-format instructions
//! 2. Ability catalog
//! 3. Persona statement
//! 4. Plan combined with the goal
//!
//! `execute_step` is then called repeatedly until a step comes back with
//! `is_last` set.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use sdk::ability::{AbilityContext, ArtifactHandle, ProcessHandle, WorkspaceHandle};
use sdk::errors::EngineError;

use super::chat_context::{ChatContext, ChatContextManager};
use super::executor::{StepExecutor, StepSettings};
use super::persona::PersonaGenerator;
use super::planner::Planner;
use crate::abilities::{default_registry, AbilityRegistry};
use crate::config::Config;
use crate::db::{
    store_error, Artifact, Step, StepRequestBody, StoreArtifacts, Task, TaskRequestBody,
    TaskStore,
};
use crate::llm::{CompletionClient, LLMProvider, Message, RetryPolicy};
use crate::prompts::{
    PromptEngine, PromptTemplateSource, ABILITIES_LIST, ROLE_STATEMENT, STEP_WORK, SYSTEM_FORMAT,
};
use crate::workspace::{LocalWorkspace, ProcessRunner};

/// Task orchestrator
pub struct Agent {
    store: Arc<dyn TaskStore>,
    workspace: Arc<LocalWorkspace>,
    registry: Arc<AbilityRegistry>,
    prompts: Arc<dyn PromptTemplateSource>,
    contexts: ChatContextManager,
    persona: PersonaGenerator,
    planner: Planner,
    executor: StepExecutor,
}

impl Agent {
    /// Create an agent with the built-in abilities
    pub fn new(
        config: &Config,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<Self, EngineError> {
        let registry = default_registry(Duration::from_secs(config.agent.ability_timeout_secs));
        Self::with_registry(config, store, provider, registry)
    }

    /// Create an agent with a caller-built ability registry
    pub fn with_registry(
        config: &Config,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn LLMProvider>,
        registry: AbilityRegistry,
    ) -> Result<Self, EngineError> {
        let prompts: Arc<dyn PromptTemplateSource> = Arc::new(PromptEngine::new()?);
        let client = CompletionClient::new(provider, RetryPolicy::from_config(&config.llm.retry));
        let workspace = Arc::new(LocalWorkspace::new(&config.core.workspace));
        let registry = Arc::new(registry);

        let shared_workspace: Arc<LocalWorkspace> = Arc::clone(&workspace);
        let runner = ProcessRunner::new(Duration::from_secs(config.agent.command_timeout_secs))
            .with_python(config.agent.python.as_str());
        let abilities = AbilityContext::new(
            WorkspaceHandle::new(shared_workspace),
            ArtifactHandle::new(Arc::new(StoreArtifacts::new(Arc::clone(&store)))),
            ProcessHandle::new(Arc::new(runner)),
        );

        let executor = StepExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            client.clone(),
            abilities,
            prompts.as_ref(),
            StepSettings {
                model: config.llm.model.clone(),
                temperature: config.llm.step_temperature,
                terminal_ability: config.agent.terminal_ability.clone(),
            },
        )?;

        let persona = PersonaGenerator::new(
            client.clone(),
            Arc::clone(&prompts),
            config.llm.persona_model(),
            config.agent.persona_attempts,
        );
        let planner = Planner::new(
            client,
            Arc::clone(&prompts),
            config.llm.planning_model(),
            config.agent.plan_attempts,
        );

        info!(
            "Agent ready with {} abilities, workspace {}",
            registry.len(),
            workspace.root().display()
        );

        Ok(Self {
            store,
            workspace,
            registry,
            prompts,
            contexts: ChatContextManager::new(),
            persona,
            planner,
            executor,
        })
    }

    pub fn registry(&self) -> &AbilityRegistry {
        &self.registry
    }

    /// Create a task and seed its chat context
    pub async fn create_task(&self, request: TaskRequestBody) -> Result<Task, EngineError> {
        let task = self
            .store
            .create_task(&request.input, &request.additional_input)
            .await
            .map_err(store_error)?;
        info!(task_id = %task.task_id, "Created task: {}", task.input);

        self.workspace.ensure_task_dir(&task.task_id).await?;

        let mut context = self.contexts.lock(&task.task_id).await;
        self.seed(&task.input, &mut context).await?;

        Ok(task)
    }

    async fn seed(&self, goal: &str, context: &mut ChatContext) -> Result<(), EngineError> {
        let catalog = self.registry.list_for_prompt();

        context.add_instruction(Message::system(
            self.prompts.load(SYSTEM_FORMAT, &json!({}))?,
        ));
        context.add_instruction(Message::system(
            self.prompts
                .load(ABILITIES_LIST, &json!({ "abilities": catalog }))?,
        ));

        let persona = self.persona.generate(goal).await?;
        context.add_instruction(Message::system(self.prompts.load(
            ROLE_STATEMENT,
            &json!({ "name": persona.name, "expertise": persona.expertise }),
        )?));
        context.set_persona(persona);

        let plan = self.planner.plan_or_fallback(goal, &catalog).await;
        debug!("Plan:\n{}", plan);
        context.add_instruction(Message::user(
            self.prompts
                .load(STEP_WORK, &json!({ "plan": plan, "task": goal }))?,
        ));

        Ok(())
    }

    /// Run the next step of a task
    ///
    /// A missing or empty request continues the task. Steps of the same task
    /// are serialized; a task whose last step was terminal is refused.
    pub async fn execute_step(
        &self,
        task_id: &str,
        request: Option<StepRequestBody>,
    ) -> Result<Step, EngineError> {
        let task = self.get_task(task_id).await?;
        let mut context = self.contexts.lock(task_id).await;

        let steps = self.store.list_steps(task_id).await.map_err(store_error)?;
        if steps.last().is_some_and(|s| s.is_last) {
            return Err(EngineError::TaskFinished(task_id.to_string()));
        }

        if !context.is_seeded() {
            info!(task_id, "No chat context in memory, seeding again");
            self.seed(&task.input, &mut context).await?;
        }

        let request = StepRequestBody::normalized(request);
        self.executor.execute(task_id, &request, &mut context).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, EngineError> {
        self.store
            .get_task(task_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    pub async fn list_tasks(&self, limit: i64) -> Result<Vec<Task>, EngineError> {
        self.store.list_tasks(limit).await.map_err(store_error)
    }

    pub async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, EngineError> {
        self.get_task(task_id).await?;
        self.store.list_steps(task_id).await.map_err(store_error)
    }

    pub async fn get_step(&self, task_id: &str, step_id: &str) -> Result<Option<Step>, EngineError> {
        self.store
            .get_step(task_id, step_id)
            .await
            .map_err(store_error)
    }

    pub async fn list_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>, EngineError> {
        self.get_task(task_id).await?;
        self.store.list_artifacts(task_id).await.map_err(store_error)
    }

    /// Read-only copy of a task's conversation
    pub async fn export_history(&self, task_id: &str) -> Vec<Message> {
        self.contexts.export(task_id).await
    }

    /// Persona chosen for a task, if it has been seeded in this process
    pub async fn persona(&self, task_id: &str) -> Option<super::Persona> {
        if !self.contexts.contains(task_id).await {
            return None;
        }
        self.contexts.lock(task_id).await.persona().cloned()
    }
}
