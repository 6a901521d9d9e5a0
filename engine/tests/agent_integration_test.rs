//! Integration tests for the step engine
//!
//! Drives the agent end to end against a scripted provider, a temporary
//! SQLite store and a temporary workspace:
//! - Task seeding and the write_file round trip
//! - Malformed, non-JSON and failing replies
//! - Terminal steps and finished tasks
//! - Loop detection across steps

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use forge_engine::abilities::default_registry;
use forge_engine::agent::{Agent, Persona, STEP_ABILITIES_KEY};
use forge_engine::config::Config;
use forge_engine::db::{Database, StepRequestBody, StepStatus, TaskRequestBody, TaskStore};
use forge_engine::llm::completion::JSON_DIRECTIVE;
use forge_engine::llm::{LLMError, LLMProvider, Message, MessageRole};
use sdk::ability::{Ability, AbilityContext};
use sdk::errors::{EngineError, ForgeErrorExt};
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput};
use std::time::Duration;

const PERSONA: &str = r#"{"name": "Ada", "expertise": "File handling"}"#;
const PLAN: &str = "1. Write the file\n2. Finish";

/// Replies in order; fails once the script runs out
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, LLMError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String, LLMError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[Message],
        _model: &str,
        _temperature: f32,
    ) -> forge_engine::llm::Result<String> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::NetworkError("connection reset".to_string())))
    }
}

struct Harness {
    _dir: TempDir,
    config: Config,
    agent: Agent,
    provider: Arc<ScriptedProvider>,
    store: Arc<dyn TaskStore>,
}

fn ok(reply: impl Into<String>) -> Result<String, LLMError> {
    Ok(reply.into())
}

/// Agent whose provider answers persona and plan, then `steps` in order
async fn harness(steps: Vec<Result<String, LLMError>>) -> Harness {
    let mut replies = vec![ok(PERSONA), ok(PLAN)];
    replies.extend(steps);
    harness_with_script(replies).await
}

async fn harness_with_script(replies: Vec<Result<String, LLMError>>) -> Harness {
    harness_with_abilities(replies, Vec::new()).await
}

/// Ability whose artifact store has gone away
struct StoreDown;

#[async_trait]
impl Ability for StoreDown {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new("store_down", "Records an artifact", "None")
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id"]
    }

    async fn execute(
        &self,
        _ctx: &AbilityContext,
        _args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        Err(EngineError::Database("disk I/O error".to_string()))
    }
}

async fn harness_with_abilities(
    replies: Vec<Result<String, LLMError>>,
    extra: Vec<Arc<dyn Ability>>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.workspace = dir.path().join("workspace");
    config.core.data_dir = dir.path().join("data");
    config.llm.retry.max_attempts = 3;
    config.llm.retry.min_delay_ms = 1;
    config.llm.retry.max_delay_ms = 5;

    let database = Database::new(&config.database_path()).await.unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(database.tasks());
    let provider = Arc::new(ScriptedProvider::new(replies));
    let shared: Arc<dyn LLMProvider> = Arc::clone(&provider) as Arc<dyn LLMProvider>;
    let mut registry = default_registry(Duration::from_secs(config.agent.ability_timeout_secs));
    registry.register_all(extra);
    let agent = Agent::with_registry(&config, Arc::clone(&store), shared, registry).unwrap();

    Harness {
        _dir: dir,
        config,
        agent,
        provider,
        store,
    }
}

fn write_hello_singular() -> String {
    json!({
        "thoughts": {"speak": "Writing the file"},
        "ability": {"name": "write_file", "args": {"file_name": "output.txt", "data": "hello"}}
    })
    .to_string()
}

fn write_hello_plural() -> String {
    json!({
        "thoughts": {"speak": "Writing the file"},
        "abilities": [{"name": "write_file", "args": {"file_name": "output.txt", "data": "hello"}}]
    })
    .to_string()
}

fn finish_reply() -> String {
    json!({
        "thoughts": {"speak": "Done"},
        "abilities": [{"name": "finish", "args": {"reason": "File written"}}]
    })
    .to_string()
}

#[tokio::test]
async fn test_create_task_seeds_context_in_order() {
    let h = harness(vec![]).await;
    let task = h
        .agent
        .create_task(TaskRequestBody::new("Write 'hello' to output.txt"))
        .await
        .unwrap();

    assert!(h.config.core.workspace.join(&task.task_id).is_dir());

    let history = h.agent.export_history(&task.task_id).await;
    let roles: Vec<_> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::System,
            MessageRole::System,
            MessageRole::User
        ]
    );
    assert!(history[0].content.contains("\"thoughts\""));
    assert!(history[1].content.contains("- write_file(file_name: string, data: bytes)"));
    assert!(history[2].content.contains("Ada"));
    assert!(history[3].content.contains(PLAN));
    assert!(history[3].content.contains("Write 'hello' to output.txt"));

    assert_eq!(
        h.agent.persona(&task.task_id).await,
        Some(Persona {
            name: "Ada".to_string(),
            expertise: "File handling".to_string()
        })
    );
}

#[tokio::test]
async fn test_write_file_end_to_end() {
    let h = harness(vec![ok(write_hello_singular())]).await;
    let task = h
        .agent
        .create_task(TaskRequestBody::new("Write 'hello' to output.txt"))
        .await
        .unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();

    assert_eq!(step.status, StepStatus::Completed);
    assert!(!step.is_last);
    assert_eq!(step.input, "y");
    assert_eq!(step.output.as_deref(), Some("Writing the file"));
    assert_eq!(
        step.additional_input[STEP_ABILITIES_KEY],
        json!([{"name": "write_file", "args": {"file_name": "output.txt", "data": "hello"}}])
    );

    assert_eq!(step.artifacts.len(), 1);
    assert_eq!(step.artifacts[0].relative_path, "output.txt");
    assert_eq!(step.artifacts[0].file_name, "output.txt");
    assert!(step.artifacts[0].agent_created);

    let written = std::fs::read_to_string(
        h.config.core.workspace.join(&task.task_id).join("output.txt"),
    )
    .unwrap();
    assert_eq!(written, "hello");

    let history = h.agent.export_history(&task.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::Function);
    assert_eq!(last.name.as_deref(), Some("write_file"));
    assert!(last.content.starts_with("[Arguments {"));
    assert!(last.content.contains("\"file_name\":\"output.txt\""));

    // The directive rides on the outbound copy only
    let seen = h.provider.seen.lock().unwrap();
    assert!(seen[2][0].content.ends_with(JSON_DIRECTIVE));
    assert!(!history[0].content.ends_with(JSON_DIRECTIVE));
}

#[tokio::test]
async fn test_missing_thoughts_keeps_step_created() {
    let reply = json!({
        "ability": {"name": "write_file", "args": {"file_name": "output.txt", "data": "hello"}}
    });
    let h = harness(vec![ok(reply.to_string())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();

    assert_eq!(step.status, StepStatus::Created);
    assert!(!step.is_last);
    assert!(step.artifacts.is_empty());
    assert!(h.store.list_artifacts(&task.task_id).await.unwrap().is_empty());

    let history = h.agent.export_history(&task.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last
        .content
        .starts_with("Your reply was not in the given JSON format.\n"));
}

#[tokio::test]
async fn test_repeated_malformed_reply_is_nudged() {
    let malformed = json!({"thoughts": {"speak": "hmm"}}).to_string();
    let h = harness(vec![ok(malformed.clone()), ok(malformed)]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    h.agent.execute_step(&task.task_id, None).await.unwrap();
    h.agent.execute_step(&task.task_id, None).await.unwrap();

    let history = h.agent.export_history(&task.task_id).await;
    let corrective = history
        .iter()
        .filter(|m| m.content.starts_with("Your reply was not in the given JSON format."))
        .count();
    assert_eq!(corrective, 1);

    let nudge = history.last().unwrap();
    assert_eq!(nudge.role, MessageRole::User);
    assert!(nudge.content.contains("You have gone off course"));
    assert!(nudge.content.ends_with(&history[3].content));
}

#[tokio::test]
async fn test_failing_ability_keeps_task_resumable() {
    let read_missing = json!({
        "thoughts": {"speak": "Reading"},
        "ability": {"name": "read_file", "args": {"file_path": "missing.txt"}}
    });
    let h = harness(vec![ok(read_missing.to_string()), ok(finish_reply())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert!(!step.is_last);

    let history = h.agent.export_history(&task.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last.content.contains("Ability read_file failed to run: "));
    assert!(last.content.contains("missing.txt"));

    let next = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert!(next.is_last);
}

#[tokio::test]
async fn test_unknown_ability_is_reported_to_model() {
    let reply = json!({"thoughts": {"speak": "Flying"}, "ability": {"name": "fly", "args": {}}});
    let h = harness(vec![ok(reply.to_string())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);

    let history = h.agent.export_history(&task.task_id).await;
    assert!(history
        .last()
        .unwrap()
        .content
        .ends_with("Ability fly failed to run: Unknown ability: fly"));
}

#[tokio::test]
async fn test_finish_ends_task() {
    let reply = json!({
        "thoughts": {"speak": "Writing and finishing"},
        "abilities": [
            {"name": "finish", "args": {"reason": "All done"}},
            {"name": "write_file", "args": {"file_name": "late.txt", "data": "x"}}
        ]
    });
    let h = harness(vec![ok(reply.to_string())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert!(step.is_last);

    // Later entries still run in order
    let artifacts = h.agent.list_artifacts(&task.task_id).await.unwrap();
    assert_eq!(artifacts.len(), 1);

    let calls = h.provider.calls();
    let err = h.agent.execute_step(&task.task_id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::TaskFinished(_)));
    assert_eq!(h.provider.calls(), calls);

    let steps = h.agent.list_steps(&task.task_id).await.unwrap();
    assert_eq!(steps.len(), 1);
}

#[tokio::test]
async fn test_singular_and_plural_are_equivalent() {
    let singular = harness(vec![ok(write_hello_singular())]).await;
    let plural = harness(vec![ok(write_hello_plural())]).await;

    let mut histories = Vec::new();
    for h in [&singular, &plural] {
        let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();
        let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        histories.push(h.agent.export_history(&task.task_id).await);
    }

    assert_eq!(histories[0].len(), histories[1].len());
    assert_eq!(histories[0].last(), histories[1].last());
}

#[tokio::test]
async fn test_transport_failure_marks_step_error() {
    // Script runs out after the plan, so every step attempt fails
    let h = harness(vec![]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Error);
    assert!(!step.is_last);

    let hint = EngineError::Transport {
        attempts: 3,
        cause: String::new(),
    }
    .user_hint()
    .to_string();
    assert_eq!(step.output, Some(hint));
    assert_eq!(h.provider.calls(), 2 + 3);

    // Still resumable
    let again = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(again.status, StepStatus::Error);
}

#[tokio::test]
async fn test_non_json_reply_gets_apology() {
    let h = harness(vec![ok("Sure, I will write the file now.")]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert!(!step.is_last);

    let history = h.agent.export_history(&task.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last
        .content
        .starts_with("Something went wrong with processing on our end."));
}

#[tokio::test]
async fn test_persona_and_plan_fall_back() {
    // Three unparseable persona replies, then every planning call fails
    let h = harness_with_script(vec![ok("who?"), ok("no idea"), ok("{}")]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    assert_eq!(h.agent.persona(&task.task_id).await, Some(Persona::default()));

    let history = h.agent.export_history(&task.task_id).await;
    assert!(history[2].content.contains("Joe Anybody"));
    assert!(history[3].content.contains("Call the finish ability"));
}

#[tokio::test]
async fn test_unknown_task() {
    let h = harness(vec![]).await;
    assert!(matches!(
        h.agent.execute_step("no-such-task", None).await,
        Err(EngineError::TaskNotFound(_))
    ));
    assert!(matches!(
        h.agent.list_steps("no-such-task").await,
        Err(EngineError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_tasks_do_not_share_context() {
    let h = harness(vec![ok(PERSONA), ok(PLAN)]).await;
    let first = h.agent.create_task(TaskRequestBody::new("first")).await.unwrap();
    let second = h.agent.create_task(TaskRequestBody::new("second")).await.unwrap();

    let a = h.agent.export_history(&first.task_id).await;
    let b = h.agent.export_history(&second.task_id).await;
    assert_eq!(a.len(), 4);
    assert_eq!(b.len(), 4);
    assert!(b[3].content.contains("second"));

    let tasks = h.agent.list_tasks(10).await.unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn test_storage_failure_during_dispatch_gets_apology() {
    let reply = json!({"thoughts": {"speak": "Saving"}, "ability": {"name": "store_down", "args": {}}});
    let replies = vec![ok(PERSONA), ok(PLAN), ok(reply.to_string())];
    let extra: Vec<Arc<dyn Ability>> = vec![Arc::new(StoreDown)];
    let h = harness_with_abilities(replies, extra).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert!(!step.is_last);

    let history = h.agent.export_history(&task.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert!(last
        .content
        .starts_with("Something went wrong with processing on our end."));
    assert!(last.content.contains("disk I/O error"));
    assert!(!history
        .iter()
        .any(|m| m.content.contains("Ability store_down failed to run")));
}

#[tokio::test]
async fn test_placeholder_only_reply_keeps_step_created() {
    let reply = json!({
        "thoughts": {"speak": "Thinking it over"},
        "abilities": [{"name": "None"}, {"name": ""}]
    });
    let h = harness(vec![ok(reply.to_string())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let step = h.agent.execute_step(&task.task_id, None).await.unwrap();
    assert_eq!(step.status, StepStatus::Created);
    assert!(!step.is_last);
    assert_eq!(step.output.as_deref(), Some("Thinking it over"));
    assert_eq!(h.agent.export_history(&task.task_id).await.len(), 4);
}

#[tokio::test]
async fn test_caller_additional_input_is_kept() {
    let h = harness(vec![ok(write_hello_plural())]).await;
    let task = h.agent.create_task(TaskRequestBody::new("goal")).await.unwrap();

    let mut request = StepRequestBody::with_input("continue");
    request
        .additional_input
        .insert("abilities".to_string(), json!("caller value"));

    let step = h
        .agent
        .execute_step(&task.task_id, Some(request))
        .await
        .unwrap();
    assert_eq!(step.input, "continue");
    assert_eq!(step.additional_input["abilities"], json!("caller value"));
    assert_eq!(step.additional_input[STEP_ABILITIES_KEY][0]["name"], "write_file");
}
