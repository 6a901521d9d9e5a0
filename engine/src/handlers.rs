//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Create a task and step it until it finishes
//! - history: Show last N tasks
//! - replay: Show all steps and artifacts of a task
//! - abilities: Show the ability catalog

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::abilities::default_registry;
use crate::agent::{Agent, STEP_ABILITIES_KEY};
use crate::config::Config;
use crate::db::{Database, Step, TaskRequestBody, TaskStore};
use crate::llm::provider_from_config;
use sdk::errors::EngineError;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Names of the abilities a step asked for
fn requested_abilities(step: &Step) -> Vec<String> {
    step.additional_input
        .get(STEP_ABILITIES_KEY)
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn print_step(number: usize, step: &Step) {
    println!(
        "Step {} [{}]{}",
        number,
        step.status.as_str(),
        if step.is_last { " (last)" } else { "" }
    );
    let abilities = requested_abilities(step);
    if !abilities.is_empty() {
        println!("  Abilities: {}", abilities.join(", "));
    }
    println!("  {}", step.output.as_deref().unwrap_or("(no output)"));
}

/// Create a task and run steps until it finishes or the step bound is hit
pub async fn handle_run(
    goal: String,
    max_steps: Option<u32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let store: Arc<dyn TaskStore> = Arc::new(database.tasks());
    let provider = provider_from_config(&config.llm)?;

    if !provider.check_health().await {
        tracing::warn!("Provider {} did not pass its health check", provider.name());
    }

    let agent = Agent::new(config, store, provider).context("Failed to start agent")?;
    let max_steps = max_steps.unwrap_or(config.agent.max_steps);

    let task = agent
        .create_task(TaskRequestBody::new(goal.clone()))
        .await
        .context("Failed to create task")?;

    if let OutputFormat::Text = format {
        println!("Task {}: {}", task.task_id, goal);
        println!();
    }

    let mut steps = Vec::new();
    let mut finished = false;

    for _ in 0..max_steps {
        let step = agent.execute_step(&task.task_id, None).await?;
        if let OutputFormat::Text = format {
            print_step(steps.len() + 1, &step);
        }
        finished = step.is_last;
        steps.push(step);
        if finished {
            break;
        }
    }

    let artifacts = agent.list_artifacts(&task.task_id).await?;

    match format {
        OutputFormat::Text => {
            println!();
            if finished {
                println!("✓ Task finished after {} steps", steps.len());
            } else {
                println!("✗ Task stopped after {} steps without finishing", steps.len());
            }
            for artifact in &artifacts {
                println!("  Artifact: {}", artifact.relative_path);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "task": task,
                "steps": steps,
                "finished": finished,
                "artifacts": artifacts,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await?;
    Ok(())
}

/// Show task history
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let repo = database.tasks();

    let tasks = repo
        .list_tasks(limit as i64)
        .await
        .context("Failed to fetch task history")?;

    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks in history");
                return Ok(());
            }

            println!("Task History (last {} tasks):", limit);
            println!();

            for task in &tasks {
                let steps = repo.list_steps(&task.task_id).await?;
                let finished = steps.last().is_some_and(|s| s.is_last);

                println!("Task ID: {}", task.task_id);
                println!("  Input: {}", task.input);
                println!(
                    "  Steps: {}{}",
                    steps.len(),
                    if finished { " (finished)" } else { "" }
                );
                println!("  Artifacts: {}", task.artifacts.len());
                println!("  Created: {}", format_timestamp(task.created_at));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "tasks": tasks,
                "count": tasks.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Replay a task and show all steps
pub async fn handle_replay(task_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let repo = database.tasks();

    let task = repo
        .get_task(&task_id)
        .await
        .context("Failed to fetch task")?
        .ok_or_else(|| EngineError::TaskNotFound(task_id.clone()))?;

    let steps = repo
        .list_steps(&task_id)
        .await
        .context("Failed to fetch task steps")?;

    match format {
        OutputFormat::Text => {
            println!("Task Replay: {}", task_id);
            println!();
            println!("Input: {}", task.input);
            println!("Created: {}", format_timestamp(task.created_at));
            println!();
            println!("Steps ({} total):", steps.len());
            println!();

            for (i, step) in steps.iter().enumerate() {
                print_step(i + 1, step);
                for artifact in &step.artifacts {
                    println!("  Artifact: {}", artifact.relative_path);
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "task": task,
                "steps": steps,
                "step_count": steps.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List the built-in abilities grouped by category
pub async fn handle_abilities(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = default_registry(Duration::from_secs(config.agent.ability_timeout_secs));

    match format {
        OutputFormat::Text => {
            println!("Abilities ({}):", registry.len());
            println!();
            println!("{}", registry.abilities_description());
        }
        OutputFormat::Json => {
            let output = json!({
                "abilities": registry.describe_all(),
                "count": registry.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
