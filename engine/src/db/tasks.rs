/// Task, step and artifact persistence
///
/// This module provides the SQLite implementation of the task store. All
/// queries are parameterized.
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

use super::TaskStore;

/// Step status
///
/// `Created` and `Running` are transient within one turn; `Completed` and
/// `Error` are the states a finished turn leaves behind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Created,
    Running,
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Created => "created",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "created" => StepStatus::Created,
            "running" => StepStatus::Running,
            "completed" => StepStatus::Completed,
            _ => StepStatus::Error,
        }
    }
}

/// Artifact record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub artifact_id: String,
    pub task_id: String,
    pub step_id: Option<String>,
    pub file_name: String,
    pub relative_path: String,
    pub agent_created: bool,
    pub created_at: i64,
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub input: String,
    pub additional_input: Map<String, Value>,
    pub created_at: i64,
    pub modified_at: i64,
    pub artifacts: Vec<Artifact>,
}

/// Step record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub task_id: String,
    pub name: Option<String>,
    pub input: String,
    pub additional_input: Map<String, Value>,
    pub status: StepStatus,
    pub output: Option<String>,
    pub is_last: bool,
    pub created_at: i64,
    pub modified_at: i64,
    pub artifacts: Vec<Artifact>,
}

/// Body of a create-task request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequestBody {
    pub input: String,
    #[serde(default)]
    pub additional_input: Map<String, Value>,
}

impl TaskRequestBody {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            additional_input: Map::new(),
        }
    }
}

/// Body of an execute-step request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRequestBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub additional_input: Map<String, Value>,
}

impl StepRequestBody {
    /// Input the user sends to continue the task
    pub const CONTINUE: &'static str = "y";

    pub fn with_input(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Self::default()
        }
    }

    /// Treat a missing or empty body as a continuation signal
    pub fn normalized(request: Option<Self>) -> Self {
        let mut request = request.unwrap_or_default();
        let empty = request
            .input
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true);
        if empty {
            request.input = Some(Self::CONTINUE.to_string());
        }
        request
    }
}

fn now() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

fn parse_map(raw: &str) -> Map<String, Value> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn artifact_from_row(r: &SqliteRow) -> Artifact {
    Artifact {
        artifact_id: r.get("id"),
        task_id: r.get("task_id"),
        step_id: r.get("step_id"),
        file_name: r.get("file_name"),
        relative_path: r.get("relative_path"),
        agent_created: r.get::<i64, _>("agent_created") != 0,
        created_at: r.get("created_at"),
    }
}

fn step_from_row(r: &SqliteRow) -> Step {
    Step {
        step_id: r.get("id"),
        task_id: r.get("task_id"),
        name: r.get("name"),
        input: r.get("input"),
        additional_input: parse_map(&r.get::<String, _>("additional_input")),
        status: StepStatus::parse(&r.get::<String, _>("status")),
        output: r.get("output"),
        is_last: r.get::<i64, _>("is_last") != 0,
        created_at: r.get("created_at"),
        modified_at: r.get("modified_at"),
        artifacts: Vec::new(),
    }
}

fn task_from_row(r: &SqliteRow) -> Task {
    Task {
        task_id: r.get("id"),
        input: r.get("input"),
        additional_input: parse_map(&r.get::<String, _>("additional_input")),
        created_at: r.get("created_at"),
        modified_at: r.get("modified_at"),
        artifacts: Vec::new(),
    }
}

/// Task repository for database operations
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    /// Create a new task repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn touch_task(&self, task_id: &str, at: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET modified_at = ? WHERE id = ?")
            .bind(at)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("Failed to touch task")?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for TaskRepository {
    async fn create_task(&self, input: &str, additional_input: &Map<String, Value>) -> Result<Task> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now()?;
        let extra = serde_json::to_string(additional_input)?;

        sqlx::query(
            "INSERT INTO tasks (id, input, additional_input, created_at, modified_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(input)
        .bind(&extra)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create task")?;

        Ok(Task {
            task_id: id,
            input: input.to_string(),
            additional_input: additional_input.clone(),
            created_at: now,
            modified_at: now,
            artifacts: Vec::new(),
        })
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, input, additional_input, created_at, modified_at FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task")?;

        match row {
            Some(r) => {
                let mut task = task_from_row(&r);
                task.artifacts = self.list_artifacts(task_id).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT id, input, additional_input, created_at, modified_at FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent tasks")?;

        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn create_step(
        &self,
        task_id: &str,
        request: &StepRequestBody,
        is_last: bool,
    ) -> Result<Step> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now()?;
        let input = request.input.clone().unwrap_or_default();
        let extra = serde_json::to_string(&request.additional_input)?;
        let status = StepStatus::Created;

        sqlx::query(
            "INSERT INTO steps (id, task_id, name, input, additional_input, status, is_last, created_at, modified_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(&request.name)
        .bind(&input)
        .bind(&extra)
        .bind(status.as_str())
        .bind(is_last as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create step")?;

        self.touch_task(task_id, now).await?;

        Ok(Step {
            step_id: id,
            task_id: task_id.to_string(),
            name: request.name.clone(),
            input,
            additional_input: request.additional_input.clone(),
            status,
            output: None,
            is_last,
            created_at: now,
            modified_at: now,
            artifacts: Vec::new(),
        })
    }

    async fn update_step(&self, step: &Step) -> Result<()> {
        let now = now()?;
        let extra = serde_json::to_string(&step.additional_input)?;

        let result = sqlx::query(
            "UPDATE steps SET status = ?, output = ?, is_last = ?, additional_input = ?, modified_at = ? \
             WHERE id = ? AND task_id = ?",
        )
        .bind(step.status.as_str())
        .bind(&step.output)
        .bind(step.is_last as i64)
        .bind(&extra)
        .bind(now)
        .bind(&step.step_id)
        .bind(&step.task_id)
        .execute(&self.pool)
        .await
        .context("Failed to update step")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Step {} not found for task {}", step.step_id, step.task_id);
        }
        Ok(())
    }

    async fn get_step(&self, task_id: &str, step_id: &str) -> Result<Option<Step>> {
        let row = sqlx::query(
            "SELECT id, task_id, name, input, additional_input, status, output, is_last, created_at, modified_at \
             FROM steps WHERE task_id = ? AND id = ?",
        )
        .bind(task_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch step")?;

        match row {
            Some(r) => {
                let mut step = step_from_row(&r);
                step.artifacts = self.list_step_artifacts(task_id, step_id).await?;
                Ok(Some(step))
            }
            None => Ok(None),
        }
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>> {
        let rows = sqlx::query(
            "SELECT id, task_id, name, input, additional_input, status, output, is_last, created_at, modified_at \
             FROM steps WHERE task_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch steps")?;

        Ok(rows.iter().map(step_from_row).collect())
    }

    async fn create_artifact(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        file_name: &str,
        relative_path: &str,
        agent_created: bool,
    ) -> Result<Artifact> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now()?;

        sqlx::query(
            "INSERT INTO artifacts (id, task_id, step_id, file_name, relative_path, agent_created, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(step_id)
        .bind(file_name)
        .bind(relative_path)
        .bind(agent_created as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create artifact")?;

        self.touch_task(task_id, now).await?;

        Ok(Artifact {
            artifact_id: id,
            task_id: task_id.to_string(),
            step_id: step_id.map(String::from),
            file_name: file_name.to_string(),
            relative_path: relative_path.to_string(),
            agent_created,
            created_at: now,
        })
    }

    async fn list_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(
            "SELECT id, task_id, step_id, file_name, relative_path, agent_created, created_at \
             FROM artifacts WHERE task_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch artifacts")?;

        Ok(rows.iter().map(artifact_from_row).collect())
    }

    async fn list_step_artifacts(&self, task_id: &str, step_id: &str) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(
            "SELECT id, task_id, step_id, file_name, relative_path, agent_created, created_at \
             FROM artifacts WHERE task_id = ? AND step_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(task_id)
        .bind(step_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch step artifacts")?;

        Ok(rows.iter().map(artifact_from_row).collect())
    }
}
