/// Database module for SQLite persistence
///
/// This module provides the task store: tasks, steps and artifacts. It uses
/// sqlx with WAL mode for better concurrency.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::ability::ArtifactHandleImpl;
use sdk::errors::EngineError;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub mod tasks;

// Re-export commonly used types
pub use tasks::{
    Artifact, Step, StepRequestBody, StepStatus, Task, TaskRepository, TaskRequestBody,
};

/// Persistent store for tasks, steps and artifacts
///
/// The step engine only talks to this trait. `TaskRepository` is the SQLite
/// implementation; tests may substitute their own.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, input: &str, additional_input: &Map<String, Value>) -> Result<Task>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// Most recent tasks first
    async fn list_tasks(&self, limit: i64) -> Result<Vec<Task>>;

    async fn create_step(
        &self,
        task_id: &str,
        request: &StepRequestBody,
        is_last: bool,
    ) -> Result<Step>;

    /// Persist status, output, `is_last` and `additional_input` of a step
    async fn update_step(&self, step: &Step) -> Result<()>;

    async fn get_step(&self, task_id: &str, step_id: &str) -> Result<Option<Step>>;

    /// Steps of a task in creation order
    async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>>;

    async fn create_artifact(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        file_name: &str,
        relative_path: &str,
        agent_created: bool,
    ) -> Result<Artifact>;

    async fn list_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>>;

    async fn list_step_artifacts(&self, task_id: &str, step_id: &str) -> Result<Vec<Artifact>>;
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode and foreign keys
    /// 3. Run migrations to set up the schema
    ///
    /// SQLite recovers a leftover WAL on open, so an unclean shutdown needs no
    /// extra handling here.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Migrations are idempotent and can be run multiple times safely.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close all connections in the pool
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Database connection closed");
        Ok(())
    }

    /// Create a task repository
    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }
}

/// Convert a store failure into the engine taxonomy
pub fn store_error(err: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", err))
}

/// Artifact handle backed by a task store
///
/// Abilities record agent-created artifacts through this adapter.
pub struct StoreArtifacts {
    store: Arc<dyn TaskStore>,
}

impl StoreArtifacts {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactHandleImpl for StoreArtifacts {
    async fn create(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        file_name: &str,
        relative_path: &str,
    ) -> Result<String, EngineError> {
        let artifact = self
            .store
            .create_artifact(task_id, step_id, file_name, relative_path, true)
            .await
            .map_err(store_error)?;
        Ok(artifact.artifact_id)
    }
}
