//! Ability trait and context types
//!
//! This module defines the Ability trait that every capability the model can
//! invoke must implement, and the AbilityContext that gives an ability limited,
//! controlled access to the engine: the task workspace, the artifact store and
//! a process runner.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::types::{AbilityArgs, AbilityDescriptor, AbilityOutput};

/// Trait that all abilities must implement
///
/// `descriptor` is what the model sees in the catalog. `arguments` is the set
/// of argument names `execute` actually reads, `task_id` included. The
/// registry rejects an ability whose `arguments` disagree with its declared
/// parameters.
#[async_trait]
pub trait Ability: Send + Sync {
    /// Returns the declared contract of the ability
    fn descriptor(&self) -> AbilityDescriptor;

    /// Returns the argument names the implementation accepts
    fn arguments(&self) -> &'static [&'static str];

    /// Run the ability
    async fn execute(
        &self,
        ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError>;
}

/// Context provided to abilities for engine interaction.
///
/// AbilityContext is the sole API surface abilities use to touch the engine.
/// Each handle exposes specific operations without revealing engine state.
#[derive(Clone)]
pub struct AbilityContext {
    /// Step the dispatch belongs to, if any
    pub step_id: Option<String>,

    /// Handle for task-scoped file access
    pub workspace: WorkspaceHandle,

    /// Handle for recording artifacts
    pub artifacts: ArtifactHandle,

    /// Handle for running interpreter processes
    pub process: ProcessHandle,
}

impl AbilityContext {
    /// Create a new AbilityContext with all handles
    pub fn new(
        workspace: WorkspaceHandle,
        artifacts: ArtifactHandle,
        process: ProcessHandle,
    ) -> Self {
        Self {
            step_id: None,
            workspace,
            artifacts,
            process,
        }
    }

    /// Bind the context to a step
    pub fn for_step(&self, step_id: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..self.clone()
        }
    }
}

/// Handle for task workspace operations
///
/// All paths are relative to the task's workspace root.
#[derive(Clone)]
pub struct WorkspaceHandle {
    inner: Arc<dyn WorkspaceHandleImpl>,
}

impl WorkspaceHandle {
    /// Create a new WorkspaceHandle with the given implementation
    pub fn new(inner: Arc<dyn WorkspaceHandleImpl>) -> Self {
        Self { inner }
    }

    /// Read a file
    pub async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, EngineError> {
        self.inner.read(task_id, path).await
    }

    /// Write a file, creating parent directories
    pub async fn write(&self, task_id: &str, path: &str, data: &[u8]) -> Result<(), EngineError> {
        self.inner.write(task_id, path, data).await
    }

    /// List entries under a directory
    pub async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, EngineError> {
        self.inner.list(task_id, path).await
    }

    /// Resolve a relative path to an absolute one inside the workspace
    pub async fn resolve(&self, task_id: &str, path: &str) -> Result<PathBuf, EngineError> {
        self.inner.resolve(task_id, path).await
    }
}

/// Trait for workspace handle implementation (to be implemented by engine)
#[async_trait]
pub trait WorkspaceHandleImpl: Send + Sync {
    async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, EngineError>;

    async fn write(&self, task_id: &str, path: &str, data: &[u8]) -> Result<(), EngineError>;

    async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, EngineError>;

    async fn resolve(&self, task_id: &str, path: &str) -> Result<PathBuf, EngineError>;
}

/// Handle for artifact bookkeeping
#[derive(Clone)]
pub struct ArtifactHandle {
    inner: Arc<dyn ArtifactHandleImpl>,
}

impl ArtifactHandle {
    /// Create a new ArtifactHandle with the given implementation
    pub fn new(inner: Arc<dyn ArtifactHandleImpl>) -> Self {
        Self { inner }
    }

    /// Record an agent-created artifact and return its id
    pub async fn create(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        file_name: &str,
        relative_path: &str,
    ) -> Result<String, EngineError> {
        self.inner
            .create(task_id, step_id, file_name, relative_path)
            .await
    }
}

/// Trait for artifact handle implementation (to be implemented by engine)
#[async_trait]
pub trait ArtifactHandleImpl: Send + Sync {
    async fn create(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        file_name: &str,
        relative_path: &str,
    ) -> Result<String, EngineError>;
}

/// Result of a finished child process
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Handle for running interpreter processes
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<dyn ProcessHandleImpl>,
}

impl ProcessHandle {
    /// Create a new ProcessHandle with the given implementation
    pub fn new(inner: Arc<dyn ProcessHandleImpl>) -> Self {
        Self { inner }
    }

    /// Run a Python script with the given working directory
    pub async fn run_python(
        &self,
        script: PathBuf,
        cwd: PathBuf,
    ) -> Result<ProcessOutput, EngineError> {
        self.inner.run_python(script, cwd).await
    }
}

/// Trait for process handle implementation (to be implemented by engine)
#[async_trait]
pub trait ProcessHandleImpl: Send + Sync {
    async fn run_python(&self, script: PathBuf, cwd: PathBuf)
        -> Result<ProcessOutput, EngineError>;
}
