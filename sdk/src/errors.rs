//! Error types and handling
//!
//! This module provides the error types shared by the Forge engine and the
//! abilities it dispatches. All errors implement the `ForgeErrorExt` trait
//! which provides a user-facing hint and an [`ErrorKind`] classification the
//! step executor uses to choose a recovery path.
//!
//! # Security
//!
//! Hints never include the underlying cause. Raw causes are logged and, for
//! ability failures, reported back to the model; they are not shown to the
//! user who submitted the task.

use thiserror::Error;

/// How the step executor should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retryable. The operation may succeed if attempted again.
    Transient,

    /// Reported to the model as a chat message so it can correct itself.
    UserFacing,

    /// Aborts the current step. The step is still persisted in a resumable state.
    Fatal,
}

/// Trait for Forge error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and the recovery classification.
pub trait ForgeErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Secrets (API keys, tokens)
    /// - Raw provider responses
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns the recovery classification of the error
    fn kind(&self) -> ErrorKind;

    /// Returns whether the error is recoverable
    ///
    /// Everything except [`ErrorKind::Fatal`] is recoverable.
    fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Registration**: ability declared parameters disagree with the arguments
///   its implementation reads
/// - **Transport**: completion provider exhausted its retry budget
/// - **Malformed response**: model reply is missing required keys
/// - **Execution**: a dispatched ability failed, or no ability has that name
/// - **Storage / workspace**: task store and workspace failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorKind, ForgeErrorExt};
///
/// let error = EngineError::UnknownAbility("fly".to_string());
/// assert_eq!(error.kind(), ErrorKind::UserFacing);
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::Template("missing template".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Ability registry errors
    #[error("Ability registration failed for '{name}': {reason}")]
    AbilityRegistration { name: String, reason: String },

    #[error("Unknown ability: {0}")]
    UnknownAbility(String),

    #[error("Ability '{name}' failed: {reason}")]
    AbilityExecution { name: String, reason: String },

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Completion provider errors
    #[error("Completion transport failed after {attempts} attempts: {cause}")]
    Transport { attempts: u32, cause: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // Prompt template errors
    #[error("Template error: {0}")]
    Template(String),

    // Workspace errors
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    // Task lifecycle errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already finished: {0}")]
    TaskFinished(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for an execution failure attributed to an ability.
    pub fn execution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AbilityExecution {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl ForgeErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Task store operation failed. Check the data directory",

            Self::AbilityRegistration { .. } => "An ability was skipped at startup. Check the logs",
            Self::UnknownAbility(_) => "The requested ability is not available",
            Self::AbilityExecution { .. } => "An ability failed while running",
            Self::MissingArgument(_) | Self::InvalidArgument(_) => {
                "An ability was called with bad arguments"
            }

            Self::Transport { .. } => {
                "The language model could not be reached. Try the step again"
            }
            Self::MalformedResponse(_) => "The model reply was not understood. Retrying",
            Self::Template(_) => "Prompt templates are broken. Reinstall Forge",

            Self::Workspace(_) => "Workspace operation failed",
            Self::PathOutsideWorkspace(_) => "Operation must be within the task workspace",

            Self::TaskNotFound(_) => "No task with that id exists",
            Self::TaskFinished(_) => "This task has already finished",
            Self::Timeout(_) => "The operation took too long and was stopped",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Timeout(_) => ErrorKind::Transient,

            Self::UnknownAbility(_)
            | Self::AbilityExecution { .. }
            | Self::MissingArgument(_)
            | Self::InvalidArgument(_)
            | Self::MalformedResponse(_)
            | Self::Workspace(_)
            | Self::PathOutsideWorkspace(_)
            | Self::Io(_) => ErrorKind::UserFacing,

            Self::Config(_)
            | Self::Database(_)
            | Self::AbilityRegistration { .. }
            | Self::Template(_)
            | Self::TaskNotFound(_)
            | Self::TaskFinished(_) => ErrorKind::Fatal,
        }
    }
}
