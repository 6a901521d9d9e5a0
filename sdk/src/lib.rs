//! Forge SDK
//!
//! Shared library providing the ability trait, argument and output types, and
//! the error type used by the Forge engine and every ability it dispatches.

/// Ability trait and context types
pub mod ability;

/// Error types and handling
pub mod errors;

/// Ability descriptor, argument and output types
pub mod types;

// Re-export commonly used types
pub use ability::{
    Ability, AbilityContext, ArtifactHandle, ArtifactHandleImpl, ProcessHandle,
    ProcessHandleImpl, ProcessOutput, WorkspaceHandle, WorkspaceHandleImpl,
};
pub use errors::{EngineError, ErrorKind, ForgeErrorExt};
pub use types::{AbilityArgs, AbilityDescriptor, AbilityOutput, AbilityParameter, TASK_ID_ARG};
