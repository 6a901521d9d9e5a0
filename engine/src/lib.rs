//! Forge Engine Library
//!
//! This library provides the step engine behind the `forge` binary. It is
//! used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// Prompt template rendering
pub mod prompts;

/// Per-task workspace and process runner
pub mod workspace;

/// Built-in abilities and the ability registry
pub mod abilities;

/// Step engine: chat context, planning, step execution
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
