//! Configuration management
//!
//! This module handles loading, validation, and management of the Forge configuration.
//! Configuration is stored in TOML format at ~/.forge/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace root, log level, data directory
//! - **llm**: Provider, models, temperatures and retry policy
//! - **agent**: Step loop bounds, persona and plan attempts, timeouts
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace root, creating it if it doesn't exist
//! - Creates the data directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use forge_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Step engine settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Root of the per-task workspace directories (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory holding forge.db (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (openai, ollama)
    pub default_provider: String,

    /// Model used for step turns
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for planning, falls back to `model`
    #[serde(default)]
    pub planning_model: Option<String>,

    /// Model used for persona generation, falls back to `model`
    #[serde(default)]
    pub persona_model: Option<String>,

    /// Temperature for step turns
    #[serde(default = "default_step_temperature")]
    pub step_temperature: f32,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Retry policy for completion calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl LLMConfig {
    pub fn planning_model(&self) -> &str {
        self.planning_model.as_deref().unwrap_or(&self.model)
    }

    pub fn persona_model(&self) -> &str {
        self.persona_model.as_deref().unwrap_or(&self.model)
    }
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI-compatible API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Environment variable holding the organization id
    #[serde(default = "default_organization_env")]
    pub organization_env: String,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

/// Completion retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Step engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on steps `forge run` issues for one task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Persona generation attempts before the default persona is used
    #[serde(default = "default_persona_attempts")]
    pub persona_attempts: u32,

    /// Planning attempts before the fallback plan is used
    #[serde(default = "default_plan_attempts")]
    pub plan_attempts: u32,

    /// Upper bound on a single ability dispatch
    #[serde(default = "default_ability_timeout")]
    pub ability_timeout_secs: u64,

    /// Upper bound on a child process started by an ability
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Ability whose successful dispatch ends the task
    #[serde(default = "default_terminal_ability")]
    pub terminal_ability: String,

    /// Interpreter binary for `run_python_file`
    #[serde(default = "default_python")]
    pub python: String,
}

// Default value functions
fn default_workspace() -> PathBuf {
    PathBuf::from("~/.forge/workspace")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.forge")
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_step_temperature() -> f32 {
    0.1
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_organization_env() -> String {
    "ORGANIZATION_ID".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    40_000
}

fn default_max_steps() -> u32 {
    20
}

fn default_persona_attempts() -> u32 {
    3
}

fn default_plan_attempts() -> u32 {
    2
}

fn default_ability_timeout() -> u64 {
    300
}

fn default_command_timeout() -> u64 {
    60
}

fn default_terminal_ability() -> String {
    "finish".to_string()
}

fn default_python() -> String {
    crate::workspace::process::PYTHON.to_string()
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            organization_env: default_organization_env(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            persona_attempts: default_persona_attempts(),
            plan_attempts: default_plan_attempts(),
            ability_timeout_secs: default_ability_timeout(),
            command_timeout_secs: default_command_timeout(),
            terminal_ability: default_terminal_ability(),
            python: default_python(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.forge/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, creating a default file there if missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the ~ paths
        let mut config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.forge/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".forge").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                workspace: default_workspace(),
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig {
                default_provider: "openai".to_string(),
                model: default_model(),
                planning_model: None,
                persona_model: None,
                step_temperature: default_step_temperature(),
                openai: OpenAIConfig::default(),
                ollama: OllamaConfig::default(),
                retry: RetryConfig::default(),
            },
            agent: AgentConfig::default(),
        }
    }

    /// Path of the SQLite task store
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("forge.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Canonicalizes the workspace root, creating it if needed
    /// - Creates the data directory if needed
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.model.trim().is_empty()
            || self.llm.planning_model().trim().is_empty()
            || self.llm.persona_model().trim().is_empty()
        {
            return Err(EngineError::Config("model names must not be empty".to_string()));
        }

        if !(0.0..=2.0).contains(&self.llm.step_temperature) {
            return Err(EngineError::Config(
                "step_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        let retry = &self.llm.retry;
        if retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.min_delay_ms > retry.max_delay_ms {
            return Err(EngineError::Config(
                "retry.min_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        if self.agent.persona_attempts == 0 || self.agent.plan_attempts == 0 {
            return Err(EngineError::Config(
                "persona_attempts and plan_attempts must be at least 1".to_string(),
            ));
        }

        if self.agent.terminal_ability.trim().is_empty() {
            return Err(EngineError::Config(
                "terminal_ability must not be empty".to_string(),
            ));
        }

        if self.agent.python.trim().is_empty() {
            return Err(EngineError::Config("python must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::Config(format!("Failed to canonicalize {:?}: {}", path, e)))
}
