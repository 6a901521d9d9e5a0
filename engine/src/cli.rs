//! CLI interface for Forge
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Forge step engine
///
/// Give it a goal and it plans, picks abilities and works through the plan
/// one step at a time inside a per-task workspace.
#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task and run it until it finishes
    Run {
        /// The goal to accomplish
        goal: String,

        /// Stop after this many steps (default: agent.max_steps)
        #[arg(long, value_name = "N")]
        max_steps: Option<u32>,
    },

    /// Show task history
    History {
        /// Number of tasks to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show all steps and artifacts of a task
    Replay {
        /// Task ID to replay
        task_id: String,
    },

    /// List the registered abilities by category
    Abilities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["forge", "abilities"]);
        assert!(matches!(cli.command, Command::Abilities));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "forge",
            "--json",
            "--log",
            "debug",
            "--config",
            "/tmp/forge.toml",
            "abilities",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/forge.toml")));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["forge", "run", "Write 'hello' to output.txt", "--max-steps", "5"]);
        if let Command::Run { goal, max_steps } = cli.command {
            assert_eq!(goal, "Write 'hello' to output.txt");
            assert_eq!(max_steps, Some(5));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_history_command() {
        let cli = Cli::parse_from(["forge", "history", "--limit", "20"]);
        if let Command::History { limit } = cli.command {
            assert_eq!(limit, 20);
        } else {
            panic!("Expected History command");
        }
    }

    #[test]
    fn test_replay_command() {
        let cli = Cli::parse_from(["forge", "replay", "abc-123"]);
        if let Command::Replay { task_id } = cli.command {
            assert_eq!(task_id, "abc-123");
        } else {
            panic!("Expected Replay command");
        }
    }

    #[test]
    fn test_missing_goal_is_error() {
        assert!(Cli::try_parse_from(["forge", "run"]).is_err());
    }
}
