// Forge step engine
// Main entry point for the forge binary

use clap::Parser;
use forge_engine::cli::{Cli, Command};
use forge_engine::config::Config;
use forge_engine::handlers::{
    handle_abilities, handle_history, handle_replay, handle_run, OutputFormat,
};
use forge_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_or_create_at(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Priority: RUST_LOG > --log > core.log_level
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!("Forge v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run { goal, max_steps } => {
            tracing::info!("Running goal: {}", goal);
            handle_run(goal, max_steps, &config, format).await
        }

        Command::History { limit } => {
            tracing::info!("Showing last {} tasks", limit);
            handle_history(limit, &config, format).await
        }

        Command::Replay { task_id } => {
            tracing::info!("Replaying task: {}", task_id);
            handle_replay(task_id, &config, format).await
        }

        Command::Abilities => handle_abilities(&config, format).await,
    }
}
