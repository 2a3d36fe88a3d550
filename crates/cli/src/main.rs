//! tracebot CLI, the main entry point.
//!
//! Commands:
//! - `run`           Connect to Discord and answer questions
//! - `status`        Show configuration and probe the tool provider
//! - `check-config`  Validate configuration and print a redacted summary

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tracebot",
    about = "tracebot: Sentry answers in Discord, powered by an LLM and MCP tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.tracebot/config.toml)
    #[arg(short, long, global = true, env = "TRACEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and serve messages until Ctrl-C
    Run,

    /// Show configuration and tool provider status
    Status,

    /// Validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config_path).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::CheckConfig => commands::check_config::run(config_path).await?,
    }

    Ok(())
}
