//! ferry CLI
//!
//! Runs pipeline definitions against a simulated registry and platform kept
//! in a state file, and promotes built revisions between environments.

mod commands;
mod state;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ferry_core::config::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, EXIT_FAILED, handle_command};
use crate::state::{DEFAULT_STATE_PATH, StateFile};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Pipeline runs with inferred data edges and idempotent promotions", long_about = None)]
struct Cli {
    /// State file holding the simulated registry and platform
    #[arg(long, global = true, env = "FERRY_STATE", default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = EngineConfig::from_env().context("loading configuration")?;
    let state = StateFile::new(cli.state);

    let mut stdout = std::io::stdout().lock();
    let code = handle_command(cli.command, &state, config, &mut stdout).await?;
    stdout.flush()?;
    Ok(code)
}
