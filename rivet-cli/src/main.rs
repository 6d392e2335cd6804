mod cli;
mod commands;
mod error;
mod host;
mod render;

use clap::Parser;
use cli::Cli;
use error::HostError;
use host::Host;
use rivet_core::agent::AgentOptions;
use rivet_core::config::AppConfig;
use std::env;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), HostError> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    info!("Starting rivet");
    debug!(config = ?cli.config, workspace = ?cli.workspace, "CLI arguments parsed");

    let config = AppConfig::load(cli.config.as_deref())?;
    let mut options = AgentOptions::from(&config.agent);
    if let Some(max_iterations) = cli.max_iterations {
        options.max_iterations = max_iterations;
    }
    let workspace = match cli.workspace {
        Some(path) => path,
        None => env::current_dir()?,
    };

    let host = Host::start(config, options, workspace).await?;
    host.run().await
}

fn init_tracing(quiet: bool) {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = if quiet {
            EnvFilter::new("off")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
