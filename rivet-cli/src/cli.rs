use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rivet",
    version,
    about = "Autonomous coding agent with MCP tool providers"
)]
pub struct Cli {
    /// Configuration file (defaults to config/rivet.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory substituted into catalog templates (defaults to the current directory)
    #[arg(long)]
    pub workspace: Option<PathBuf>,
    /// Disable log output
    #[arg(long)]
    pub quiet: bool,
    /// Override `agent.max_iterations`
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: Option<u32>,
}
