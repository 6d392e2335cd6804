use rivet_core::config::ConfigError;
use rivet_core::mcp::RegistryError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A stdin line that could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '/{0}', try /help")]
    Unknown(String),
    #[error("usage: /{command} {usage}")]
    MissingArgument {
        command: &'static str,
        usage: &'static str,
    },
}
