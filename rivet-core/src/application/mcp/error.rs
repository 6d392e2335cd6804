use crate::config::ConfigError;
use thiserror::Error;

/// Failures of a single provider session.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("failed to start provider '{provider}': {message}")]
    Connection { provider: String, message: String },
    #[error("provider '{provider}' sent an invalid message: {message}")]
    Protocol { provider: String, message: String },
    #[error("provider '{provider}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        provider: String,
        code: i64,
        message: String,
    },
    #[error("provider '{provider}' did not answer '{method}' within {timeout_ms}ms")]
    Timeout {
        provider: String,
        method: String,
        timeout_ms: u128,
    },
    #[error("provider '{provider}' is not connected")]
    NotConnected { provider: String },
    #[error("provider '{provider}' has no tool named '{tool}'")]
    ToolNotFound { provider: String, tool: String },
    #[error("provider '{provider}' disconnected")]
    Disconnected { provider: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Connection { provider, .. }
            | ProviderError::Protocol { provider, .. }
            | ProviderError::Rpc { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::NotConnected { provider }
            | ProviderError::ToolNotFound { provider, .. }
            | ProviderError::Disconnected { provider } => provider,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }
}

/// Failures of provider lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no provider with id '{0}'")]
    NotFound(String),
    #[error("provider '{0}' is disabled")]
    Disabled(String),
    #[error("no catalog template named '{0}'")]
    UnknownTemplate(String),
    #[error("provider '{existing}' already runs the same command")]
    DuplicateTemplate { existing: String },
    #[error("failed to persist provider definitions: {0}")]
    Store(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
