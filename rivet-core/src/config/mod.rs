//! # Configuration
//!
//! `rivet.toml` holds the agent, model and MCP settings. Provider definitions
//! live in their own file behind the [`ProviderStore`] trait so the registry
//! can rewrite them without touching the rest of the configuration.

pub mod error;
pub mod loader;
pub mod provider;

pub use error::ConfigError;
pub use provider::{MemoryProviderStore, ProviderDefinition, ProviderStore, TomlProviderStore};

use crate::constants::{COMPLETION_TOOL, PROVIDERS_PATH};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_ITERATIONS: u32 = 25;
const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub agent: AgentSettings,
    pub model: ModelSettings,
    pub mcp: McpSettings,
}

impl AppConfig {
    /// Load configuration from `path`, or from [`crate::constants::CONFIG_PATH`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        loader::load_config(path)
    }

    /// Parse configuration from an in-memory TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        loader::parse_config(content, Path::new("<memory>"))
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub completion_tool: String,
    pub auto_approve: bool,
    pub permission_timeout: Duration,
    pub retry_delay: Duration,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            completion_tool: COMPLETION_TOOL.to_string(),
            auto_approve: false,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub api_path: String,
    pub max_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: String::new(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_path: "/v1/chat/completions".to_string(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpSettings {
    pub providers_file: PathBuf,
    pub request_timeout: Duration,
    pub startup_grace: Duration,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            providers_file: PathBuf::from(PROVIDERS_PATH),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }
}
