use super::error::ConfigError;
use super::{AgentSettings, AppConfig, McpSettings, ModelSettings};
use crate::constants::{CONFIG_PATH, ENV_PATH};
use dotenvy::from_filename;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

static ENV_LOADER: Once = Once::new();

/// Raw configuration structure for deserialization from TOML
#[derive(Debug, Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub agent: RawAgent,
    pub model: Option<RawModel>,
    #[serde(default)]
    pub mcp: RawMcp,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct RawAgent {
    pub max_iterations: Option<u32>,
    pub completion_tool: Option<String>,
    pub auto_approve: Option<bool>,
    pub permission_timeout_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawModel {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub api_path: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct RawMcp {
    pub providers_file: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub startup_grace_ms: Option<u64>,
}

/// Ensures environment variables are loaded from config/.env
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = from_filename(ENV_PATH);
    });
}

/// Load and validate configuration from a file path
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    ensure_env_loaded();
    let config_path = path.unwrap_or_else(|| Path::new(CONFIG_PATH));
    read_config(config_path)
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading rivet configuration file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    parse_config(&content, path)
}

pub(super) fn parse_config(content: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    let parsed: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_and_build(parsed)
}

pub(crate) fn expand(value: &str) -> String {
    shellexpand::full(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn validate_and_build(parsed: RawConfig) -> Result<AppConfig, ConfigError> {
    let raw_model = parsed.model.ok_or(ConfigError::MissingField {
        section: "model",
        field: "endpoint",
    })?;
    let endpoint = raw_model.endpoint.ok_or(ConfigError::MissingField {
        section: "model",
        field: "endpoint",
    })?;
    let model_name = raw_model.model.ok_or(ConfigError::MissingField {
        section: "model",
        field: "model",
    })?;

    let defaults = AgentSettings::default();
    let max_iterations = parsed.agent.max_iterations.unwrap_or(defaults.max_iterations);
    if max_iterations == 0 {
        return Err(ConfigError::Invalid {
            field: "agent.max_iterations",
            reason: "must be at least 1".into(),
        });
    }
    let agent = AgentSettings {
        max_iterations,
        completion_tool: parsed
            .agent
            .completion_tool
            .unwrap_or(defaults.completion_tool),
        auto_approve: parsed.agent.auto_approve.unwrap_or(defaults.auto_approve),
        permission_timeout: parsed
            .agent
            .permission_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.permission_timeout),
        retry_delay: parsed
            .agent
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay),
        system_prompt: parsed.agent.system_prompt,
    };

    let model_defaults = ModelSettings::default();
    let model = ModelSettings {
        endpoint: expand(&endpoint),
        model: model_name,
        api_key_env: raw_model.api_key_env.unwrap_or(model_defaults.api_key_env),
        api_path: raw_model.api_path.unwrap_or(model_defaults.api_path),
        max_tokens: raw_model.max_tokens,
    };

    let mcp_defaults = McpSettings::default();
    let mcp = McpSettings {
        providers_file: parsed
            .mcp
            .providers_file
            .map(|file| PathBuf::from(expand(&file)))
            .unwrap_or(mcp_defaults.providers_file),
        request_timeout: parsed
            .mcp
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(mcp_defaults.request_timeout),
        startup_grace: parsed
            .mcp
            .startup_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(mcp_defaults.startup_grace),
    };

    Ok(AppConfig { agent, model, mcp })
}
