use super::error::ConfigError;
use super::loader::expand;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// A configured tool-provider subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_connect: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderDefinition {
    /// Build a definition with a freshly generated id.
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: generate_provider_id(),
            name: name.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
            enabled: true,
            auto_connect: false,
        }
    }

    /// Command with `~` and environment variables expanded.
    pub fn resolved_command(&self) -> String {
        expand(&self.command)
    }

    pub fn resolved_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| expand(arg)).collect()
    }

    /// Same launch command and arguments as `other`.
    pub fn same_launch(&self, other: &ProviderDefinition) -> bool {
        self.command == other.command && self.args == other.args
    }
}

/// `provider-<millis>-<random>`
pub fn generate_provider_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("provider-{}-{}", Utc::now().timestamp_millis(), &random[..9])
}

/// Persistence boundary for provider definitions.
pub trait ProviderStore: Send + Sync {
    fn load(&self) -> Result<Vec<ProviderDefinition>, ConfigError>;
    fn save(&self, providers: &[ProviderDefinition]) -> Result<(), ConfigError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProvidersFile {
    #[serde(default)]
    providers: Vec<ProviderDefinition>,
}

/// Stores definitions as a `[[providers]]` array in a TOML file.
#[derive(Debug, Clone)]
pub struct TomlProviderStore {
    path: PathBuf,
}

impl TomlProviderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProviderStore for TomlProviderStore {
    fn load(&self) -> Result<Vec<ProviderDefinition>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No provider file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let parsed: ProvidersFile =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(parsed.providers)
    }

    fn save(&self, providers: &[ProviderDefinition]) -> Result<(), ConfigError> {
        let file = ProvidersFile {
            providers: providers.to_vec(),
        };
        let raw = toml::to_string_pretty(&file).map_err(|source| ConfigError::Serialize {
            what: "provider definitions",
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, raw).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            count = providers.len(),
            "Saved provider definitions"
        );
        Ok(())
    }
}

/// In-process store used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryProviderStore {
    providers: Mutex<Vec<ProviderDefinition>>,
}

impl MemoryProviderStore {
    pub fn new(providers: Vec<ProviderDefinition>) -> Self {
        Self {
            providers: Mutex::new(providers),
        }
    }

    pub fn snapshot(&self) -> Vec<ProviderDefinition> {
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ProviderStore for MemoryProviderStore {
    fn load(&self) -> Result<Vec<ProviderDefinition>, ConfigError> {
        Ok(self.snapshot())
    }

    fn save(&self, providers: &[ProviderDefinition]) -> Result<(), ConfigError> {
        *self
            .providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = providers.to_vec();
        Ok(())
    }
}
