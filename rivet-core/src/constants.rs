//! Application constants
//!
//! Single source of truth for paths and other constants.

/// Default configuration file path
pub const CONFIG_PATH: &str = "config/rivet.toml";

/// Default environment file path
pub const ENV_PATH: &str = "config/.env";

/// Default provider definitions file
pub const PROVIDERS_PATH: &str = "config/providers.toml";

/// Placeholder substituted with the workspace directory when installing templates
pub const WORKSPACE_PLACEHOLDER: &str = "${workspaceFolder}";

/// Name of the built-in tool that ends a task
pub const COMPLETION_TOOL: &str = "attempt_completion";

/// MCP protocol revision announced during `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
