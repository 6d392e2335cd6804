//! Tool providers spoken to over line-delimited JSON-RPC on stdio.
//!
//! # Structure
//! - `client` - one provider subprocess and its session
//! - `pending` - request/response correlation table
//! - `state` - connection status and session snapshots
//! - `registry` - provider definitions, live clients and the merged tool catalog
//! - `catalog` - installable provider templates

pub mod catalog;
pub mod client;
pub mod error;
mod pending;
pub mod registry;
pub mod state;

pub use catalog::ProviderTemplate;
pub use client::{ClientOptions, ProtocolClient};
pub use error::{ProviderError, RegistryError};
pub use registry::{
    ProviderRegistry, ProviderTool, provider_namespace, provider_namespaces, qualified_tool_name,
};
pub use state::{ConnectionStatus, SessionState, ToolInfo};
