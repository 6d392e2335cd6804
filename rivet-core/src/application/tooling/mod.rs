//! Tool dispatch: capabilities resolved by name, built-in or provider-backed.

pub mod builtin;
pub mod error;
pub mod interface;
pub mod provider_tools;
pub mod registry;

pub use error::ToolError;
pub use interface::{
    Capability, ChangeTracker, DiffSummary, FileChange, ParameterKind, ParameterSpec,
    ToolDispatcher, ToolExecutor, ToolFuture, ToolSource,
};
pub use registry::ToolRegistry;
