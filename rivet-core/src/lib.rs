//! # rivet-core
//!
//! Runtime for an autonomous coding agent: the task loop, the streaming
//! tool-call parser, tool dispatch, and the MCP stdio client with its
//! provider registry.
//!
//! ## Modules
//! - [`agent`] - task orchestrator, permission gate, recovery policy
//! - [`parser`] - incremental parser for XML-style tool invocations
//! - [`tooling`] - capabilities and the [`tooling::ToolDispatcher`] contract
//! - [`mcp`] - protocol client, provider registry and template catalog
//! - [`model`] - streaming model providers
//! - [`config`] - `rivet.toml` loading and provider storage

pub mod application;
pub mod config;
pub mod constants;
pub mod domain;
pub mod infrastructure;

pub use application::{agent, mcp, parser, tooling};
pub use domain::types;
pub use infrastructure::{model, rpc};
