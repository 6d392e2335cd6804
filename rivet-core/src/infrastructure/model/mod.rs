//! Model infrastructure module
//!
//! # Structure
//! - `types` - Request, stream event and error types
//! - `traits` - the `ModelProvider` streaming contract
//! - `adapter` - history to chat-message conversion
//! - `openai` - OpenAI-compatible streaming client

pub mod adapter;
pub mod openai;
pub mod traits;
pub mod types;

pub use openai::OpenAiCompatibleClient;
pub use traits::ModelProvider;
pub use types::{ModelError, ModelRequest, ModelStream, StreamEvent};
