//! Model traits

use super::types::{ModelError, ModelRequest, ModelStream};
use async_trait::async_trait;

/// A remote language model that answers with a stream of events.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open one response stream for `request`.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;
}
