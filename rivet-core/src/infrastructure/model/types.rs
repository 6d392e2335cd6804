//! Model types - Request, stream events and errors

use crate::domain::types::{TokenUsage, Turn};
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Everything the provider needs for one model turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<Turn>,
}

/// Incremental output of a model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Usage(TokenUsage),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ModelError>> + Send>>;

/// Model errors
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("transport error calling model endpoint: {0}")]
    Transport(String),
    #[error("model endpoint timed out")]
    Timeout,
    #[error("model endpoint returned status {status}")]
    Status { status: u16 },
    #[error("model stream was malformed: {0}")]
    Protocol(String),
    #[error("environment variable '{env}' with the API key is not set")]
    MissingApiKey { env: String },
}

impl ModelError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether a second attempt with the same history could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(_) | ModelError::Timeout | ModelError::Protocol(_) => true,
            ModelError::Status { status } => *status == 429 || *status >= 500,
            ModelError::MissingApiKey { .. } => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ModelError::Transport(_) => "Could not reach the model endpoint.".to_string(),
            ModelError::Timeout => "The model endpoint did not answer in time.".to_string(),
            ModelError::Status { status } => {
                format!("The model endpoint rejected the request (HTTP {status}).")
            }
            ModelError::Protocol(_) => "The model returned a malformed stream.".to_string(),
            ModelError::MissingApiKey { env } => {
                format!("Set {env} to the API key of the model endpoint.")
            }
        }
    }
}
