use crate::application::tooling::ToolError;
use crate::infrastructure::model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    ModelStream(#[from] ModelError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("task reached its limit of {limit} iterations")]
    LoopLimitExceeded { limit: u32 },
    #[error("task was cancelled")]
    Cancelled,
    #[error("the host stopped listening for agent events")]
    HostClosed,
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::ModelStream(err) => err.user_message(),
            AgentError::Tool(err) => err.user_message(),
            AgentError::LoopLimitExceeded { limit } => format!(
                "Stopped after {limit} iterations without finishing. Raise the iteration limit or split the request into smaller steps."
            ),
            AgentError::Cancelled => "The task was cancelled.".to_string(),
            AgentError::HostClosed => "The task lost its output channel.".to_string(),
        }
    }
}
