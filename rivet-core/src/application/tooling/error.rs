use crate::application::mcp::ProviderError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool '{tool}' is missing required parameter '{parameter}'")]
    MissingParameter { tool: String, parameter: String },
    #[error("argument '{parameter}' of tool '{tool}' is invalid: {reason}")]
    InvalidArgument {
        tool: String,
        parameter: String,
        reason: String,
    },
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("permission to run '{tool}' was denied")]
    PermissionDenied { tool: String },
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Text fed back to the model as the failed tool result.
    pub fn user_message(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => {
                format!("Error: there is no tool named '{name}'. Use one of the tools listed in your instructions.")
            }
            ToolError::MissingParameter { tool, parameter } => {
                format!("Error: missing value for required parameter '{parameter}' of tool '{tool}'. Retry with the parameter provided.")
            }
            ToolError::PermissionDenied { tool } => {
                format!("The user denied permission to run '{tool}'.")
            }
            other => format!("Error: {other}"),
        }
    }
}
