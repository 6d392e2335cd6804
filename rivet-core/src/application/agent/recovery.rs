//! Failure classification and the retry/surface/terminate decision.

use super::errors::AgentError;
use crate::application::mcp::ProviderError;
use crate::application::tooling::ToolError;
use crate::infrastructure::model::ModelError;
use std::time::Duration;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const MODEL_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unreachable endpoint, dropped connection or timeout.
    Transport,
    /// Malformed or error-carrying message.
    Protocol,
    ToolNotFound,
    PermissionDenied,
    LoopLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Repeat the model turn with unchanged history after `delay`.
    Retry { delay: Duration },
    /// Feed the failure back to the model as a failed tool result.
    Surface,
    /// End the task cleanly with an error notice.
    Terminate,
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    retry_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl RecoveryPolicy {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn classify_model(error: &ModelError) -> FailureKind {
        match error {
            ModelError::Protocol(_) => FailureKind::Protocol,
            ModelError::Transport(_)
            | ModelError::Timeout
            | ModelError::Status { .. }
            | ModelError::MissingApiKey { .. } => FailureKind::Transport,
        }
    }

    pub fn classify_tool(error: &ToolError) -> FailureKind {
        match error {
            ToolError::UnknownTool(_) => FailureKind::ToolNotFound,
            ToolError::PermissionDenied { .. } => FailureKind::PermissionDenied,
            ToolError::Provider(err) => match err {
                ProviderError::ToolNotFound { .. } => FailureKind::ToolNotFound,
                ProviderError::Protocol { .. } | ProviderError::Rpc { .. } => {
                    FailureKind::Protocol
                }
                ProviderError::Connection { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::NotConnected { .. }
                | ProviderError::Disconnected { .. } => FailureKind::Transport,
            },
            ToolError::MissingParameter { .. }
            | ToolError::InvalidArgument { .. }
            | ToolError::Execution { .. } => FailureKind::Protocol,
        }
    }

    pub fn classify(error: &AgentError) -> Option<FailureKind> {
        match error {
            AgentError::ModelStream(err) => Some(Self::classify_model(err)),
            AgentError::Tool(err) => Some(Self::classify_tool(err)),
            AgentError::LoopLimitExceeded { .. } => Some(FailureKind::LoopLimitExceeded),
            AgentError::Cancelled | AgentError::HostClosed => None,
        }
    }

    /// Decision for a failed model turn after `retries` earlier retries of
    /// the same turn.
    pub fn on_model_failure(&self, error: &ModelError, retries: u32) -> RecoveryAction {
        if error.is_retryable() && retries < MODEL_RETRIES {
            RecoveryAction::Retry {
                delay: self.retry_delay,
            }
        } else {
            RecoveryAction::Terminate
        }
    }

    /// Tool failures never end the task; the model sees them and may correct
    /// itself.
    pub fn on_tool_failure(&self, _error: &ToolError) -> RecoveryAction {
        RecoveryAction::Surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_transport_failure_is_retried_once() {
        let policy = RecoveryPolicy::default();
        let error = ModelError::transport("connection reset");
        assert_eq!(
            policy.on_model_failure(&error, 0),
            RecoveryAction::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(policy.on_model_failure(&error, 1), RecoveryAction::Terminate);
    }

    #[test]
    fn non_retryable_model_failure_terminates() {
        let policy = RecoveryPolicy::default();
        let error = ModelError::Status { status: 401 };
        assert_eq!(policy.on_model_failure(&error, 0), RecoveryAction::Terminate);
        assert_eq!(RecoveryPolicy::classify_model(&error), FailureKind::Transport);
    }

    #[test]
    fn tool_failures_are_classified_and_surfaced() {
        let policy = RecoveryPolicy::default();
        let unknown = ToolError::UnknownTool("ghost".into());
        assert_eq!(RecoveryPolicy::classify_tool(&unknown), FailureKind::ToolNotFound);
        assert_eq!(policy.on_tool_failure(&unknown), RecoveryAction::Surface);

        let timeout = ToolError::Provider(ProviderError::Timeout {
            provider: "p".into(),
            method: "tools/call".into(),
            timeout_ms: 30_000,
        });
        assert_eq!(RecoveryPolicy::classify_tool(&timeout), FailureKind::Transport);

        let denied = ToolError::PermissionDenied { tool: "x".into() };
        assert_eq!(RecoveryPolicy::classify_tool(&denied), FailureKind::PermissionDenied);
    }

    #[test]
    fn loop_limit_is_a_checked_condition() {
        let error = AgentError::LoopLimitExceeded { limit: 3 };
        assert_eq!(
            RecoveryPolicy::classify(&error),
            Some(FailureKind::LoopLimitExceeded)
        );
        assert_eq!(RecoveryPolicy::classify(&AgentError::Cancelled), None);
    }
}
