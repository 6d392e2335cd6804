use super::models::TaskState;
use super::recovery::FailureKind;
use crate::application::tooling::DiffSummary;
use crate::domain::types::{TokenUsage, ToolArguments, ToolResult, ToolUse};

/// Everything a task reports to its host, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Display text of the current model turn. `partial` is false once the
    /// turn has finished streaming.
    Text { content: String, partial: bool },
    ToolCall { call: ToolUse },
    ToolResult { result: ToolResult },
    Diff { tool: String, summary: DiffSummary },
    Usage { turn: TokenUsage, total: TokenUsage },
    Error { kind: FailureKind, message: String },
    /// The task waits until the host answers through
    /// [`super::TaskControl::respond_permission`] or the request times out.
    PermissionRequest {
        request_id: String,
        tool: String,
        arguments: ToolArguments,
    },
    /// Emitted exactly once, as the last event of a task.
    Finished {
        state: TaskState,
        message: Option<String>,
    },
}
