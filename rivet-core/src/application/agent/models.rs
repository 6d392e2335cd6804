use crate::config::AgentSettings;
use crate::constants::COMPLETION_TOOL;
use crate::domain::types::{TokenUsage, Turn};
use std::time::Duration;

const DEFAULT_MAX_ITERATIONS: u32 = 25;
const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_iterations: u32,
    pub completion_tool: String,
    pub auto_approve: bool,
    pub permission_timeout: Duration,
    pub retry_delay: Duration,
    pub system_prompt: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            completion_tool: COMPLETION_TOOL.to_string(),
            auto_approve: false,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            system_prompt: None,
        }
    }
}

impl From<&AgentSettings> for AgentOptions {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            completion_tool: settings.completion_tool.clone(),
            auto_approve: settings.auto_approve,
            permission_timeout: settings.permission_timeout,
            retry_delay: settings.retry_delay,
            system_prompt: settings.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    ExecutingTools,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::ExecutingTools => "executing_tools",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        }
    }
}

/// What a finished task leaves behind.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub state: TaskState,
    pub iterations: u32,
    pub message: Option<String>,
    pub history: Vec<Turn>,
    pub usage: TokenUsage,
}
