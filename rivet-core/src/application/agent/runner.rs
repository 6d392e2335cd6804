use super::errors::AgentError;
use super::events::AgentEvent;
use super::instructions::compose_system_prompt;
use super::models::{AgentOptions, TaskOutcome, TaskState};
use super::permission::{PermissionDecision, PermissionGate};
use super::recovery::{RecoveryAction, RecoveryPolicy};
use crate::application::parser::{StreamParser, display_text, tool_uses};
use crate::application::tooling::{ToolDispatcher, ToolError};
use crate::domain::types::{ContentBlock, TokenUsage, ToolResult, ToolUse, Turn};
use crate::infrastructure::model::{ModelProvider, ModelRequest, StreamEvent};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle the host keeps to steer a running task.
#[derive(Clone)]
pub struct TaskControl {
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<TaskState>>,
    permissions: Arc<PermissionGate>,
}

impl TaskControl {
    fn new(permissions: PermissionGate) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(TaskState::Idle)),
            permissions: Arc::new(permissions),
        }
    }

    /// Request termination. Returns false when cancellation was already
    /// requested; the task still finishes exactly once.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let denied = self.permissions.deny_all();
        debug!(denied, "Task cancellation requested");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TaskState {
        *self.lock_state()
    }

    pub fn respond_permission(&self, request_id: &str, approved: bool) -> bool {
        self.permissions.respond(request_id, approved)
    }

    fn set_state(&self, next: TaskState) {
        let mut state = self.lock_state();
        if !state.is_terminal() {
            *state = next;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One user request driven through the reason, act, observe loop.
pub struct TaskOrchestrator {
    id: String,
    model: Arc<dyn ModelProvider>,
    tools: Arc<dyn ToolDispatcher>,
    options: AgentOptions,
    recovery: RecoveryPolicy,
    control: TaskControl,
    events: mpsc::UnboundedSender<AgentEvent>,
    history: Vec<Turn>,
    iteration: u32,
    usage: TokenUsage,
}

impl TaskOrchestrator {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolDispatcher>,
        options: AgentOptions,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        let recovery = RecoveryPolicy::new(options.retry_delay);
        let control = TaskControl::new(PermissionGate::new(options.permission_timeout));
        Self {
            id: Uuid::new_v4().to_string(),
            model,
            tools,
            options,
            recovery,
            control,
            events,
            history: Vec::new(),
            iteration: 0,
            usage: TokenUsage::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> TaskControl {
        self.control.clone()
    }

    /// Run the task to a terminal state.
    pub async fn start(mut self, input: impl Into<String>) -> TaskOutcome {
        info!(
            task = %self.id,
            max_iterations = self.options.max_iterations,
            "Task started"
        );
        self.control.set_state(TaskState::Running);
        self.history.push(Turn::user(input));

        let result = self.run_loop().await;
        self.finish(result)
    }

    async fn run_loop(&mut self) -> Result<Option<String>, AgentError> {
        loop {
            if self.control.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if self.iteration >= self.options.max_iterations {
                return Err(AgentError::LoopLimitExceeded {
                    limit: self.options.max_iterations,
                });
            }
            self.iteration += 1;
            // Providers may connect or change their catalog between turns.
            self.tools.refresh().await;
            debug!(task = %self.id, iteration = self.iteration, "Starting model turn");

            let blocks = self.model_turn().await?;
            let calls = tool_uses(&blocks);
            let text = display_text(&blocks);
            if !blocks.is_empty() {
                self.history.push(Turn::assistant(blocks));
            }

            if calls.is_empty() {
                if text.trim().is_empty() {
                    info!(task = %self.id, iteration = self.iteration, "Model produced no content, finishing");
                    return Ok(None);
                }
                debug!(task = %self.id, iteration = self.iteration, "Model answered without a tool, correcting");
                self.history.push(Turn::user(self.no_tool_correction()));
                continue;
            }

            if let Some(message) = self.execute_batch(calls).await? {
                return Ok(Some(message));
            }
        }
    }

    /// One model turn, retried once on a retryable stream failure.
    async fn model_turn(&mut self) -> Result<Vec<ContentBlock>, AgentError> {
        let mut retries = 0;
        loop {
            match self.stream_turn().await {
                Err(AgentError::ModelStream(err)) => {
                    match self.recovery.on_model_failure(&err, retries) {
                        RecoveryAction::Retry { delay } => {
                            retries += 1;
                            warn!(
                                task = %self.id,
                                iteration = self.iteration,
                                %err,
                                delay_ms = delay.as_millis() as u64,
                                "Model turn failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            if self.control.is_cancelled() {
                                return Err(AgentError::Cancelled);
                            }
                        }
                        RecoveryAction::Surface | RecoveryAction::Terminate => {
                            return Err(AgentError::ModelStream(err));
                        }
                    }
                }
                other => return other,
            }
        }
    }

    async fn stream_turn(&mut self) -> Result<Vec<ContentBlock>, AgentError> {
        let capabilities = self.tools.capabilities();
        let specs: Vec<_> = capabilities.iter().map(|capability| capability.spec()).collect();
        let request = ModelRequest {
            system_prompt: compose_system_prompt(
                &capabilities,
                &self.options.completion_tool,
                self.options.system_prompt.as_deref(),
            ),
            history: self.history.clone(),
        };

        let mut stream = self.model.stream(request).await?;
        let mut parser = StreamParser::new(&specs);
        let mut shown = String::new();
        let mut announced = HashSet::new();
        let mut turn_usage = TokenUsage::default();

        while let Some(event) = stream.next().await {
            if self.control.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            match event? {
                StreamEvent::Text(fragment) => {
                    parser.feed(&fragment);
                    let snapshot = parser.blocks();
                    let text = display_text(&snapshot);
                    if text != shown {
                        shown = text.clone();
                        self.emit(AgentEvent::Text {
                            content: text,
                            partial: true,
                        })?;
                    }
                    // Calls only ever append, so a position names one call.
                    for (position, call) in tool_uses(&snapshot).into_iter().enumerate() {
                        if call.partial && announced.insert(position) {
                            self.emit(AgentEvent::ToolCall { call })?;
                        }
                    }
                }
                StreamEvent::Usage(usage) => turn_usage = usage,
            }
        }

        let blocks = parser.finalize();
        let text = display_text(&blocks);
        if !text.is_empty() {
            self.emit(AgentEvent::Text {
                content: text,
                partial: false,
            })?;
        }
        self.usage.accumulate(turn_usage);
        self.emit(AgentEvent::Usage {
            turn: turn_usage,
            total: self.usage,
        })?;
        Ok(blocks)
    }

    /// Dispatch `calls` in order. Returns the completion message when the
    /// completion tool ran.
    async fn execute_batch(&mut self, calls: Vec<ToolUse>) -> Result<Option<String>, AgentError> {
        self.control.set_state(TaskState::ExecutingTools);
        let mut completion = None;

        for call in calls {
            if self.control.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let result = self.dispatch(&call).await?;
            if call.name == self.options.completion_tool {
                info!(task = %self.id, iteration = self.iteration, "Completion tool invoked");
                completion = Some((!result.is_error).then(|| result.render()));
            }
        }

        self.control.set_state(TaskState::Running);
        // A failed completion call still ends the task, without a message.
        Ok(completion.map(Option::unwrap_or_default))
    }

    async fn dispatch(&mut self, call: &ToolUse) -> Result<ToolResult, AgentError> {
        self.emit(AgentEvent::ToolCall { call: call.clone() })?;

        let outcome = match self.authorize(call).await? {
            PermissionDecision::Approved => self.tools.execute(call).await,
            PermissionDecision::Denied => Err(ToolError::PermissionDenied {
                tool: call.name.clone(),
            }),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let kind = RecoveryPolicy::classify_tool(&err);
                let action = self.recovery.on_tool_failure(&err);
                warn!(task = %self.id, tool = %call.name, ?kind, ?action, %err, "Tool failed");
                ToolResult::failure(call, err.user_message())
            }
        };

        self.history.push(Turn::tool_result(result.clone()));
        self.emit(AgentEvent::ToolResult {
            result: result.clone(),
        })?;

        if let Some(tracker) = self.tools.change_tracker() {
            if let Some(summary) = tracker.after_tool(call, &result) {
                if !summary.is_empty() {
                    self.emit(AgentEvent::Diff {
                        tool: call.name.clone(),
                        summary,
                    })?;
                }
            }
        }
        Ok(result)
    }

    async fn authorize(&self, call: &ToolUse) -> Result<PermissionDecision, AgentError> {
        let needs_approval = self
            .tools
            .lookup(&call.name)
            .is_some_and(|capability| capability.requires_approval);
        if !needs_approval || self.options.auto_approve {
            return Ok(PermissionDecision::Approved);
        }

        let gate = Arc::clone(&self.control.permissions);
        let (request_id, decision) = gate.open();
        if self.control.is_cancelled() {
            gate.respond(&request_id, false);
            return Ok(PermissionDecision::Denied);
        }
        self.emit(AgentEvent::PermissionRequest {
            request_id: request_id.clone(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
        })?;
        let decision = gate.wait(&request_id, decision).await;
        debug!(task = %self.id, tool = %call.name, ?decision, "Permission resolved");
        Ok(decision)
    }

    fn finish(self, result: Result<Option<String>, AgentError>) -> TaskOutcome {
        let (state, message) = match result {
            Ok(message) => (
                TaskState::Completed,
                message.filter(|message| !message.is_empty()),
            ),
            Err(AgentError::Cancelled) => (TaskState::Cancelled, None),
            Err(AgentError::HostClosed) => (TaskState::Failed, None),
            Err(err) => {
                let message = err.user_message();
                if let Some(kind) = RecoveryPolicy::classify(&err) {
                    warn!(task = %self.id, ?kind, %err, "Task ended early");
                    let _ = self.events.send(AgentEvent::Error {
                        kind,
                        message: message.clone(),
                    });
                }
                (TaskState::Completed, Some(message))
            }
        };

        self.control.set_state(state);
        let _ = self.events.send(AgentEvent::Finished {
            state,
            message: message.clone(),
        });
        info!(
            task = %self.id,
            state = state.as_str(),
            iterations = self.iteration,
            tokens = self.usage.total(),
            "Task finished"
        );

        TaskOutcome {
            task_id: self.id,
            state,
            iterations: self.iteration,
            message,
            history: self.history,
            usage: self.usage,
        }
    }

    fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        self.events.send(event).map_err(|_| AgentError::HostClosed)
    }

    fn no_tool_correction(&self) -> String {
        format!(
            "[ERROR] You did not use a tool in your previous response. Every response must invoke one of the available tools. If the task is finished, use {} with your final result.",
            self.options.completion_tool
        )
    }
}
