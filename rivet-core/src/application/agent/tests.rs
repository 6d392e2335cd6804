use super::*;
use crate::application::tooling::{
    Capability, ChangeTracker, DiffSummary, FileChange, ParameterSpec, ToolDispatcher,
    ToolError, ToolExecutor, ToolRegistry,
};
use crate::domain::types::{ToolContent, ToolResult, ToolUse, TokenUsage, TurnPayload};
use crate::infrastructure::model::{ModelError, ModelProvider, ModelRequest, ModelStream, StreamEvent};
use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

enum Reply {
    Text(String),
    Fail(ModelError),
    FailMidway(String, ModelError),
    Fragments(Vec<String>),
}

#[derive(Clone)]
struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    fallback: Option<String>,
    recordings: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            fallback: None,
            recordings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Reply::Text(text.to_string())).collect())
    }

    fn always(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new(Vec::new())
        }
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.recordings.lock().await.clone()
    }
}

/// Split `text` into fragments of `size` characters.
fn chunked(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
}

fn usage() -> StreamEvent {
    StreamEvent::Usage(TokenUsage {
        input_tokens: 10,
        output_tokens: 5,
        cache_read_tokens: 0,
    })
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        self.recordings.lock().await.push(request);
        let reply = self.replies.lock().await.pop_front();
        let reply = match reply {
            Some(reply) => reply,
            None => Reply::Text(self.fallback.clone().unwrap_or_default()),
        };
        match reply {
            Reply::Fail(err) => Err(err),
            Reply::Text(text) => {
                let mut events: Vec<Result<StreamEvent, ModelError>> = chunked(&text, 7)
                    .into_iter()
                    .map(|chunk| Ok(StreamEvent::Text(chunk)))
                    .collect();
                events.push(Ok(usage()));
                Ok(Box::pin(stream::iter(events)))
            }
            Reply::Fragments(fragments) => {
                let events: Vec<Result<StreamEvent, ModelError>> = fragments
                    .into_iter()
                    .map(|fragment| Ok(StreamEvent::Text(fragment)))
                    .collect();
                Ok(Box::pin(stream::iter(events)))
            }
            Reply::FailMidway(text, err) => {
                let events = vec![Ok(StreamEvent::Text(text)), Err(err)];
                Ok(Box::pin(stream::iter(events)))
            }
        }
    }
}

fn echo_tool() -> Capability {
    let executor: ToolExecutor = Arc::new(|call| {
        let text = call.argument("text").unwrap_or_default().to_string();
        Box::pin(async move { Ok(ToolContent::Text(format!("echo: {text}"))) })
    });
    Capability::new("echo", "Echo text back.", executor)
        .with_parameter(ParameterSpec::required("text", "Text to echo"))
}

fn tools() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::with_builtins("attempt_completion");
    registry.register(echo_tool());
    Arc::new(registry)
}

fn options(max_iterations: u32) -> AgentOptions {
    AgentOptions {
        max_iterations,
        ..AgentOptions::default()
    }
}

fn task(
    model: &ScriptedModel,
    tools: Arc<ToolRegistry>,
    options: AgentOptions,
) -> (TaskOrchestrator, mpsc::UnboundedReceiver<AgentEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = TaskOrchestrator::new(Arc::new(model.clone()), tools, options, tx);
    (orchestrator, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn finished(events: &[AgentEvent]) -> Vec<&AgentEvent> {
    events
        .iter()
        .filter(|event| matches!(event, AgentEvent::Finished { .. }))
        .collect()
}

fn tool_results(events: &[AgentEvent]) -> Vec<ToolResult> {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::ToolResult { result } => Some(result.clone()),
            _ => None,
        })
        .collect()
}

const ECHO_THEN_COMPLETE: &str = "I'll echo first.\n<echo>\n<text>hello</text>\n</echo>\n<attempt_completion>\n<result>all done</result>\n</attempt_completion>";

#[tokio::test]
async fn cap_of_one_with_text_only_ends_with_limit_notice() {
    let model = ScriptedModel::texts(&["Sure, I can help with that."]);
    let (orchestrator, mut rx) = task(&model, tools(), options(1));

    let outcome = orchestrator.start("fix the bug").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(model.requests().await.len(), 1);
    let message = outcome.message.expect("limit notice");
    assert!(message.contains("1 iterations"), "{message}");

    // user input, assistant text, corrective instruction
    assert_eq!(outcome.history.len(), 3);
    match &outcome.history[2].payload {
        TurnPayload::Text { text } => assert!(text.contains("did not use a tool")),
        other => panic!("unexpected payload {other:?}"),
    }

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        AgentEvent::Error {
            kind: FailureKind::LoopLimitExceeded,
            ..
        }
    )));
    assert_eq!(finished(&events).len(), 1);
}

#[tokio::test]
async fn iteration_cap_bounds_model_calls() {
    for cap in 1..=4u32 {
        let model = ScriptedModel::always("Still thinking about it.");
        let (orchestrator, _rx) = task(&model, tools(), options(cap));
        let outcome = orchestrator.start("loop forever").await;
        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(outcome.iterations, cap);
        assert_eq!(model.requests().await.len(), cap as usize);
    }
}

#[tokio::test]
async fn tools_run_in_order_and_completion_ends_after_batch() {
    let model = ScriptedModel::texts(&[ECHO_THEN_COMPLETE]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));

    let outcome = orchestrator.start("say hello").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(outcome.message.as_deref(), Some("all done"));
    assert_eq!(model.requests().await.len(), 1);

    let events = drain(&mut rx);
    let results = tool_results(&events);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool, "echo");
    assert_eq!(results[0].render(), "echo: hello");
    assert_eq!(results[1].tool, "attempt_completion");

    let last_result = events
        .iter()
        .rposition(|event| matches!(event, AgentEvent::ToolResult { .. }))
        .expect("tool results");
    let finish = events
        .iter()
        .position(|event| matches!(event, AgentEvent::Finished { .. }))
        .expect("finished");
    assert!(finish > last_result);
    assert_eq!(finish, events.len() - 1);

    let recorded: Vec<_> = outcome
        .history
        .iter()
        .filter_map(|turn| match &turn.payload {
            TurnPayload::ToolResult { result } => Some(result.tool.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(recorded, vec!["echo", "attempt_completion"]);
}

#[tokio::test]
async fn streamed_text_is_partial_until_the_turn_ends() {
    let model = ScriptedModel::texts(&[ECHO_THEN_COMPLETE]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));
    orchestrator.start("say hello").await;

    let texts: Vec<(String, bool)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::Text { content, partial } => Some((content, partial)),
            _ => None,
        })
        .collect();
    assert!(texts.len() >= 2);
    assert!(texts[..texts.len() - 1].iter().all(|(_, partial)| *partial));
    assert_eq!(texts.last(), Some(&("I'll echo first.".to_string(), false)));
    assert!(texts.iter().all(|(content, _)| !content.contains('<')));
}

#[tokio::test]
async fn call_streaming_after_a_finished_call_is_announced() {
    let model = ScriptedModel::new(vec![Reply::Fragments(vec![
        "<echo><text>a</text></echo>\n<echo><text>b".to_string(),
        "</text></echo>\n<attempt_completion><result>ok</result></attempt_completion>".to_string(),
    ])]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));
    let outcome = orchestrator.start("echo twice").await;
    assert_eq!(outcome.state, TaskState::Completed);

    let partial: Vec<ToolUse> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::ToolCall { call } if call.partial => Some(call),
            _ => None,
        })
        .collect();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].name, "echo");
    assert_eq!(partial[0].argument("text"), Some("b"));
    assert_eq!(partial[0].id.as_deref(), Some("toolu_02"));
}

/// Delegates to a registry and registers `late` once it has been refreshed
/// `after` times, the way a provider that connects mid-task shows up.
struct LateTools {
    inner: Arc<ToolRegistry>,
    refreshes: std::sync::atomic::AtomicUsize,
    after: usize,
}

#[async_trait]
impl ToolDispatcher for LateTools {
    fn register(&self, capability: Capability) {
        self.inner.register(capability);
    }

    fn lookup(&self, name: &str) -> Option<Capability> {
        self.inner.lookup(name)
    }

    fn names(&self) -> Vec<String> {
        self.inner.names()
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.inner.capabilities()
    }

    async fn execute(&self, call: &ToolUse) -> Result<ToolResult, ToolError> {
        self.inner.execute(call).await
    }

    fn set_change_tracker(&self, tracker: Arc<dyn ChangeTracker>) {
        self.inner.set_change_tracker(tracker);
    }

    fn clear_change_tracker(&self) {
        self.inner.clear_change_tracker();
    }

    fn change_tracker(&self) -> Option<Arc<dyn ChangeTracker>> {
        self.inner.change_tracker()
    }

    async fn refresh(&self) {
        let count = self.refreshes.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if count == self.after {
            let executor: ToolExecutor =
                Arc::new(|_| Box::pin(async { Ok(ToolContent::Text("late answer".into())) }));
            self.inner.register(Capability::new("late", "Arrived mid-task.", executor));
        }
    }
}

#[tokio::test]
async fn tools_are_refreshed_before_every_turn() {
    let model = ScriptedModel::texts(&[
        "<echo><text>warm up</text></echo>",
        "<late></late>",
        "<attempt_completion><result>done</result></attempt_completion>",
    ]);
    let tools = Arc::new(LateTools {
        inner: self::tools(),
        refreshes: std::sync::atomic::AtomicUsize::new(0),
        after: 2,
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let orchestrator =
        TaskOrchestrator::new(Arc::new(model.clone()), tools.clone(), options(5), tx);

    let outcome = orchestrator.start("use the late tool").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(tools.refreshes.load(std::sync::atomic::Ordering::SeqCst), 3);
    let requests = model.requests().await;
    assert!(!requests[0].system_prompt.contains("## late"));
    assert!(requests[1].system_prompt.contains("## late"));
    let late = outcome.history.iter().find_map(|turn| match &turn.payload {
        TurnPayload::ToolResult { result } if result.tool == "late" => Some(result.clone()),
        _ => None,
    });
    let late = late.expect("late result recorded");
    assert!(!late.is_error);
    assert_eq!(late.render(), "late answer");
}

#[tokio::test]
async fn usage_is_reported_after_every_turn() {
    let model = ScriptedModel::texts(&["No tools here.", ECHO_THEN_COMPLETE]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));
    let outcome = orchestrator.start("hi").await;

    let usages: Vec<(TokenUsage, TokenUsage)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::Usage { turn, total } => Some((turn, total)),
            _ => None,
        })
        .collect();
    assert_eq!(usages.len(), 2);
    assert_eq!(usages[1].1.total(), 30);
    assert_eq!(outcome.usage.total(), 30);
}

#[tokio::test]
async fn empty_response_completes() {
    let model = ScriptedModel::texts(&["   "]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));
    let outcome = orchestrator.start("anything").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert!(outcome.message.is_none());
    assert_eq!(model.requests().await.len(), 1);
    assert_eq!(finished(&drain(&mut rx)).len(), 1);
}

#[tokio::test]
async fn cancel_is_idempotent_and_finishes_once() {
    let model = ScriptedModel::texts(&[ECHO_THEN_COMPLETE]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));
    let control = orchestrator.control();

    assert!(control.cancel());
    assert!(!control.cancel());
    let outcome = orchestrator.start("never runs").await;
    assert!(!control.cancel());

    assert_eq!(outcome.state, TaskState::Cancelled);
    assert_eq!(control.state(), TaskState::Cancelled);
    assert!(model.requests().await.is_empty());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        AgentEvent::Finished {
            state: TaskState::Cancelled,
            message: None
        }
    );
}

#[tokio::test]
async fn cancel_stops_the_batch_before_the_next_tool() {
    let model = ScriptedModel::texts(&[
        "<stop>\n</stop>\n<echo>\n<text>too late</text>\n</echo>",
    ]);
    let registry = tools();
    let (orchestrator, mut rx) = task(&model, registry.clone(), options(5));
    let control = orchestrator.control();

    let canceller = control.clone();
    let executor: ToolExecutor = Arc::new(move |_call| {
        canceller.cancel();
        Box::pin(async { Ok(ToolContent::Text("stopping".into())) })
    });
    registry.register(Capability::new("stop", "Cancel the task.", executor));

    let outcome = orchestrator.start("stop please").await;

    assert_eq!(outcome.state, TaskState::Cancelled);
    let results = tool_results(&drain(&mut rx));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool, "stop");
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_retried_once_with_same_history() {
    let model = ScriptedModel::new(vec![
        Reply::Fail(ModelError::transport("connection reset")),
        Reply::Text(ECHO_THEN_COMPLETE.to_string()),
    ]);
    let (orchestrator, _rx) = task(&model, tools(), options(5));

    let outcome = orchestrator.start("say hello").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(outcome.message.as_deref(), Some("all done"));
    assert_eq!(outcome.iterations, 1);
    let requests = model.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].history, requests[1].history);
}

#[tokio::test(start_paused = true)]
async fn second_failure_ends_the_task_with_a_notice() {
    let model = ScriptedModel::new(vec![
        Reply::FailMidway("partial".into(), ModelError::Timeout),
        Reply::Fail(ModelError::Timeout),
        Reply::Text(ECHO_THEN_COMPLETE.to_string()),
    ]);
    let (orchestrator, mut rx) = task(&model, tools(), options(5));

    let outcome = orchestrator.start("say hello").await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert!(outcome.message.is_some());
    assert_eq!(model.requests().await.len(), 2);
    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        AgentEvent::Error {
            kind: FailureKind::Transport,
            ..
        }
    )));
    assert_eq!(finished(&events).len(), 1);
}

#[tokio::test]
async fn non_retryable_failure_is_not_retried() {
    let model = ScriptedModel::new(vec![Reply::Fail(ModelError::Status { status: 401 })]);
    let (orchestrator, _rx) = task(&model, tools(), options(5));
    let outcome = orchestrator.start("hi").await;
    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(model.requests().await.len(), 1);
}

#[tokio::test]
async fn missing_parameter_is_fed_back_to_the_model() {
    let model = ScriptedModel::texts(&[
        "<echo>\n</echo>",
        "<attempt_completion><result>fixed</result></attempt_completion>",
    ]);
    let (orchestrator, _rx) = task(&model, tools(), options(5));

    let outcome = orchestrator.start("echo").await;

    assert_eq!(outcome.state, TaskState::Completed);
    let requests = model.requests().await;
    assert_eq!(requests.len(), 2);
    let fed_back = requests[1]
        .history
        .iter()
        .find_map(|turn| match &turn.payload {
            TurnPayload::ToolResult { result } => Some(result.clone()),
            _ => None,
        })
        .expect("tool result in history");
    assert!(fed_back.is_error);
    assert!(fed_back.render().contains("'text'"));
}

#[tokio::test]
async fn permission_denial_becomes_a_failed_result() {
    let model = ScriptedModel::texts(&[
        "<guarded>\n<path>a.txt</path>\n</guarded>",
        "<attempt_completion><result>gave up</result></attempt_completion>",
    ]);
    let registry = tools();
    let executor: ToolExecutor =
        Arc::new(|_call| Box::pin(async { Ok(ToolContent::Text("ran".into())) }));
    registry.register(
        Capability::new("guarded", "Needs approval.", executor)
            .with_parameter(ParameterSpec::required("path", "Target"))
            .with_approval(true),
    );
    let (orchestrator, mut rx) = task(&model, registry, options(5));
    let control = orchestrator.control();

    let host = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AgentEvent::PermissionRequest { request_id, tool, .. } = &event {
                assert_eq!(tool, "guarded");
                assert!(control.respond_permission(request_id, false));
            }
            seen.push(event);
        }
        seen
    });

    let outcome = orchestrator.start("touch a.txt").await;
    let events = host.await.expect("host task");

    assert_eq!(outcome.state, TaskState::Completed);
    let results = tool_results(&events);
    assert_eq!(results[0].tool, "guarded");
    assert!(results[0].is_error);
    assert!(results[0].render().contains("denied"));
}

#[tokio::test(start_paused = true)]
async fn unanswered_permission_is_denied_after_the_ceiling() {
    let model = ScriptedModel::texts(&["<guarded>\n</guarded>"]);
    let registry = tools();
    let executor: ToolExecutor =
        Arc::new(|_call| Box::pin(async { Ok(ToolContent::Text("ran".into())) }));
    registry.register(Capability::new("guarded", "Needs approval.", executor).with_approval(true));
    let opts = AgentOptions {
        permission_timeout: Duration::from_secs(300),
        ..options(2)
    };
    let (orchestrator, mut rx) = task(&model, registry, opts);

    let outcome = orchestrator.start("go").await;

    assert_eq!(outcome.state, TaskState::Completed);
    let results = tool_results(&drain(&mut rx));
    assert!(results[0].is_error);
}

#[tokio::test]
async fn auto_approve_skips_the_prompt() {
    let model = ScriptedModel::texts(&[
        "<guarded>\n</guarded>\n<attempt_completion><result>ok</result></attempt_completion>",
    ]);
    let registry = tools();
    let executor: ToolExecutor =
        Arc::new(|_call| Box::pin(async { Ok(ToolContent::Text("ran".into())) }));
    registry.register(Capability::new("guarded", "Needs approval.", executor).with_approval(true));
    let opts = AgentOptions {
        auto_approve: true,
        ..options(2)
    };
    let (orchestrator, mut rx) = task(&model, registry, opts);

    orchestrator.start("go").await;

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|event| matches!(event, AgentEvent::PermissionRequest { .. })));
    assert_eq!(tool_results(&events)[0].render(), "ran");
}

struct OneFileTracker;

impl ChangeTracker for OneFileTracker {
    fn after_tool(&self, call: &ToolUse, _result: &ToolResult) -> Option<DiffSummary> {
        (call.name == "echo").then(|| DiffSummary {
            files: vec![FileChange {
                path: "notes.md".into(),
                insertions: 3,
                deletions: 0,
            }],
        })
    }
}

#[tokio::test]
async fn change_tracker_produces_diff_events() {
    let model = ScriptedModel::texts(&[ECHO_THEN_COMPLETE]);
    let registry = tools();
    registry.set_change_tracker(Arc::new(OneFileTracker));
    let (orchestrator, mut rx) = task(&model, registry, options(5));

    orchestrator.start("echo").await;

    let diffs: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::Diff { tool, summary } => Some((tool, summary.insertions())),
            _ => None,
        })
        .collect();
    assert_eq!(diffs, vec![("echo".to_string(), 3)]);
}

#[tokio::test]
async fn dropped_event_receiver_fails_the_task() {
    let model = ScriptedModel::texts(&[ECHO_THEN_COMPLETE]);
    let (orchestrator, rx) = task(&model, tools(), options(5));
    let control = orchestrator.control();
    drop(rx);

    let outcome = orchestrator.start("nobody listens").await;

    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(control.state(), TaskState::Failed);
}

#[tokio::test]
async fn system_prompt_lists_registered_tools() {
    let model = ScriptedModel::texts(&["   "]);
    let opts = AgentOptions {
        system_prompt: Some("Answer in English.".into()),
        ..options(1)
    };
    let (orchestrator, _rx) = task(&model, tools(), opts);
    orchestrator.start("hi").await;

    let requests = model.requests().await;
    let prompt = &requests[0].system_prompt;
    assert!(prompt.contains("## echo"));
    assert!(prompt.contains("## attempt_completion"));
    assert!(prompt.contains("Answer in English."));
}
