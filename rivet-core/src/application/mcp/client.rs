use super::error::ProviderError;
use super::pending::PendingRequests;
use super::state::{ConnectionStatus, SessionState, ToolInfo};
use crate::config::ProviderDefinition;
use crate::constants::MCP_PROTOCOL_VERSION;
use crate::infrastructure::rpc::{
    IncomingMessage, LineDecoder, RpcNotification, RpcReply, RpcRequest, encode_line,
    initialize_params,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(500);
const DIAGNOSTIC_LINES: usize = 64;
const STDERR_DRAIN: Duration = Duration::from_millis(200);
const MAX_TOOL_PAGES: usize = 64;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub startup_grace: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One provider subprocess and its JSON-RPC session.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    definition: ProviderDefinition,
    options: ClientOptions,
    state: Mutex<SessionState>,
    updates: mpsc::UnboundedSender<SessionState>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    child: AsyncMutex<Option<Child>>,
    pending: PendingRequests,
    next_id: AtomicU64,
    decoder: Mutex<LineDecoder>,
    diagnostics: Mutex<VecDeque<String>>,
    // Bumped on every connect/disconnect so a reader task left over from an
    // earlier process never touches the current session.
    generation: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

#[derive(Serialize)]
struct CallParams<'a> {
    name: &'a str,
    arguments: Value,
}

impl ProtocolClient {
    pub fn new(
        definition: ProviderDefinition,
        options: ClientOptions,
        updates: mpsc::UnboundedSender<SessionState>,
    ) -> Self {
        let state = SessionState::new(definition.id.clone());
        Self {
            inner: Arc::new(ClientInner {
                definition,
                options,
                state: Mutex::new(state),
                updates,
                writer: AsyncMutex::new(None),
                child: AsyncMutex::new(None),
                pending: PendingRequests::default(),
                next_id: AtomicU64::new(1),
                decoder: Mutex::new(LineDecoder::new()),
                diagnostics: Mutex::new(VecDeque::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.definition.id
    }

    pub fn definition(&self) -> &ProviderDefinition {
        &self.inner.definition
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_state().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_state().status
    }

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.inner.lock_state().tools.clone()
    }

    /// Recent stderr lines of the provider process.
    pub fn diagnostics(&self) -> Vec<String> {
        lock(&self.inner.diagnostics).iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Launch the process, run the handshake and discover tools.
    ///
    /// Returns immediately when already connected or connecting.
    pub async fn connect(&self) -> Result<(), ProviderError> {
        let inner = &self.inner;
        if inner.lock_state().status.is_active() {
            return Ok(());
        }
        inner.transition(ConnectionStatus::Connecting, |state| {
            state.last_error = None;
        });
        info!(provider = %inner.definition.id, name = %inner.definition.name, "Connecting to tool provider");

        match inner.establish().await {
            Ok(tools) => {
                let count = tools.len();
                inner.transition(ConnectionStatus::Connected, |state| {
                    state.tools = tools;
                    state.last_connected = Some(Utc::now());
                });
                info!(provider = %inner.definition.id, tools = count, "Tool provider connected");
                Ok(())
            }
            Err(err) => {
                inner.generation.fetch_add(1, Ordering::SeqCst);
                inner.teardown().await;
                inner.transition(ConnectionStatus::Error, |state| {
                    state.tools.clear();
                    state.last_error = Some(err.to_string());
                });
                warn!(provider = %inner.definition.id, %err, "Tool provider failed to connect");
                Err(err)
            }
        }
    }

    /// Stop the process and fail every outstanding request.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.teardown().await;
        let status = inner.lock_state().status;
        match status {
            ConnectionStatus::Disconnected => return,
            ConnectionStatus::Connecting => {
                inner.transition(ConnectionStatus::Error, |state| {
                    state.last_error = Some("disconnected during startup".into());
                });
            }
            _ => {}
        }
        inner.transition(ConnectionStatus::Disconnected, |state| {
            state.tools.clear();
        });
        info!(provider = %inner.definition.id, "Tool provider disconnected");
    }

    /// Invoke a discovered tool and return the raw `tools/call` result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        let state = self.state();
        if state.status != ConnectionStatus::Connected {
            return Err(ProviderError::NotConnected {
                provider: self.id().to_string(),
            });
        }
        if !state.has_tool(name) {
            return Err(ProviderError::ToolNotFound {
                provider: self.id().to_string(),
                tool: name.to_string(),
            });
        }
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = serde_json::to_value(CallParams { name, arguments }).map_err(|err| {
            ProviderError::Protocol {
                provider: self.id().to_string(),
                message: err.to_string(),
            }
        })?;
        self.inner.send_request("tools/call", params).await
    }

    /// Send an arbitrary request on a connected session.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        if self.status() != ConnectionStatus::Connected {
            return Err(ProviderError::NotConnected {
                provider: self.id().to_string(),
            });
        }
        self.inner.send_request(method, params).await
    }
}

impl ClientInner {
    async fn establish(self: &Arc<Self>) -> Result<Vec<ToolInfo>, ProviderError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let command_line = self.definition.resolved_command();

        let mut command = Command::new(&command_line);
        command
            .args(self.definition.resolved_args())
            .envs(&self.definition.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|source| self.connection_error(format!("could not launch '{command_line}': {source}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.connection_error("failed to capture provider stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.connection_error("failed to capture provider stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.connection_error("failed to capture provider stderr"))?;

        lock(&self.decoder).clear();
        lock(&self.diagnostics).clear();
        *self.writer.lock().await = Some(BufWriter::new(stdin));
        let stderr_task = tokio::spawn(Arc::clone(self).stderr_loop(stderr));

        let early_exit = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(self.options.startup_grace) => None,
        };
        if let Some(status) = early_exit {
            let _ = tokio::time::timeout(STDERR_DRAIN, stderr_task).await;
            let status = match status {
                Ok(status) => status.to_string(),
                Err(err) => err.to_string(),
            };
            let diagnostics = self.diagnostics_text();
            let message = if diagnostics.is_empty() {
                format!("process exited during startup ({status})")
            } else {
                format!("process exited during startup ({status}): {diagnostics}")
            };
            return Err(self.connection_error(message));
        }

        *self.child.lock().await = Some(child);
        tokio::spawn(Arc::clone(self).reader_loop(stdout, generation));

        match self.handshake().await {
            Err(ProviderError::Disconnected { .. }) => {
                let _ = tokio::time::timeout(STDERR_DRAIN, stderr_task).await;
                let diagnostics = self.diagnostics_text();
                let message = if diagnostics.is_empty() {
                    "process exited during handshake".to_string()
                } else {
                    format!("process exited during handshake: {diagnostics}")
                };
                Err(self.connection_error(message))
            }
            other => other,
        }
    }

    async fn handshake(&self) -> Result<Vec<ToolInfo>, ProviderError> {
        let params = initialize_params(
            MCP_PROTOCOL_VERSION,
            &self.options.client_name,
            &self.options.client_version,
        );
        let init = self.send_request("initialize", params).await?;
        debug!(
            provider = %self.definition.id,
            server = ?init.get("serverInfo"),
            protocol = ?init.get("protocolVersion"),
            "Provider handshake answered"
        );
        self.send_notification("notifications/initialized").await?;
        self.list_tools().await
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, ProviderError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.send_request("tools/list", params).await?;
            let page: ToolsPage =
                serde_json::from_value(result).map_err(|err| ProviderError::Protocol {
                    provider: self.definition.id.clone(),
                    message: format!("malformed tools/list result: {err}"),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn refresh_tools(&self) {
        if self.lock_state().status != ConnectionStatus::Connected {
            return;
        }
        match self.list_tools().await {
            Ok(tools) => {
                let snapshot = {
                    let mut state = self.lock_state();
                    if state.status != ConnectionStatus::Connected {
                        return;
                    }
                    state.tools = tools;
                    state.clone()
                };
                debug!(provider = %self.definition.id, tools = snapshot.tools.len(), "Refreshed tool catalog");
                let _ = self.updates.send(snapshot);
            }
            Err(err) => {
                warn!(provider = %self.definition.id, %err, "Failed to refresh tool catalog");
            }
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let reply = self.pending.register(id);
        if let Err(err) = self.write_message(&RpcRequest::new(id, method, params)).await {
            self.pending.remove(id);
            return Err(err);
        }
        debug!(provider = %self.definition.id, request_id = id, method, "Sent request");

        match tokio::time::timeout(self.options.request_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.disconnected()),
            Err(_) => {
                self.pending.remove(id);
                warn!(provider = %self.definition.id, request_id = id, method, "Request timed out");
                Err(ProviderError::Timeout {
                    provider: self.definition.id.clone(),
                    method: method.to_string(),
                    timeout_ms: self.options.request_timeout.as_millis(),
                })
            }
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), ProviderError> {
        self.write_message(&RpcNotification::new(method, None)).await
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), ProviderError> {
        let encoded = encode_line(message).map_err(|err| ProviderError::Protocol {
            provider: self.definition.id.clone(),
            message: err.to_string(),
        })?;
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| ProviderError::NotConnected {
            provider: self.definition.id.clone(),
        })?;
        stream.write_all(&encoded).await.map_err(|err| {
            debug!(provider = %self.definition.id, %err, "Write to provider failed");
            self.disconnected()
        })?;
        stream.flush().await.map_err(|_| self.disconnected())
    }

    async fn reader_loop(self: Arc<Self>, mut stdout: ChildStdout, generation: u64) {
        let mut buf = vec![0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => {
                    if self.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    let lines = lock(&self.decoder).push(&buf[..read]);
                    for line in lines {
                        self.handle_line(&line).await;
                    }
                }
                Err(err) => {
                    warn!(provider = %self.definition.id, %err, "Failed to read provider stdout");
                    break;
                }
            }
        }
        if self.generation.load(Ordering::SeqCst) == generation {
            self.handle_exit().await;
        }
    }

    async fn stderr_loop(self: Arc<Self>, stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(provider = %self.definition.id, line = %line, "provider stderr");
            let mut diagnostics = lock(&self.diagnostics);
            if diagnostics.len() == DIAGNOSTIC_LINES {
                diagnostics.pop_front();
            }
            diagnostics.push_back(line);
        }
    }

    async fn handle_line(self: &Arc<Self>, line: &str) {
        if line.starts_with('\u{1b}') {
            debug!(provider = %self.definition.id, line, "Skipping ANSI log line from provider");
            return;
        }
        let message = match IncomingMessage::parse(line) {
            Ok(message) => message,
            Err(err) => {
                warn!(provider = %self.definition.id, line, %err, "Ignoring unparseable provider output");
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, outcome } => {
                let reply = outcome.map_err(|error| ProviderError::Rpc {
                    provider: self.definition.id.clone(),
                    code: error.code,
                    message: error.message,
                });
                if !self.pending.resolve(id, reply) {
                    debug!(provider = %self.definition.id, response_id = id, "Ignoring response for unknown request");
                }
            }
            IncomingMessage::Notification { method, .. } => {
                debug!(provider = %self.definition.id, method = %method, "Provider notification");
                if method == "notifications/tools/list_changed" {
                    // The refresh waits on a response this task has to read.
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.refresh_tools().await });
                }
            }
            IncomingMessage::Request { id, method, .. } => {
                let reply = if method == "ping" {
                    RpcReply::success(id, json!({}))
                } else {
                    warn!(provider = %self.definition.id, method = %method, "Provider sent unsupported request");
                    RpcReply::method_not_found(id, &method)
                };
                if let Err(err) = self.write_message(&reply).await {
                    debug!(provider = %self.definition.id, %err, "Failed to answer provider request");
                }
            }
        }
    }

    async fn handle_exit(&self) {
        let status = self.lock_state().status;
        info!(provider = %self.definition.id, ?status, "Provider process closed its output");
        match status {
            ConnectionStatus::Connected => {
                self.teardown().await;
                let diagnostics = self.diagnostics_text();
                self.transition(ConnectionStatus::Disconnected, |state| {
                    state.tools.clear();
                    state.last_error = Some(if diagnostics.is_empty() {
                        "provider process exited".to_string()
                    } else {
                        format!("provider process exited: {diagnostics}")
                    });
                });
            }
            // connect() observes the rejected handshake and records the error.
            ConnectionStatus::Connecting => {
                self.pending.reject_all(|| self.disconnected());
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
        }
    }

    async fn teardown(&self) {
        *self.writer.lock().await = None;
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(err) = child.kill().await {
                debug!(provider = %self.definition.id, %err, "Failed to kill provider process (may have already exited)");
            }
        }
        let rejected = self.pending.reject_all(|| self.disconnected());
        lock(&self.decoder).clear();
        if rejected > 0 {
            debug!(provider = %self.definition.id, rejected, "Rejected pending requests");
        }
    }

    fn transition(&self, next: ConnectionStatus, update: impl FnOnce(&mut SessionState)) -> bool {
        let snapshot = {
            let mut state = self.lock_state();
            if !state.status.can_transition_to(next) {
                warn!(
                    provider = %self.definition.id,
                    from = ?state.status,
                    to = ?next,
                    "Ignoring invalid provider state transition"
                );
                return false;
            }
            state.status = next;
            update(&mut state);
            state.clone()
        };
        let _ = self.updates.send(snapshot);
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn diagnostics_text(&self) -> String {
        lock(&self.diagnostics)
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn connection_error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Connection {
            provider: self.definition.id.clone(),
            message: message.into(),
        }
    }

    fn disconnected(&self) -> ProviderError {
        ProviderError::Disconnected {
            provider: self.definition.id.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn client_for(command: &str, args: &[&str]) -> (ProtocolClient, mpsc::UnboundedReceiver<SessionState>) {
        let definition = ProviderDefinition::new(
            "test",
            command,
            args.iter().map(|arg| arg.to_string()).collect(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let options = ClientOptions {
            startup_grace: Duration::from_millis(300),
            ..ClientOptions::default()
        };
        (ProtocolClient::new(definition, options, tx), rx)
    }

    #[tokio::test]
    async fn call_tool_requires_connection() {
        let (client, _rx) = client_for("true", &[]);
        let err = client
            .call_tool("anything", Value::Null)
            .await
            .expect_err("not connected");
        assert!(matches!(err, ProviderError::NotConnected { .. }));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_binary_reports_error_state() {
        let (client, mut rx) = client_for("/definitely/not/a/provider", &[]);
        let err = client.connect().await.expect_err("spawn fails");
        assert!(matches!(err, ProviderError::Connection { .. }));
        assert_eq!(client.status(), ConnectionStatus::Error);

        let connecting = rx.recv().await.expect("connecting snapshot");
        assert_eq!(connecting.status, ConnectionStatus::Connecting);
        let failed = rx.recv().await.expect("error snapshot");
        assert_eq!(failed.status, ConnectionStatus::Error);
        assert!(failed.last_error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_fails_within_grace_window_with_stderr() {
        let (client, _rx) = client_for("sh", &["-c", "echo 'boom: missing token' >&2; exit 3"]);
        let started = Instant::now();
        let err = client.connect().await.expect_err("process exits");
        assert!(started.elapsed() < Duration::from_secs(5));
        let message = err.to_string();
        assert!(message.contains("boom: missing token"), "{message}");
        assert_eq!(client.status(), ConnectionStatus::Error);
        assert!(client.tools().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_during_handshake_keeps_stderr() {
        let (client, _rx) = client_for("sh", &["-c", "sleep 0.6; echo 'auth rejected' >&2; exit 4"]);
        let err = client.connect().await.expect_err("process exits before answering");
        match err {
            ProviderError::Connection { message, .. } => {
                assert!(message.contains("during handshake"), "{message}");
                assert!(message.contains("auth rejected"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let state = client.state();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert!(state
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("auth rejected")));
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_a_no_op() {
        let (client, mut rx) = client_for("true", &[]);
        client.disconnect().await;
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(rx.try_recv().is_err());
    }
}
