//! OpenAI-compatible streaming client

use super::adapter::MessageAdapter;
use super::traits::ModelProvider;
use super::types::{ModelError, ModelRequest, ModelStream, StreamEvent};
use crate::config::ModelSettings;
use crate::domain::types::TokenUsage;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use reqwest::Client;
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::env;
use tracing::{debug, info};

const DONE_MARKER: &str = "[DONE]";

/// Streams chat completions from any endpoint speaking the OpenAI wire
/// format (OpenAI, Groq, Mistral, vLLM, Ollama, ...).
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    endpoint: String,
    api_path: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    max_tokens: Option<u32>,
    http: Client,
}

impl OpenAiCompatibleClient {
    /// Build a client from settings, reading the key from `api_key_env`.
    /// An empty `api_key_env` means the endpoint needs no key.
    pub fn from_settings(settings: &ModelSettings) -> Self {
        let api_key = if settings.api_key_env.is_empty() {
            None
        } else {
            env::var(&settings.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
        };
        Self {
            endpoint: settings.endpoint.clone(),
            api_path: settings.api_path.clone(),
            model: settings.model.clone(),
            api_key,
            api_key_env: settings.api_key_env.clone(),
            max_tokens: settings.max_tokens,
            http: Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build URL from endpoint and path
    pub fn build_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = self.api_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn require_api_key(&self) -> Result<Option<&str>, ModelError> {
        if self.api_key_env.is_empty() {
            return Ok(None);
        }
        self.api_key
            .as_deref()
            .map(Some)
            .ok_or_else(|| ModelError::MissingApiKey {
                env: self.api_key_env.clone(),
            })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleClient {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let api_key = self.require_api_key()?;
        let payload = ChatRequest {
            model: &self.model,
            messages: MessageAdapter::to_openai_format(&request.system_prompt, &request.history),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_tokens: self.max_tokens,
        };

        let url = self.build_url();
        info!(
            model = self.model.as_str(),
            messages = payload.messages.len(),
            "Opening model stream"
        );

        let mut builder = self.http.post(&url).json(&payload);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }
        let mut source = builder
            .eventsource()
            .map_err(|err| ModelError::transport(err.to_string()))?;
        source.set_retry_policy(Box::new(Never));

        let state = SseState {
            source: Some(source),
            queue: VecDeque::new(),
        };
        Ok(Box::pin(stream::unfold(state, next_event)))
    }
}

struct SseState {
    source: Option<EventSource>,
    queue: VecDeque<StreamEvent>,
}

async fn next_event(
    mut state: SseState,
) -> Option<(Result<StreamEvent, ModelError>, SseState)> {
    loop {
        if let Some(event) = state.queue.pop_front() {
            return Some((Ok(event), state));
        }
        let source = state.source.as_mut()?;
        match source.next().await {
            None | Some(Err(EventSourceError::StreamEnded)) => {
                state.close();
                return None;
            }
            Some(Ok(Event::Open)) => debug!("Model stream opened"),
            Some(Ok(Event::Message(message))) => {
                if message.data.trim() == DONE_MARKER {
                    state.close();
                    continue;
                }
                match parse_chunk(&message.data) {
                    Ok(events) => state.queue.extend(events),
                    Err(err) => {
                        state.close();
                        return Some((Err(err), state));
                    }
                }
            }
            Some(Err(err)) => {
                state.close();
                return Some((Err(map_error(err)), state));
            }
        }
    }
}

impl SseState {
    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

fn map_error(err: EventSourceError) -> ModelError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => ModelError::Status {
            status: status.as_u16(),
        },
        EventSourceError::Transport(err) if err.is_timeout() => ModelError::Timeout,
        EventSourceError::Transport(err) => ModelError::transport(err.to_string()),
        other => ModelError::protocol(other.to_string()),
    }
}

/// Events carried by one `data:` payload of the stream.
pub(crate) fn parse_chunk(data: &str) -> Result<Vec<StreamEvent>, ModelError> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|err| ModelError::protocol(format!("invalid stream chunk: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(ModelError::protocol(error.to_string()));
    }

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.and_then(|delta| delta.content) {
            if !content.is_empty() {
                events.push(StreamEvent::Text(content));
            }
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: usage
                .prompt_tokens_details
                .map(|details| details.cached_tokens)
                .unwrap_or_default(),
        }));
    }
    Ok(events)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}
