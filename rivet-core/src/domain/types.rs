use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Who produced a turn in the task history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool_result",
        }
    }
}

/// Arguments of a tool invocation, keyed by parameter name.
///
/// Ordered so that two parses of the same markup compare equal regardless of
/// the order in which parameters were closed.
pub type ToolArguments = BTreeMap<String, String>;

/// A tool invocation extracted from model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    pub name: String,
    pub arguments: ToolArguments,
    pub partial: bool,
    pub id: Option<String>,
}

impl ToolUse {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: ToolArguments::new(),
            partial: true,
            id: None,
        }
    }

    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }
}

/// A parsed unit of model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { content: String },
    ToolUse(ToolUse),
}

impl ContentBlock {
    pub fn text(content: impl Into<String>) -> Self {
        ContentBlock::Text {
            content: content.into(),
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            ContentBlock::ToolUse(tool) => Some(tool),
            ContentBlock::Text { .. } => None,
        }
    }
}

/// Outcome of executing one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub id: Option<String>,
    pub is_error: bool,
    pub content: ToolContent,
}

impl ToolResult {
    pub fn success(call: &ToolUse, content: ToolContent) -> Self {
        Self {
            tool: call.name.clone(),
            id: call.id.clone(),
            is_error: false,
            content,
        }
    }

    pub fn failure(call: &ToolUse, message: impl Into<String>) -> Self {
        Self {
            tool: call.name.clone(),
            id: call.id.clone(),
            is_error: true,
            content: ToolContent::Text(message.into()),
        }
    }

    /// Text form fed back to the model.
    pub fn render(&self) -> String {
        self.content.render()
    }
}

/// Tool payload, passed through without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Text(String),
    Structured(Value),
}

impl ToolContent {
    pub fn render(&self) -> String {
        match self {
            ToolContent::Text(text) => text.clone(),
            ToolContent::Structured(value) => render_structured(value),
        }
    }
}

/// MCP `tools/call` results carry a `content` array of typed parts; text parts
/// are joined, anything else is shown as JSON.
fn render_structured(value: &Value) -> String {
    let Some(parts) = value.get("content").and_then(Value::as_array) else {
        return value.to_string();
    };
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| match part.get("text").and_then(Value::as_str) {
            Some(text) if part.get("type").and_then(Value::as_str) == Some("text") => {
                text.to_string()
            }
            _ => part.to_string(),
        })
        .collect();
    rendered.join("\n")
}

/// Payload of a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnPayload {
    Text { text: String },
    Assistant { blocks: Vec<ContentBlock> },
    ToolResult { result: ToolResult },
}

/// One append-only entry of a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub payload: TurnPayload,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            payload: TurnPayload::Text { text: text.into() },
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            payload: TurnPayload::Assistant { blocks },
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::ToolResult,
            payload: TurnPayload::ToolResult { result },
        }
    }
}

/// Token accounting reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
