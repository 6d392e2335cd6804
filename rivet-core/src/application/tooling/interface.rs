use super::error::ToolError;
use crate::application::parser::ToolSpec;
use crate::domain::types::{ToolContent, ToolResult, ToolUse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolContent, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(ToolUse) -> ToolFuture + Send + Sync>;

/// JSON type a parameter value is coerced to before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterKind {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    pub fn from_schema_type(value: &str) -> Self {
        match value {
            "number" => ParameterKind::Number,
            "integer" => ParameterKind::Integer,
            "boolean" => ParameterKind::Boolean,
            "object" => ParameterKind::Object,
            "array" => ParameterKind::Array,
            _ => ParameterKind::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: true,
            kind: ParameterKind::String,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// Where a capability runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    Builtin,
    Provider {
        provider_id: String,
        provider_name: String,
    },
}

/// A named, schema-described, executable tool.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub requires_approval: bool,
    pub source: ToolSource,
    pub executor: ToolExecutor,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            requires_approval: false,
            source: ToolSource::Builtin,
            executor,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.name.clone(),
            self.parameters.iter().map(|parameter| parameter.name.clone()),
        )
    }

    /// First required parameter `call` leaves empty.
    pub fn missing_parameter(&self, call: &ToolUse) -> Option<&str> {
        self.parameters
            .iter()
            .filter(|parameter| parameter.required)
            .find(|parameter| {
                call.argument(&parameter.name)
                    .is_none_or(|value| value.trim().is_empty())
            })
            .map(|parameter| parameter.name.as_str())
    }

    pub async fn run(&self, call: ToolUse) -> Result<ToolContent, ToolError> {
        (self.executor)(call).await
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("requires_approval", &self.requires_approval)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub insertions: usize,
    pub deletions: usize,
}

/// Workspace changes attributed to one tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files: Vec<FileChange>,
}

impl DiffSummary {
    pub fn insertions(&self) -> usize {
        self.files.iter().map(|file| file.insertions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.files.iter().map(|file| file.deletions).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Hook consulted after every executed tool.
pub trait ChangeTracker: Send + Sync {
    fn after_tool(&self, call: &ToolUse, result: &ToolResult) -> Option<DiffSummary>;
}

/// Name-to-capability resolution used by the orchestrator.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    fn register(&self, capability: Capability);

    fn lookup(&self, name: &str) -> Option<Capability>;

    fn names(&self) -> Vec<String>;

    fn capabilities(&self) -> Vec<Capability>;

    fn specs(&self) -> Vec<ToolSpec> {
        self.capabilities().iter().map(Capability::spec).collect()
    }

    async fn execute(&self, call: &ToolUse) -> Result<ToolResult, ToolError>;

    fn set_change_tracker(&self, tracker: Arc<dyn ChangeTracker>);

    fn clear_change_tracker(&self);

    fn change_tracker(&self) -> Option<Arc<dyn ChangeTracker>>;

    /// Re-read dynamically discovered capabilities.
    async fn refresh(&self) {}
}
