use super::builtin::completion_capability;
use super::error::ToolError;
use super::interface::{Capability, ChangeTracker, ToolDispatcher, ToolSource};
use super::provider_tools::provider_capability;
use crate::application::mcp::ProviderRegistry;
use crate::domain::types::{ToolResult, ToolUse};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Capabilities keyed by name, plus optional provider-backed ones.
#[derive(Default)]
pub struct ToolRegistry {
    capabilities: RwLock<BTreeMap<String, Capability>>,
    tracker: RwLock<Option<Arc<dyn ChangeTracker>>>,
    providers: RwLock<Option<Arc<ProviderRegistry>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the completion tool named `completion_tool`.
    pub fn with_builtins(completion_tool: &str) -> Self {
        let registry = Self::new();
        registry.register(completion_capability(completion_tool));
        registry
    }

    /// Source provider tools from `providers` on every [`ToolDispatcher::refresh`].
    pub fn attach_providers(&self, providers: Arc<ProviderRegistry>) {
        *write(&self.providers) = Some(providers);
    }

    pub fn unregister(&self, name: &str) -> Option<Capability> {
        write(&self.capabilities).remove(name)
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn register(&self, capability: Capability) {
        debug!(tool = %capability.name, "Registered tool");
        write(&self.capabilities).insert(capability.name.clone(), capability);
    }

    fn lookup(&self, name: &str) -> Option<Capability> {
        read(&self.capabilities).get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        read(&self.capabilities).keys().cloned().collect()
    }

    fn capabilities(&self) -> Vec<Capability> {
        read(&self.capabilities).values().cloned().collect()
    }

    async fn execute(&self, call: &ToolUse) -> Result<ToolResult, ToolError> {
        let capability = self
            .lookup(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        if let Some(parameter) = capability.missing_parameter(call) {
            return Err(ToolError::MissingParameter {
                tool: call.name.clone(),
                parameter: parameter.to_string(),
            });
        }
        debug!(tool = %call.name, id = ?call.id, "Executing tool");
        let content = capability.run(call.clone()).await?;
        Ok(ToolResult::success(call, content))
    }

    fn set_change_tracker(&self, tracker: Arc<dyn ChangeTracker>) {
        *write(&self.tracker) = Some(tracker);
    }

    fn clear_change_tracker(&self) {
        *write(&self.tracker) = None;
    }

    fn change_tracker(&self) -> Option<Arc<dyn ChangeTracker>> {
        read(&self.tracker).clone()
    }

    /// Replace every provider-backed capability with the current catalog of
    /// the attached provider registry.
    async fn refresh(&self) {
        let Some(providers) = read(&self.providers).clone() else {
            return;
        };
        let fresh: Vec<Capability> = providers
            .tools()
            .iter()
            .map(|tool| provider_capability(Arc::clone(&providers), tool))
            .collect();

        let mut capabilities = write(&self.capabilities);
        capabilities.retain(|_, capability| capability.source == ToolSource::Builtin);
        let count = fresh.len();
        for capability in fresh {
            capabilities
                .entry(capability.name.clone())
                .or_insert(capability);
        }
        info!(provider_tools = count, total = capabilities.len(), "Refreshed tool registry");
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
