use super::catalog::{self, ProviderTemplate};
use super::client::{ClientOptions, ProtocolClient};
use super::error::{ProviderError, RegistryError};
use super::state::{ConnectionStatus, SessionState, ToolInfo};
use crate::config::provider::generate_provider_id;
use crate::config::{ProviderDefinition, ProviderStore};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tracing::{debug, info, warn};

/// A tool of a connected provider, addressed by its namespaced name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTool {
    pub provider_id: String,
    pub provider_name: String,
    pub qualified_name: String,
    pub tool: ToolInfo,
}

/// Lower-cased provider name with every non-alphanumeric character replaced
/// by `_`.
pub fn provider_namespace(name: &str) -> String {
    let namespace: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if namespace.is_empty() {
        "provider".to_string()
    } else {
        namespace
    }
}

pub fn qualified_tool_name(namespace: &str, tool: &str) -> String {
    format!("{namespace}__{tool}")
}

/// Namespace of every definition, unique across the list. The first
/// provider with a given name keeps the plain namespace; later ones get the
/// tail of their id appended, so assignments only depend on definition order.
pub fn provider_namespaces(definitions: &[ProviderDefinition]) -> HashMap<String, String> {
    let mut taken = HashSet::new();
    let mut namespaces = HashMap::with_capacity(definitions.len());
    for definition in definitions {
        let base = provider_namespace(&definition.name);
        let mut namespace = base.clone();
        if taken.contains(&namespace) {
            let tail = definition.id.rsplit('-').next().unwrap_or(&definition.id);
            namespace = format!("{base}_{}", provider_namespace(tail));
            let mut n = 2;
            while taken.contains(&namespace) {
                namespace = format!("{base}_{}_{n}", provider_namespace(tail));
                n += 1;
            }
        }
        taken.insert(namespace.clone());
        namespaces.insert(definition.id.clone(), namespace);
    }
    namespaces
}

/// Sole owner of provider definitions and their live protocol clients.
pub struct ProviderRegistry {
    store: Arc<dyn ProviderStore>,
    options: ClientOptions,
    definitions: RwLock<Vec<ProviderDefinition>>,
    clients: Mutex<HashMap<String, ProtocolClient>>,
    op_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    updates: mpsc::UnboundedSender<SessionState>,
    view: Arc<watch::Sender<Vec<SessionState>>>,
}

impl ProviderRegistry {
    /// Read definitions from `store`. Must run inside a tokio runtime: a
    /// background task folds client snapshots into the aggregated view.
    pub fn load(
        store: Arc<dyn ProviderStore>,
        options: ClientOptions,
    ) -> Result<Arc<Self>, RegistryError> {
        let definitions = store.load()?;
        info!(providers = definitions.len(), "Loaded tool provider definitions");

        let initial = definitions
            .iter()
            .map(|definition| SessionState::new(definition.id.clone()))
            .collect();
        let view = Arc::new(watch::channel(initial).0);
        let (updates, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_states(rx, Arc::clone(&view)));

        Ok(Arc::new(Self {
            store,
            options,
            definitions: RwLock::new(definitions),
            clients: Mutex::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
            updates,
            view,
        }))
    }

    pub fn definitions(&self) -> Vec<ProviderDefinition> {
        read(&self.definitions).clone()
    }

    pub fn definition(&self, id: &str) -> Option<ProviderDefinition> {
        read(&self.definitions)
            .iter()
            .find(|definition| definition.id == id)
            .cloned()
    }

    /// Store a new definition. An empty or already used id is replaced with a
    /// fresh one.
    pub fn add_provider(
        &self,
        definition: ProviderDefinition,
    ) -> Result<ProviderDefinition, RegistryError> {
        self.insert_definition(definition, false)
    }

    /// Replace a definition, disconnecting its live client first.
    pub async fn update_provider(&self, definition: ProviderDefinition) -> Result<(), RegistryError> {
        let op = self.op_lock(&definition.id);
        let _guard = op.lock().await;

        if self.definition(&definition.id).is_none() {
            return Err(RegistryError::NotFound(definition.id));
        }
        self.drop_client(&definition.id).await;

        let id = definition.id.clone();
        {
            let mut definitions = write(&self.definitions);
            let mut updated = definitions.clone();
            if let Some(slot) = updated.iter_mut().find(|existing| existing.id == id) {
                *slot = definition;
            }
            self.store.save(&updated)?;
            *definitions = updated;
        }
        self.view.send_modify(|states| {
            if let Some(slot) = states.iter_mut().find(|state| state.provider_id == id) {
                *slot = SessionState::new(id.clone());
            }
        });
        info!(provider = %id, "Updated tool provider");
        Ok(())
    }

    /// Delete a definition, disconnecting its live client first.
    pub async fn remove_provider(&self, id: &str) -> Result<ProviderDefinition, RegistryError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        if self.definition(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.drop_client(id).await;

        let removed = {
            let mut definitions = write(&self.definitions);
            let mut remaining = definitions.clone();
            let position = remaining
                .iter()
                .position(|definition| definition.id == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let removed = remaining.remove(position);
            self.store.save(&remaining)?;
            *definitions = remaining;
            removed
        };
        self.view
            .send_modify(|states| states.retain(|state| state.provider_id != id));
        info!(provider = %id, name = %removed.name, "Removed tool provider");
        Ok(removed)
    }

    /// Connect the provider `id`. Already connected providers are left alone.
    pub async fn connect(&self, id: &str) -> Result<(), RegistryError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        let definition = self
            .definition(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if !definition.enabled {
            return Err(RegistryError::Disabled(id.to_string()));
        }

        let client = {
            let mut clients = lock(&self.clients);
            clients
                .entry(id.to_string())
                .or_insert_with(|| {
                    ProtocolClient::new(definition, self.options.clone(), self.updates.clone())
                })
                .clone()
        };
        if client.status().is_active() {
            debug!(provider = %id, "Provider already connected");
            return Ok(());
        }
        client.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), RegistryError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        if self.definition(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let client = lock(&self.clients).get(id).cloned();
        if let Some(client) = client {
            client.disconnect().await;
        }
        Ok(())
    }

    /// Connect every enabled auto-connect provider concurrently. Failures are
    /// logged and returned; they never affect the other providers.
    pub async fn connect_auto(&self) -> Vec<(String, RegistryError)> {
        let ids: Vec<String> = read(&self.definitions)
            .iter()
            .filter(|definition| definition.enabled && definition.auto_connect)
            .map(|definition| definition.id.clone())
            .collect();

        let results = join_all(ids.iter().map(|id| self.connect(id))).await;
        ids.into_iter()
            .zip(results)
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    warn!(provider = %id, %err, "Auto-connect failed");
                    Some((id, err))
                }
            })
            .collect()
    }

    /// Flattened tool catalog of every connected provider, in definition order.
    pub fn tools(&self) -> Vec<ProviderTool> {
        let definitions = self.definitions();
        let namespaces = provider_namespaces(&definitions);
        let clients = lock(&self.clients).clone();
        let mut seen = HashSet::new();
        let mut tools = Vec::new();

        for definition in definitions {
            let Some(client) = clients.get(&definition.id) else {
                continue;
            };
            let state = client.state();
            if state.status != ConnectionStatus::Connected {
                continue;
            }
            let Some(namespace) = namespaces.get(&definition.id) else {
                continue;
            };
            for tool in state.tools {
                let qualified_name = qualified_tool_name(namespace, &tool.name);
                if !seen.insert(qualified_name.clone()) {
                    warn!(
                        provider = %definition.id,
                        tool = %qualified_name,
                        "Dropping tool listed twice by its provider"
                    );
                    continue;
                }
                tools.push(ProviderTool {
                    provider_id: definition.id.clone(),
                    provider_name: definition.name.clone(),
                    qualified_name,
                    tool,
                });
            }
        }
        tools
    }

    pub fn resolve(&self, qualified_name: &str) -> Option<ProviderTool> {
        self.tools()
            .into_iter()
            .find(|tool| tool.qualified_name == qualified_name)
    }

    /// Invoke `tool` on provider `id`, returning the raw result.
    pub async fn call_tool(
        &self,
        id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, RegistryError> {
        let client = lock(&self.clients).get(id).cloned().ok_or_else(|| {
            RegistryError::Provider(ProviderError::NotConnected {
                provider: id.to_string(),
            })
        })?;
        Ok(client.call_tool(tool, arguments).await?)
    }

    /// Current session state of every provider, in definition order.
    pub fn states(&self) -> Vec<SessionState> {
        let clients = lock(&self.clients);
        read(&self.definitions)
            .iter()
            .map(|definition| match clients.get(&definition.id) {
                Some(client) => client.state(),
                None => SessionState::new(definition.id.clone()),
            })
            .collect()
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.states().into_iter().find(|state| state.provider_id == id)
    }

    /// Aggregated view, republished whenever any client changes state.
    pub fn subscribe(&self) -> watch::Receiver<Vec<SessionState>> {
        self.view.subscribe()
    }

    pub fn diagnostics(&self, id: &str) -> Vec<String> {
        lock(&self.clients)
            .get(id)
            .map(ProtocolClient::diagnostics)
            .unwrap_or_default()
    }

    pub fn catalog(&self) -> &'static [ProviderTemplate] {
        catalog::templates()
    }

    /// Copy a catalog template into a new definition. Rejected when a
    /// definition with the same command and arguments already exists.
    pub fn install_template(
        &self,
        template_id: &str,
        workspace: &Path,
    ) -> Result<ProviderDefinition, RegistryError> {
        let template = catalog::find_template(template_id)
            .ok_or_else(|| RegistryError::UnknownTemplate(template_id.to_string()))?;
        let definition = self.insert_definition(template.instantiate(workspace), true)?;
        info!(provider = %definition.id, template = template_id, "Installed provider template");
        Ok(definition)
    }

    /// Disconnect every live client.
    pub async fn shutdown(&self) {
        let clients: Vec<ProtocolClient> = lock(&self.clients).drain().map(|(_, c)| c).collect();
        join_all(clients.iter().map(ProtocolClient::disconnect)).await;
        debug!(clients = clients.len(), "Provider registry shut down");
    }

    fn insert_definition(
        &self,
        mut definition: ProviderDefinition,
        reject_duplicate_launch: bool,
    ) -> Result<ProviderDefinition, RegistryError> {
        {
            let mut definitions = write(&self.definitions);
            if reject_duplicate_launch {
                if let Some(existing) = definitions
                    .iter()
                    .find(|existing| existing.same_launch(&definition))
                {
                    return Err(RegistryError::DuplicateTemplate {
                        existing: existing.name.clone(),
                    });
                }
            }
            if definition.id.is_empty()
                || definitions.iter().any(|existing| existing.id == definition.id)
            {
                definition.id = generate_provider_id();
            }

            let mut updated = definitions.clone();
            updated.push(definition.clone());
            self.store.save(&updated)?;
            *definitions = updated;
        }

        let id = definition.id.clone();
        self.view
            .send_modify(|states| states.push(SessionState::new(id)));
        info!(provider = %definition.id, name = %definition.name, "Added tool provider");
        Ok(definition)
    }

    async fn drop_client(&self, id: &str) {
        let client = lock(&self.clients).remove(id);
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    fn op_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        lock(&self.op_locks)
            .entry(id.to_string())
            .or_default()
            .clone()
    }
}

async fn forward_states(
    mut rx: mpsc::UnboundedReceiver<SessionState>,
    view: Arc<watch::Sender<Vec<SessionState>>>,
) {
    while let Some(snapshot) = rx.recv().await {
        // Snapshots of removed providers have no slot and are dropped.
        view.send_if_modified(|states| {
            match states
                .iter_mut()
                .find(|state| state.provider_id == snapshot.provider_id)
            {
                Some(slot) => {
                    *slot = snapshot;
                    true
                }
                None => false,
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
