//! Terminal host: one stdin loop driving tasks and the provider lifecycle.

use crate::commands::{HELP, HostCommand, is_approval, parse_line};
use crate::error::HostError;
use crate::render::Renderer;
use rivet_core::agent::{AgentEvent, AgentOptions, TaskControl, TaskOrchestrator, TaskOutcome};
use rivet_core::config::{AppConfig, ProviderDefinition, TomlProviderStore};
use rivet_core::mcp::{ClientOptions, ProviderRegistry, RegistryError};
use rivet_core::model::{ModelProvider, OpenAiCompatibleClient};
use rivet_core::tooling::ToolRegistry;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveTask {
    control: TaskControl,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    handle: JoinHandle<TaskOutcome>,
}

pub struct Host {
    options: AgentOptions,
    model: Arc<dyn ModelProvider>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    workspace: PathBuf,
    renderer: Renderer,
    active: Option<ActiveTask>,
    pending_permission: Option<String>,
}

impl Host {
    /// Load providers, auto-connect them and prepare the tool catalog.
    pub async fn start(
        config: AppConfig,
        options: AgentOptions,
        workspace: PathBuf,
    ) -> Result<Self, HostError> {
        let store = Arc::new(TomlProviderStore::new(config.mcp.providers_file.clone()));
        let client_options = ClientOptions {
            request_timeout: config.mcp.request_timeout,
            startup_grace: config.mcp.startup_grace,
            ..ClientOptions::default()
        };
        let providers = ProviderRegistry::load(store, client_options)?;
        for (id, err) in providers.connect_auto().await {
            warn!(provider = %id, %err, "Auto-connect failed");
            println!("[provider {id}] {err}");
        }

        let tools = Arc::new(ToolRegistry::with_builtins(&options.completion_tool));
        tools.attach_providers(Arc::clone(&providers));
        let model: Arc<dyn ModelProvider> =
            Arc::new(OpenAiCompatibleClient::from_settings(&config.model));
        info!(
            model = config.model.model.as_str(),
            workspace = %workspace.display(),
            "Host ready"
        );

        Ok(Self {
            options,
            model,
            providers,
            tools,
            workspace,
            renderer: Renderer::new(),
            active: None,
            pending_permission: None,
        })
    }

    /// Read stdin until `/quit` or end of input, then let the running task
    /// finish and shut providers down.
    pub async fn run(mut self) -> Result<(), HostError> {
        println!("{HELP}");
        let mut lines: Lines<BufReader<Stdin>> = BufReader::new(tokio::io::stdin()).lines();
        let mut reading = true;

        loop {
            if !reading && self.active.is_none() {
                break;
            }
            tokio::select! {
                line = lines.next_line(), if reading => match line? {
                    Some(line) => {
                        if !self.handle_line(&line).await {
                            reading = false;
                        }
                    }
                    None => {
                        debug!("Standard input closed");
                        reading = false;
                        self.deny_pending();
                    }
                },
                event = next_event(&mut self.active) => match event {
                    Some(event) => self.show(&event),
                    None => self.reap().await,
                },
            }
        }

        self.providers.shutdown().await;
        info!("Host finished");
        Ok(())
    }

    /// Returns false when the host should stop reading input.
    async fn handle_line(&mut self, line: &str) -> bool {
        if let Some(request_id) = self.pending_permission.take() {
            let approved = is_approval(line);
            if let Some(task) = &self.active {
                task.control.respond_permission(&request_id, approved);
            }
            return true;
        }

        let command = match parse_line(line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                return true;
            }
        };
        match command {
            HostCommand::Empty => {}
            HostCommand::Submit(input) => self.submit(input),
            HostCommand::Cancel => match &self.active {
                Some(task) if task.control.cancel() => println!("Cancelling..."),
                Some(_) => println!("Cancellation already requested."),
                None => println!("No task is running."),
            },
            HostCommand::Providers => self.list_providers(),
            HostCommand::Catalog => {
                for template in self.providers.catalog() {
                    println!("{:<22} {}", template.id, template.description);
                }
            }
            HostCommand::Install(template) => {
                match self.providers.install_template(&template, &self.workspace) {
                    Ok(definition) => println!("Installed '{}' as {}", definition.name, definition.id),
                    Err(err) => println!("{err}"),
                }
            }
            HostCommand::Add {
                name,
                command,
                args,
            } => match self
                .providers
                .add_provider(ProviderDefinition::new(name, command, args))
            {
                Ok(definition) => println!("Added '{}' as {}", definition.name, definition.id),
                Err(err) => println!("{err}"),
            },
            HostCommand::Update { id, command, args } => {
                let Some(mut definition) = self.providers.definition(&id) else {
                    println!("{}", RegistryError::NotFound(id));
                    return true;
                };
                definition.command = command;
                definition.args = args;
                match self.providers.update_provider(definition).await {
                    Ok(()) => println!("Updated {id}; /connect it to restart with the new command"),
                    Err(err) => println!("{err}"),
                }
            }
            HostCommand::Connect(id) => match self.providers.connect(&id).await {
                Ok(()) => {
                    let tools = self.providers.state(&id).map(|state| state.tools.len());
                    println!("Connected {id} ({} tools)", tools.unwrap_or_default());
                }
                Err(err) => println!("{err}"),
            },
            HostCommand::Disconnect(id) => match self.providers.disconnect(&id).await {
                Ok(()) => println!("Disconnected {id}"),
                Err(err) => println!("{err}"),
            },
            HostCommand::Remove(id) => match self.providers.remove_provider(&id).await {
                Ok(definition) => println!("Removed '{}'", definition.name),
                Err(err) => println!("{err}"),
            },
            HostCommand::Help => println!("{HELP}"),
            HostCommand::Quit => {
                if let Some(task) = &self.active {
                    task.control.cancel();
                }
                return false;
            }
        }
        true
    }

    fn submit(&mut self, input: String) {
        if self.active.is_some() {
            println!("A task is already running; /cancel it first.");
            return;
        }
        let (tx, events) = mpsc::unbounded_channel();
        let orchestrator = TaskOrchestrator::new(
            Arc::clone(&self.model),
            self.tools.clone(),
            self.options.clone(),
            tx,
        );
        let control = orchestrator.control();
        debug!(task = orchestrator.id(), "Submitting task");
        let handle = tokio::spawn(orchestrator.start(input));
        self.active = Some(ActiveTask {
            control,
            events,
            handle,
        });
    }

    fn show(&mut self, event: &AgentEvent) {
        if let AgentEvent::PermissionRequest { request_id, .. } = event {
            self.pending_permission = Some(request_id.clone());
        }
        if let Some(out) = self.renderer.render(event) {
            print!("{out}");
            let _ = std::io::stdout().flush();
        }
    }

    /// The event channel closed: the task has returned.
    async fn reap(&mut self) {
        self.pending_permission = None;
        if let Some(task) = self.active.take() {
            match task.handle.await {
                Ok(outcome) => debug!(
                    task = %outcome.task_id,
                    iterations = outcome.iterations,
                    tokens = outcome.usage.total(),
                    "Task reaped"
                ),
                Err(err) => warn!(%err, "Task panicked"),
            }
        }
    }

    fn deny_pending(&mut self) {
        if let (Some(request_id), Some(task)) = (self.pending_permission.take(), &self.active) {
            task.control.respond_permission(&request_id, false);
        }
    }

    fn list_providers(&self) {
        let definitions = self.providers.definitions();
        if definitions.is_empty() {
            println!("No providers configured. See /catalog.");
            return;
        }
        for definition in definitions {
            let Some(state) = self.providers.state(&definition.id) else {
                continue;
            };
            let mut line = format!(
                "{:<10} {:<20} {:<12} {} tools",
                definition.id,
                definition.name,
                format!("{:?}", state.status).to_lowercase(),
                state.tools.len()
            );
            if !definition.enabled {
                line.push_str("  (disabled)");
            }
            if let Some(err) = &state.last_error {
                line.push_str(&format!("  last error: {err}"));
            }
            println!("{line}");
        }
    }
}

async fn next_event(active: &mut Option<ActiveTask>) -> Option<AgentEvent> {
    match active {
        Some(task) => task.events.recv().await,
        None => std::future::pending().await,
    }
}
