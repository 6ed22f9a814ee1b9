use super::channel::{ChannelAdapter, PendingReply};
use super::command::CommandDescriptor;
use super::config::EngineConfig;
use super::error::EngineError;
use super::events::{EngineEvent, EventReporter};
use super::history::History;
use super::protocol::{CorrelationId, Reply, RequestBody};
use super::transport::WorkerChannels;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// The initialize handshake has been sent but not answered.
    Initializing,
    Ready,
    /// The handshake failed; carries the engine diagnostic.
    Failed(String),
}

pub type CommandObserver = Box<dyn Fn(&CommandDescriptor) + Send + Sync>;

/// Issues semantic commands to the compute engine and journals the ones
/// that mutate persistent state.
pub struct CommandCentre {
    adapter: ChannelAdapter,
    config: EngineConfig,
    history: Mutex<History>,
    console: Arc<Mutex<String>>,
    observer: Mutex<Option<CommandObserver>>,
    state: watch::Receiver<LifecycleState>,
}

impl CommandCentre {
    /// Connects to a worker and starts the initialize handshake.
    ///
    /// Returns immediately; the centre is in [`LifecycleState::Initializing`]
    /// until the engine answers. Commands issued in the meantime are posted
    /// behind the handshake rather than rejected. Must be called from within
    /// a tokio runtime.
    pub fn start(
        channels: WorkerChannels,
        config: EngineConfig,
        reporter: EventReporter<'static>,
    ) -> Result<Self, EngineError> {
        let reporter = Arc::new(reporter);
        let console = Arc::new(Mutex::new(String::new()));

        let console_sink = console.clone();
        let forward = reporter.clone();
        let adapter_reporter = EventReporter::with_callback(Box::new(move |event| {
            if let EngineEvent::ConsoleMessage(message) = &event {
                let mut log = console_sink.lock().unwrap_or_else(PoisonError::into_inner);
                log.push_str(message);
                log.push('\n');
            }
            forward.report(event);
        }));
        let adapter = ChannelAdapter::new(channels, &config.channel, adapter_reporter);

        let handshake = adapter.post(RequestBody::Initialize {
            settings: serde_json::json!({
                "client": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        })?;
        let (state_tx, state) = watch::channel(LifecycleState::Initializing);
        tokio::spawn(async move {
            match handshake.wait().await {
                Ok(_) => {
                    info!("Compute engine initialized.");
                    reporter.report(EngineEvent::Initialized);
                    state_tx.send_replace(LifecycleState::Ready);
                }
                Err(e) => {
                    error!("Compute engine failed to initialize: {}", e);
                    state_tx.send_replace(LifecycleState::Failed(e.to_string()));
                }
            }
        });

        Ok(Self {
            adapter,
            config,
            history: Mutex::new(History::new()),
            console,
            observer: Mutex::new(None),
            state,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    pub async fn wait_until_ready(&self) -> Result<(), EngineError> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| *s != LifecycleState::Initializing)
            .await
            .map_err(|_| {
                EngineError::Initialization("handshake ended without an outcome".to_string())
            })?;
        match &*settled {
            LifecycleState::Failed(reason) => Err(EngineError::Initialization(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Installs a hook called with every descriptor just before dispatch.
    pub fn set_observer(&self, observer: Option<CommandObserver>) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    fn observe(&self, descriptor: &CommandDescriptor) {
        if let Some(observer) = &*self.observer.lock().unwrap_or_else(PoisonError::into_inner) {
            observer(descriptor);
        }
    }

    /// Journals (when requested) and posts one command.
    ///
    /// The journal entry is written before the request is sent, so a command
    /// that later fails still appears in the history.
    pub fn issue(
        &self,
        descriptor: CommandDescriptor,
        journal: bool,
    ) -> Result<PendingReply, EngineError> {
        let descriptor = Arc::new(descriptor);
        self.observe(&descriptor);
        if journal && descriptor.changes_molecules {
            self.history().add_entry(descriptor.clone());
        }
        self.adapter
            .post(RequestBody::Command(descriptor.to_payload()))
    }

    pub async fn command(
        &self,
        descriptor: CommandDescriptor,
        journal: bool,
    ) -> Result<Reply, EngineError> {
        self.issue(descriptor, journal)?.wait().await
    }

    /// Posts several commands as one unit. Each mutating descriptor is
    /// journaled individually, in the given order.
    pub fn issue_list(
        &self,
        descriptors: Vec<CommandDescriptor>,
        journal: bool,
    ) -> Result<PendingReply, EngineError> {
        let descriptors: Vec<Arc<CommandDescriptor>> =
            descriptors.into_iter().map(Arc::new).collect();
        for descriptor in &descriptors {
            self.observe(descriptor);
        }
        if journal {
            let mut history = self.history();
            for descriptor in descriptors.iter().filter(|d| d.changes_molecules) {
                history.add_entry(descriptor.clone());
            }
        }
        let commands = descriptors.iter().map(|d| d.to_payload()).collect();
        self.adapter.post(RequestBody::CommandList { commands })
    }

    #[instrument(skip_all, fields(count = descriptors.len()))]
    pub async fn command_list(
        &self,
        descriptors: Vec<CommandDescriptor>,
        journal: bool,
    ) -> Result<Reply, EngineError> {
        self.issue_list(descriptors, journal)?.wait().await
    }

    pub fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn console_log(&self) -> String {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn in_flight(&self) -> usize {
        self.adapter.in_flight()
    }

    pub fn subscribe_in_flight(&self) -> watch::Receiver<usize> {
        self.adapter.subscribe_in_flight()
    }

    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.adapter.cancel(id)
    }

    pub fn shutdown(&self) {
        debug!("Shutting down command centre.");
        self.adapter.shutdown();
    }
}

impl std::fmt::Debug for CommandCentre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCentre")
            .field("state", &*self.state.borrow())
            .field("in_flight", &self.adapter.in_flight())
            .finish()
    }
}
