use densel::engine::events::{EngineEvent, EventCallback};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::warn;

#[derive(Debug)]
pub enum UiEvent {
    Engine(EngineEvent),
    Log(String),
}

pub struct UiManager {
    mp: Arc<MultiProgress>,
    state: SpinnerState,
    event_receiver: mpsc::Receiver<UiEvent>,
    shutdown_receiver: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

#[derive(Default)]
struct SpinnerState {
    busy: Option<ProgressBar>,
    last_command: String,
    active: usize,
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, event_receiver) = mpsc::channel(1024);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mp = Arc::new(MultiProgress::new());
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            state: SpinnerState::default(),
            event_receiver,
            shutdown_receiver,
            _sentinel_bar,
        };

        (manager, event_sender, shutdown_sender)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.event_receiver.recv() => {
                    self.handle_event(event);
                }
                result = self.shutdown_receiver.changed() => {
                    if result.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }
            }
        }
        if let Some(bar) = self.state.busy.take() {
            bar.finish_and_clear();
        }
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => {
                self.mp.println(msg).ok();
            }
            UiEvent::Engine(event) => self.handle_engine_event(event),
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Initialized => {
                self.mp.println("✓ Compute engine ready").ok();
            }
            EngineEvent::CommandStart { command, .. } => {
                self.state.last_command = command;
                self.refresh_message();
            }
            EngineEvent::CommandExit { command, ok, .. } => {
                if !ok {
                    self.mp.println(format!("✗ {} failed", command)).ok();
                }
            }
            EngineEvent::ConsoleMessage(msg) => {
                self.mp.println(format!("  {}", msg)).ok();
            }
            EngineEvent::BusyChanged { active } => {
                self.state.active = active;
                if active == 0 {
                    if let Some(bar) = self.state.busy.take() {
                        bar.finish_and_clear();
                    }
                    return;
                }
                if self.state.busy.is_none() {
                    let pb = self.mp.add(ProgressBar::new_spinner());
                    pb.enable_steady_tick(Duration::from_millis(80));
                    pb.set_style(Self::spinner_style());
                    self.state.busy = Some(pb);
                }
                self.refresh_message();
            }
        }
    }

    fn refresh_message(&self) {
        if let Some(bar) = self.state.busy.as_ref() {
            bar.set_message(format!(
                "{} ({} in flight)",
                self.state.last_command, self.state.active
            ));
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }
}

/// Forwards engine lifecycle events into the UI channel.
#[derive(Clone)]
pub struct CliEventHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliEventHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn get_callback(&self) -> EventCallback<'static> {
        let sender = self.sender.clone();
        Box::new(move |event: EngineEvent| {
            if let Err(e) = sender.try_send(UiEvent::Engine(event)) {
                warn!("Failed to send engine event to UI channel: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use densel::engine::protocol::CorrelationId;

    fn setup_manager() -> (UiManager, mpsc::Sender<UiEvent>) {
        let (manager, sender, _) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        (manager, sender)
    }

    fn start(command: &str) -> UiEvent {
        UiEvent::Engine(EngineEvent::CommandStart {
            id: CorrelationId::new_v4(),
            command: command.to_string(),
        })
    }

    fn busy(active: usize) -> UiEvent {
        UiEvent::Engine(EngineEvent::BusyChanged { active })
    }

    #[test]
    fn busy_engine_shows_spinner_with_last_command() {
        let (mut manager, _) = setup_manager();
        assert!(manager.state.busy.is_none());

        manager.handle_event(start("read_ccp4_map"));
        manager.handle_event(busy(1));

        let bar = manager.state.busy.as_ref().unwrap();
        assert_eq!(bar.message(), "read_ccp4_map (1 in flight)");
    }

    #[test]
    fn later_commands_update_the_existing_spinner() {
        let (mut manager, _) = setup_manager();
        manager.handle_event(busy(1));
        manager.handle_event(start("is_EM_map"));
        manager.handle_event(busy(2));

        assert_eq!(
            manager.state.busy.as_ref().unwrap().message(),
            "is_EM_map (2 in flight)"
        );
    }

    #[test]
    fn idle_engine_clears_spinner() {
        let (mut manager, _) = setup_manager();
        manager.handle_event(busy(1));
        assert!(manager.state.busy.is_some());

        manager.handle_event(busy(0));

        assert!(manager.state.busy.is_none());
        assert_eq!(manager.state.active, 0);
    }

    #[test]
    fn messages_and_failures_are_printed_without_spinner() {
        let (mut manager, _) = setup_manager();
        manager.handle_event(UiEvent::Log("plain log".to_string()));
        manager.handle_event(UiEvent::Engine(EngineEvent::ConsoleMessage(
            "warning from engine".to_string(),
        )));
        manager.handle_event(UiEvent::Engine(EngineEvent::CommandExit {
            id: CorrelationId::new_v4(),
            command: "close_molecule".to_string(),
            ok: false,
        }));
        manager.handle_event(UiEvent::Engine(EngineEvent::Initialized));
        assert!(manager.state.busy.is_none());
    }

    #[tokio::test]
    async fn event_handler_forwards_engine_events() {
        let (sender, mut receiver) = mpsc::channel(1);
        let handler = CliEventHandler::new(sender);
        let callback = handler.get_callback();

        callback(EngineEvent::BusyChanged { active: 3 });

        match receiver.recv().await.unwrap() {
            UiEvent::Engine(EngineEvent::BusyChanged { active }) => assert_eq!(active, 3),
            other => panic!("Incorrect event received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_exits_on_shutdown_signal() {
        let (manager, _sender, shutdown) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        let handle = tokio::spawn(manager.run());

        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
