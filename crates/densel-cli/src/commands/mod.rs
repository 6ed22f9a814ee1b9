pub mod contour;
pub mod exec;

use crate::config::AppConfig;
use crate::error::Result;
use crate::ui::{CliEventHandler, UiEvent};
use densel::engine::centre::CommandCentre;
use densel::engine::events::EventReporter;
use densel::engine::transport::{ProcessWorker, spawn_process_worker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A running engine process and the command centre talking to it.
pub struct EngineSession {
    pub centre: Arc<CommandCentre>,
    worker: ProcessWorker,
}

impl EngineSession {
    /// Launches the configured engine and waits for its handshake.
    pub async fn connect(app: &AppConfig, ui_sender: mpsc::Sender<UiEvent>) -> Result<Self> {
        let (channels, worker) = spawn_process_worker(&app.engine_program, &app.engine_args)?;
        let handler = CliEventHandler::new(ui_sender);
        let reporter = EventReporter::with_callback(handler.get_callback());
        let centre = Arc::new(CommandCentre::start(channels, app.engine.clone(), reporter)?);

        let session = Self { centre, worker };
        if let Err(e) = session.centre.wait_until_ready().await {
            session.close().await;
            return Err(e.into());
        }
        info!("Connected to compute engine '{}'.", app.engine_program);
        Ok(session)
    }

    pub async fn close(self) {
        self.centre.shutdown();
        if let Err(e) = self.worker.shutdown().await {
            warn!("Failed to stop compute engine: {}", e);
        }
    }
}
