use super::protocol::CorrelationId;

/// Lifecycle notifications raised by the channel adapter and command centre.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The initialize handshake completed.
    Initialized,
    CommandStart {
        id: CorrelationId,
        command: String,
    },
    CommandExit {
        id: CorrelationId,
        command: String,
        ok: bool,
    },
    /// A (truncated) diagnostic line from the worker.
    ConsoleMessage(String),
    /// The number of requests awaiting a reply changed.
    BusyChanged {
        active: usize,
    },
}

pub type EventCallback<'a> = Box<dyn Fn(EngineEvent) + Send + Sync + 'a>;

#[derive(Default)]
pub struct EventReporter<'a> {
    callback: Option<EventCallback<'a>>,
}

impl<'a> EventReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: EventCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: EngineEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

impl std::fmt::Debug for EventReporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
