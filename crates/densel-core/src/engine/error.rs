use crate::core::mesh::MeshError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Compute engine raised an exception in '{command}': {diagnostic}")]
    Remote { command: String, diagnostic: String },

    #[error("Failed to decode '{command}' reply: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid mesh returned by '{command}': {source}")]
    InvalidMesh {
        command: String,
        #[source]
        source: MeshError,
    },

    #[error("Request '{command}' timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Request '{command}' was cancelled")]
    Cancelled { command: String },

    #[error("Worker channel closed before '{command}' received a reply")]
    ChannelClosed { command: String },

    #[error("Failed to fetch '{source_name}': {reason}")]
    Fetch { source_name: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Fetch {
            source_name: e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown url>".to_string()),
            reason: e.to_string(),
        }
    }
}
