use crate::error::{CliError, Result};
use densel::maps::settings::MapStyle;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileEngineConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileChannelConfig {
    #[serde(rename = "max-console-message-len")]
    pub max_console_message_len: Option<usize>,
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileMapConfig {
    pub radius: Option<f64>,
    pub alpha: Option<f32>,
    pub style: Option<MapStyle>,
    pub colour: Option<[f32; 3]>,
    #[serde(rename = "positive-colour")]
    pub positive_colour: Option<[f32; 3]>,
    #[serde(rename = "negative-colour")]
    pub negative_colour: Option<[f32; 3]>,
    #[serde(rename = "em-rmsd-multiplier")]
    pub em_rmsd_multiplier: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub engine: Option<FileEngineConfig>,
    pub channel: Option<FileChannelConfig>,
    pub maps: Option<FileMapConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|source| CliError::FileParsing {
            path: path.to_path_buf(),
            source: source.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
