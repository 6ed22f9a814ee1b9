use crate::core::colour::Rgb;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default cap on the length of a diagnostic surfaced from the worker.
pub const DEFAULT_MAX_CONSOLE_MESSAGE_LEN: usize = 160;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Map rendering style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapStyle {
    #[default]
    Lines,
    Solid,
    LitLines,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub max_console_message_len: usize,
    /// `None` waits for a reply indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_console_message_len: DEFAULT_MAX_CONSOLE_MESSAGE_LEN,
            request_timeout: None,
        }
    }
}

/// Display defaults applied to newly loaded maps.
#[derive(Debug, Clone, PartialEq)]
pub struct MapDefaults {
    pub radius: f64,
    pub alpha: f32,
    pub style: MapStyle,
    pub colour: Rgb,
    pub positive_colour: Rgb,
    pub negative_colour: Rgb,
    /// Contour level of EM maps, in multiples of the map rmsd.
    pub em_rmsd_multiplier: f64,
}

impl Default for MapDefaults {
    fn default() -> Self {
        Self {
            radius: 13.0,
            alpha: 1.0,
            style: MapStyle::Lines,
            colour: Rgb::new(0.302, 0.337, 0.702),
            positive_colour: Rgb::new(0.4, 0.8, 0.4),
            negative_colour: Rgb::new(0.8, 0.4, 0.4),
            em_rmsd_multiplier: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineConfig {
    pub channel: ChannelConfig,
    pub maps: MapDefaults,
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    max_console_message_len: Option<usize>,
    request_timeout: Option<Duration>,
    map_radius: Option<f64>,
    map_alpha: Option<f32>,
    map_style: Option<MapStyle>,
    map_colour: Option<Rgb>,
    positive_colour: Option<Rgb>,
    negative_colour: Option<Rgb>,
    em_rmsd_multiplier: Option<f64>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_console_message_len(mut self, len: usize) -> Self {
        self.max_console_message_len = Some(len);
        self
    }
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
    pub fn map_radius(mut self, radius: f64) -> Self {
        self.map_radius = Some(radius);
        self
    }
    pub fn map_alpha(mut self, alpha: f32) -> Self {
        self.map_alpha = Some(alpha);
        self
    }
    pub fn map_style(mut self, style: MapStyle) -> Self {
        self.map_style = Some(style);
        self
    }
    pub fn map_colour(mut self, colour: Rgb) -> Self {
        self.map_colour = Some(colour);
        self
    }
    pub fn positive_colour(mut self, colour: Rgb) -> Self {
        self.positive_colour = Some(colour);
        self
    }
    pub fn negative_colour(mut self, colour: Rgb) -> Self {
        self.negative_colour = Some(colour);
        self
    }
    pub fn em_rmsd_multiplier(mut self, multiplier: f64) -> Self {
        self.em_rmsd_multiplier = Some(multiplier);
        self
    }

    /// Builds the configuration, filling unset fields with defaults and
    /// rejecting values outside their valid range.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let channel_defaults = ChannelConfig::default();
        let map_defaults = MapDefaults::default();

        let max_console_message_len = self
            .max_console_message_len
            .unwrap_or(channel_defaults.max_console_message_len);
        if max_console_message_len == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_console_message_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidParameter {
                name: "request_timeout",
                reason: "must be greater than zero when set".to_string(),
            });
        }

        let radius = self.map_radius.unwrap_or(map_defaults.radius);
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "map_radius",
                reason: format!("{} is not a positive finite radius", radius),
            });
        }
        let alpha = self.map_alpha.unwrap_or(map_defaults.alpha);
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::InvalidParameter {
                name: "map_alpha",
                reason: format!("{} is outside [0, 1]", alpha),
            });
        }
        let em_rmsd_multiplier = self
            .em_rmsd_multiplier
            .unwrap_or(map_defaults.em_rmsd_multiplier);
        if !(em_rmsd_multiplier.is_finite() && em_rmsd_multiplier > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "em_rmsd_multiplier",
                reason: format!("{} is not a positive finite multiplier", em_rmsd_multiplier),
            });
        }

        Ok(EngineConfig {
            channel: ChannelConfig {
                max_console_message_len,
                request_timeout: self.request_timeout,
            },
            maps: MapDefaults {
                radius,
                alpha,
                style: self.map_style.unwrap_or(map_defaults.style),
                colour: self.map_colour.unwrap_or(map_defaults.colour).clamped(),
                positive_colour: self
                    .positive_colour
                    .unwrap_or(map_defaults.positive_colour)
                    .clamped(),
                negative_colour: self
                    .negative_colour
                    .unwrap_or(map_defaults.negative_colour)
                    .clamped(),
                em_rmsd_multiplier,
            },
        })
    }
}
