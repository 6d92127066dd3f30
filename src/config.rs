//! Session configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::delivery::DeliveryMode;
use crate::format::{FramerateClamp, DEFAULT_FPS_CEILING, DEFAULT_FPS_FLOOR};
use crate::pool::NUMBER_OF_CAPTURE_BUFFERS;

/// Error loading a [`SessionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The config is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The values are out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What a session captures and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Camera index to open.
    pub camera_index: u32,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested framerate in fps.
    pub framerate: u32,
    /// Frame delivery mode.
    pub delivery: DeliveryMode,
    /// Buffers primed for buffer-copy delivery.
    pub buffer_count: usize,
    /// Framerate clamp floor, fps × 1000.
    pub fps_floor: u32,
    /// Framerate clamp ceiling, fps × 1000.
    pub fps_ceiling: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 1280,
            height: 720,
            framerate: 30,
            delivery: DeliveryMode::BufferCopy,
            buffer_count: NUMBER_OF_CAPTURE_BUFFERS,
            fps_floor: DEFAULT_FPS_FLOOR,
            fps_ceiling: DEFAULT_FPS_CEILING,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(ConfigError::Invalid("framerate must be non-zero".to_owned()));
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "buffer_count must be non-zero".to_owned(),
            ));
        }
        if self.fps_floor > self.fps_ceiling {
            return Err(ConfigError::Invalid(format!(
                "fps_floor {} exceeds fps_ceiling {}",
                self.fps_floor, self.fps_ceiling
            )));
        }
        Ok(())
    }

    /// Framerate clamp for negotiation.
    #[must_use]
    pub const fn clamp(&self) -> FramerateClamp {
        FramerateClamp {
            floor: self.fps_floor,
            ceiling: self.fps_ceiling,
        }
    }
}
