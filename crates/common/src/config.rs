//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where captured photos are written.
    pub capture_dir: PathBuf,

    /// Default camera settings.
    pub camera: CameraDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default camera parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    /// Requested ideal width in pixels.
    pub width: u32,

    /// Requested ideal height in pixels.
    pub height: u32,

    /// Requested ideal frame rate.
    pub frame_rate: u32,

    /// Still-image encode quality in `[0.0, 1.0]`.
    pub quality: f32,

    /// Device id to prefer over the ranked default, if present.
    pub preferred_device: Option<String>,

    /// How often the host device list is polled for hot-plug changes.
    pub device_poll_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "smilescope=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture_dir: default_capture_dir(),
            camera: CameraDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            quality: 0.8,
            preferred_device: None,
            device_poll_interval_ms: 1000,
        }
    }
}

impl CameraDefaults {
    /// Check ranges before a session is built from these values.
    pub fn validate(&self) -> Result<(), crate::error::SmilescopeError> {
        if self.width == 0 || self.height == 0 {
            return Err(crate::error::SmilescopeError::config(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(crate::error::SmilescopeError::config(
                "camera frame_rate must be non-zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(crate::error::SmilescopeError::config(format!(
                "camera quality must be within [0.0, 1.0], got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("smilescope").join("config.json")
}

/// Default directory for captured photos.
fn default_capture_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("smilescope").join("captures")
}
