//! Requested capture settings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smilescope_common::config::CameraDefaults;
use smilescope_common::error::SmilescopeError;

/// Pixel dimensions, written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = SmilescopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| SmilescopeError::config(format!("invalid resolution {s:?}, expected WxH")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| SmilescopeError::config(format!("invalid resolution {s:?}, expected WxH")))
        };
        Ok(Self::new(parse(w)?, parse(h)?))
    }
}

/// What the caller asks of a stream, plus the still-encode quality.
///
/// `width`, `height` and `frame_rate` are negotiation inputs. `quality` is
/// consumed only when a still is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub quality: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&CameraDefaults::default())
    }
}

impl From<&CameraDefaults> for CaptureSettings {
    fn from(defaults: &CameraDefaults) -> Self {
        Self {
            width: defaults.width,
            height: defaults.height,
            frame_rate: defaults.frame_rate,
            quality: defaults.quality.clamp(0.0, 1.0),
        }
    }
}

impl CaptureSettings {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Apply a partial update, returning the merged settings.
    pub fn merged(&self, update: &SettingsUpdate) -> Self {
        let resolution = update.resolution.unwrap_or(self.resolution());
        Self {
            width: resolution.width,
            height: resolution.height,
            frame_rate: update.frame_rate.unwrap_or(self.frame_rate),
            quality: update.quality.unwrap_or(self.quality).clamp(0.0, 1.0),
        }
    }

    /// Whether moving to `other` requires a new stream.
    pub fn affects_stream(&self, other: &Self) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.frame_rate != other.frame_rate
    }
}

/// Partial settings; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<u32>,
    pub quality: Option<f32>,
}

impl SettingsUpdate {
    pub fn frame_rate(frame_rate: u32) -> Self {
        Self {
            frame_rate: Some(frame_rate),
            ..Self::default()
        }
    }

    pub fn resolution(resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..Self::default()
        }
    }

    pub fn quality(quality: f32) -> Self {
        Self {
            quality: Some(quality),
            ..Self::default()
        }
    }
}
