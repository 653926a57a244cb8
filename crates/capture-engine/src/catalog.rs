//! Capture device discovery and ranking.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{CameraHost, DeviceKind, HostDevice};

const EXTERNAL_KEYWORDS: &[&str] = &["external", "usb", "webcam", "logitech", "c920", "c922"];
const FRONT_FACING_KEYWORDS: &[&str] = &["front", "user", "selfie"];
const SHORT_LABEL_MAX: usize = 30;

/// Best-effort classification derived from the device label.
///
/// This is a display and ordering hint only. Nothing correctness-critical
/// depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    External,
    FrontFacing,
    Other,
}

/// A normalized capture device from one enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: String,
    pub display_label: String,
    pub category: DeviceCategory,
    pub group_id: Option<String>,
}

impl CaptureDevice {
    fn from_host(device: HostDevice) -> Self {
        let display_label = if device.label.trim().is_empty() {
            anonymous_label(&device.id)
        } else {
            device.label
        };
        Self {
            category: classify(&display_label),
            id: device.id,
            display_label,
            group_id: device.group_id,
        }
    }

    /// Compact label for narrow displays.
    pub fn short_label(&self) -> String {
        let mut label = self.display_label.trim();
        if label
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("camera"))
        {
            label = &label[6..];
        }

        let mut stripped = String::with_capacity(label.len());
        let mut depth = 0usize;
        for ch in label.chars() {
            match ch {
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                _ if depth == 0 => stripped.push(ch),
                _ => {}
            }
        }

        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return "Unknown Camera".to_string();
        }
        if collapsed.chars().count() > SHORT_LABEL_MAX {
            let head: String = collapsed.chars().take(SHORT_LABEL_MAX - 3).collect();
            return format!("{head}...");
        }
        collapsed
    }
}

fn anonymous_label(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("Camera {prefix}...")
}

/// Classify a device label by substring heuristics.
pub fn classify(label: &str) -> DeviceCategory {
    let label = label.to_lowercase();
    if EXTERNAL_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        DeviceCategory::External
    } else if FRONT_FACING_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        DeviceCategory::FrontFacing
    } else {
        DeviceCategory::Other
    }
}

/// Filter, de-duplicate, normalize and rank raw host devices.
///
/// External devices come first; ties are broken by an ordinal compare of
/// the display label. The sort is stable, so identical input order gives
/// identical output.
pub fn rank_devices(devices: Vec<HostDevice>) -> Vec<CaptureDevice> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<CaptureDevice> = devices
        .into_iter()
        .filter(|d| d.kind == DeviceKind::VideoInput)
        .filter(|d| seen.insert(d.id.clone()))
        .map(CaptureDevice::from_host)
        .collect();

    ranked.sort_by(|a, b| {
        let a_external = a.category == DeviceCategory::External;
        let b_external = b.category == DeviceCategory::External;
        b_external
            .cmp(&a_external)
            .then_with(|| a.display_label.cmp(&b.display_label))
    });
    ranked
}

/// Reads the host device list and ranks it. Holds no state between calls.
#[derive(Clone)]
pub struct DeviceCatalog {
    host: Arc<dyn CameraHost>,
}

impl DeviceCatalog {
    pub fn new(host: Arc<dyn CameraHost>) -> Self {
        Self { host }
    }

    pub async fn refresh_devices(&self) -> SmilescopeResult<Vec<CaptureDevice>> {
        let devices = self.host.enumerate_devices().await.map_err(|e| match e {
            SmilescopeError::DeviceEnumeration { .. } => e,
            other => SmilescopeError::enumeration(other.to_string()),
        })?;
        let ranked = rank_devices(devices);
        tracing::debug!(host = self.host.name(), count = ranked.len(), "Devices enumerated");
        Ok(ranked)
    }
}

/// Picks the device a session uses when the caller named none.
pub trait DefaultDevicePolicy: Send + Sync {
    fn choose(&self, devices: &[CaptureDevice]) -> Option<String>;
}

impl<F> DefaultDevicePolicy for F
where
    F: Fn(&[CaptureDevice]) -> Option<String> + Send + Sync,
{
    fn choose(&self, devices: &[CaptureDevice]) -> Option<String> {
        self(devices)
    }
}

/// First device in ranked order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstRanked;

impl DefaultDevicePolicy for FirstRanked {
    fn choose(&self, devices: &[CaptureDevice]) -> Option<String> {
        devices.first().map(|d| d.id.clone())
    }
}

/// A specific device when present, otherwise the first ranked one.
#[derive(Debug, Clone)]
pub struct PreferDevice(pub String);

impl DefaultDevicePolicy for PreferDevice {
    fn choose(&self, devices: &[CaptureDevice]) -> Option<String> {
        devices
            .iter()
            .find(|d| d.id == self.0)
            .or_else(|| devices.first())
            .map(|d| d.id.clone())
    }
}
