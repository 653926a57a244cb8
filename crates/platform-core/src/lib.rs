//! Smilescope platform core contracts.
//!
//! This crate defines the capability surface a host must provide to the
//! capture engine: device enumeration, live stream opening, and device
//! change notifications. Concrete hosts (Video4Linux, the synthetic host
//! used in tests) implement [`CameraHost`] without the engine knowing
//! which one it talks to.

use serde::{Deserialize, Serialize};
use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use tokio::sync::broadcast;

/// Kind of media device reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    Other,
}

/// Raw device triple as reported by the host, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDevice {
    /// Host-provided identifier, stable while the device stays attached.
    pub id: String,
    /// Human readable name. May be empty before access has been granted.
    pub label: String,
    pub kind: DeviceKind,
    /// Physical grouping (several nodes of one camera share a group).
    pub group_id: Option<String>,
}

impl HostDevice {
    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: DeviceKind::VideoInput,
            group_id: None,
        }
    }
}

/// A constraint value: `Exact` must be honoured or the request fails,
/// `Ideal` is a target the host may negotiate away from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint<T> {
    Exact(T),
    Ideal(T),
}

impl<T> Constraint<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Exact(v) | Self::Ideal(v) => v,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

/// Video-only stream request handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub device_id: Constraint<String>,
    pub width: Option<Constraint<u32>>,
    pub height: Option<Constraint<u32>>,
    pub frame_rate: Option<Constraint<u32>>,
}

impl StreamRequest {
    /// Request any stream from `device_id`, leaving format up to the host.
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Constraint::Exact(device_id.into()),
            width: None,
            height: None,
            frame_rate: None,
        }
    }
}

/// Upper bounds a device reports for its capture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_rate: u32,
}

/// Parameters of a stream as actually negotiated by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: u64,
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Ready state of the tracks of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Live,
    Ended,
}

/// A single decoded frame, tightly packed RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> SmilescopeResult<Self> {
        let expected = packed_len(width, height);
        if data.len() != expected {
            return Err(SmilescopeError::platform(format!(
                "frame buffer holds {} bytes, expected {expected} for {width}x{height} RGB",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a frame from rows that may carry trailing padding.
    pub fn from_strided(width: u32, height: u32, stride: usize, src: &[u8]) -> SmilescopeResult<Self> {
        let row = width as usize * 3;
        if stride < row || src.len() < stride * (height as usize).saturating_sub(1) + row {
            return Err(SmilescopeError::platform(format!(
                "strided buffer of {} bytes (stride {stride}) too small for {width}x{height} RGB",
                src.len()
            )));
        }
        let mut data = Vec::with_capacity(packed_len(width, height));
        for y in 0..height as usize {
            let start = y * stride;
            data.extend_from_slice(&src[start..start + row]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Notification that the host's device set changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// A live capture stream owned by exactly one caller.
///
/// Dropping a stream must release it; `stop` exists so callers can observe
/// release failures.
#[async_trait::async_trait]
pub trait LiveStream: Send + Sync {
    /// Negotiated stream parameters.
    fn info(&self) -> &StreamInfo;

    fn ready_state(&self) -> TrackState;

    /// Most recent frame at the negotiated size.
    async fn current_frame(&self) -> SmilescopeResult<RawFrame>;

    /// Stop all tracks. Calling it twice is a no-op.
    async fn stop(&mut self) -> SmilescopeResult<()>;
}

/// Capability surface a camera host exposes to the engine.
#[async_trait::async_trait]
pub trait CameraHost: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    async fn enumerate_devices(&self) -> SmilescopeResult<Vec<HostDevice>>;

    /// Open a stream for `request`.
    ///
    /// Fails with `StreamAccessDenied` when the device is missing, busy, or
    /// not permitted, and `StreamConstraint` when no format fits.
    async fn open_stream(&self, request: &StreamRequest) -> SmilescopeResult<Box<dyn LiveStream>>;

    /// Format limits of a device, if the host can report them.
    async fn capabilities(&self, _device_id: &str) -> SmilescopeResult<Option<DeviceCapabilities>> {
        Ok(None)
    }

    fn subscribe_device_changes(&self) -> broadcast::Receiver<DeviceChange>;
}
