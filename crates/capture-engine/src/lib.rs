//! Smilescope Capture Engine
//!
//! Discovers cameras, negotiates a live stream against the selected one,
//! and serializes the start/stop/switch/capture lifecycle so that exactly
//! one stream is bound to a session at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │               SessionController                │
//! │  ┌──────────────┐ ┌────────────┐ ┌───────────┐ │
//! │  │ DeviceCatalog│ │ Stream     │ │ Frame     │ │
//! │  │  (ranking)   │ │ Negotiator │ │ Capturer  │ │
//! │  └──────┬───────┘ └─────┬──────┘ └─────▲─────┘ │
//! │         │               │              │       │
//! │         ▼               ▼              │       │
//! │  ┌──────────────────────────────────────────┐  │
//! │  │     CameraHost (V4L2 / synthetic)        │  │
//! │  └──────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod catalog;
pub mod negotiator;
pub mod session;
pub mod settings;
pub mod synthetic;

pub use capture::{CapturedPhoto, FrameCapturer, PhotoFormat};
pub use catalog::{
    classify, rank_devices, CaptureDevice, DefaultDevicePolicy, DeviceCatalog, DeviceCategory,
    FirstRanked, PreferDevice,
};
pub use negotiator::StreamNegotiator;
pub use session::*;
pub use settings::{CaptureSettings, Resolution, SettingsUpdate};
