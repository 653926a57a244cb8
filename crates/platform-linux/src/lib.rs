//! Smilescope Linux Platform Integration
//!
//! Camera host for Linux:
//! - **Discovery:** V4L2 device nodes read from sysfs
//! - **Streams:** GStreamer `v4l2src` pipelines feeding an appsink
//! - **Hot-plug:** sysfs polling broadcast as device changes
//! - **Permissions:** Capability detection and user guidance

pub mod devices;
pub mod formats;
mod host;
pub mod permissions;
pub mod stream;

pub use host::V4l2Host;
