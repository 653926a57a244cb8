//! Host and session construction shared by the commands.

use std::sync::Arc;
use std::time::Duration;

use smilescope_capture_engine::synthetic::SyntheticHost;
use smilescope_capture_engine::{CaptureSettings, PreferDevice, SessionController};
use smilescope_common::config::AppConfig;
use smilescope_platform_core::CameraHost;
use smilescope_platform_linux::V4l2Host;

/// The camera host for this run. `hotplug` starts device polling on the
/// V4L2 host; the synthetic host never changes on its own.
pub fn camera_host(synthetic: bool, config: &AppConfig, hotplug: bool) -> Arc<dyn CameraHost> {
    if synthetic {
        tracing::debug!("Using synthetic camera host");
        return Arc::new(SyntheticHost::demo());
    }

    let host = V4l2Host::new(Duration::from_millis(config.camera.device_poll_interval_ms));
    if hotplug {
        host.start_hotplug_monitor();
    }
    Arc::new(host)
}

pub fn session(
    host: Arc<dyn CameraHost>,
    config: &AppConfig,
    settings: CaptureSettings,
) -> SessionController {
    let builder = SessionController::builder(host).settings(settings);
    match &config.camera.preferred_device {
        Some(id) => builder.policy(PreferDevice(id.clone())).build(),
        None => builder.build(),
    }
}
