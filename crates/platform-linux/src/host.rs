//! The Video4Linux camera host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{
    CameraHost, DeviceCapabilities, DeviceChange, HostDevice, LiveStream, StreamRequest,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::devices;
use crate::formats;
use crate::stream::GstLiveStream;

/// Camera host backed by V4L2 device nodes and GStreamer pipelines.
pub struct V4l2Host {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    poll_interval: Duration,
    next_stream_id: AtomicU64,
    changes: broadcast::Sender<DeviceChange>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl V4l2Host {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_roots(devices::SYSFS_VIDEO4LINUX, devices::DEV_ROOT, poll_interval)
    }

    pub fn with_roots(
        sysfs_root: impl Into<PathBuf>,
        dev_root: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            poll_interval,
            next_stream_id: AtomicU64::new(1),
            changes,
            poller: Mutex::new(None),
        }
    }

    /// Start polling sysfs for hot-plug changes. Idempotent; must be
    /// called from within a Tokio runtime.
    pub fn start_hotplug_monitor(&self) {
        let mut slot = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let sysfs_root = self.sysfs_root.clone();
        let dev_root = self.dev_root.clone();
        let changes = self.changes.clone();
        let period = self.poll_interval.max(Duration::from_millis(50));
        *slot = Some(tokio::spawn(async move {
            let mut known = devices::enumerate_from(&sysfs_root, &dev_root)
                .map(|d| devices::capture_ids(&d))
                .unwrap_or_default();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let current = match devices::enumerate_from(&sysfs_root, &dev_root) {
                    Ok(d) => devices::capture_ids(&d),
                    Err(e) => {
                        tracing::debug!(error = %e, "Hot-plug poll failed");
                        continue;
                    }
                };
                if let Some(change) = devices::diff(&known, &current) {
                    tracing::info!(added = ?change.added, removed = ?change.removed, "Camera hot-plug detected");
                    // No subscribers is fine; the next subscriber re-enumerates anyway.
                    let _ = changes.send(change);
                    known = current;
                }
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "Hot-plug monitor started");
    }
}

impl Drop for V4l2Host {
    fn drop(&mut self) {
        let slot = self.poller.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Check that the node exists and can be opened for capture.
fn check_node_access(path: &Path) -> SmilescopeResult<()> {
    match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(SmilescopeError::access_denied(
            path.to_string_lossy(),
            "device not found",
        )),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(SmilescopeError::access_denied(
            path.to_string_lossy(),
            "permission denied; add the user to the 'video' group",
        )),
        Err(e) => Err(SmilescopeError::access_denied(path.to_string_lossy(), e.to_string())),
    }
}

#[async_trait::async_trait]
impl CameraHost for V4l2Host {
    fn name(&self) -> &str {
        "v4l2"
    }

    async fn enumerate_devices(&self) -> SmilescopeResult<Vec<HostDevice>> {
        let sysfs_root = self.sysfs_root.clone();
        let dev_root = self.dev_root.clone();
        tokio::task::spawn_blocking(move || devices::enumerate_from(&sysfs_root, &dev_root))
            .await
            .map_err(|e| SmilescopeError::enumeration(format!("enumeration task failed: {e}")))?
    }

    async fn open_stream(&self, request: &StreamRequest) -> SmilescopeResult<Box<dyn LiveStream>> {
        let device = request.device_id.value().clone();
        check_node_access(Path::new(&device))?;

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let request = request.clone();
        let stream = tokio::task::spawn_blocking(move || GstLiveStream::open(stream_id, &device, &request))
            .await
            .map_err(|e| SmilescopeError::platform(format!("stream open task failed: {e}")))??;
        Ok(Box::new(stream))
    }

    async fn capabilities(&self, device_id: &str) -> SmilescopeResult<Option<DeviceCapabilities>> {
        let device = device_id.to_string();
        tokio::task::spawn_blocking(move || formats::probe_capabilities(&device))
            .await
            .map_err(|e| SmilescopeError::platform(format!("capability probe task failed: {e}")))
    }

    fn subscribe_device_changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilescope_platform_core::DeviceKind;

    fn fake_root(test: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("smilescope_host_{test}"));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("sys")).unwrap();
        std::fs::create_dir_all(root.join("dev")).unwrap();
        root
    }

    fn add_camera(root: &Path, node: &str, name: &str) {
        let dir = root.join("sys").join(node);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("name"), name).unwrap();
        std::fs::write(dir.join("index"), "0").unwrap();
    }

    #[tokio::test]
    async fn enumerates_from_configured_roots() {
        let root = fake_root("enumerate");
        add_camera(&root, "video0", "HD Webcam C920");

        let host = V4l2Host::with_roots(root.join("sys"), root.join("dev"), Duration::from_secs(1));
        let devices = host.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].kind, DeviceKind::VideoInput);
        assert!(devices[0].id.ends_with("dev/video0"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn missing_node_is_access_denied() {
        let root = fake_root("missing_node");
        let host = V4l2Host::with_roots(root.join("sys"), root.join("dev"), Duration::from_secs(1));
        let path = root.join("dev").join("video9");

        let err = host
            .open_stream(&StreamRequest::for_device(path.to_string_lossy()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SmilescopeError::StreamAccessDenied { .. }));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn hotplug_monitor_reports_new_camera() {
        let root = fake_root("hotplug");
        let host = V4l2Host::with_roots(root.join("sys"), root.join("dev"), Duration::from_millis(50));
        let mut changes = host.subscribe_device_changes();
        host.start_hotplug_monitor();
        tokio::time::sleep(Duration::from_millis(20)).await;

        add_camera(&root, "video2", "USB Camera");
        let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.added.len(), 1);
        assert!(change.added[0].ends_with("video2"));
        assert!(change.removed.is_empty());

        std::fs::remove_dir_all(&root).ok();
    }
}
