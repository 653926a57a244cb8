//! Camera session lifecycle.
//!
//! The [`SessionController`] owns at most one live stream and serializes
//! every transition of it:
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Active ──stop──▶ Stopping ──▶ Idle
//!                    │
//!                    └──err──▶ Idle
//! ```
//!
//! `start`, `switch_device`, `cycle_device` and `update_settings` are
//! rejected with `SessionBusy` while another lifecycle operation is in
//! flight. `stop`, `shutdown` and device-change handling wait for it
//! instead, so a stop issued during `Starting` releases whatever stream
//! the in-flight negotiation produced.

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{CameraHost, LiveStream, StreamInfo};
use tokio::sync::{broadcast, broadcast::error::RecvError, broadcast::error::TryRecvError, watch};
use tokio::task::JoinHandle;

use crate::capture::{CapturedPhoto, FrameCapturer};
use crate::catalog::{CaptureDevice, DefaultDevicePolicy, DeviceCatalog, FirstRanked};
use crate::negotiator::StreamNegotiator;
use crate::settings::{CaptureSettings, SettingsUpdate};

/// State of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No stream. Initial and terminal state of every cycle.
    Idle,
    /// A stream is being negotiated.
    Starting,
    /// A stream is live and bound to the session.
    Active,
    /// The bound stream is being released.
    Stopping,
}

/// A state change, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Device the next `start` without arguments will use.
    pub selected_device_id: Option<String>,
    /// Device bound to the live stream.
    pub active_device_id: Option<String>,
    pub active_stream: Option<StreamInfo>,
    pub settings: CaptureSettings,
    /// Ranked devices from the last successful refresh.
    pub devices: Vec<CaptureDevice>,
    pub last_error: Option<String>,
}

/// Renders the live stream. Only told when a stream is published or
/// withdrawn; it never owns the stream.
pub trait VideoSink: Send + Sync {
    fn attach(&self, stream: &StreamInfo);
    fn detach(&self);
}

/// Configures a [`SessionController`].
pub struct SessionBuilder {
    host: Arc<dyn CameraHost>,
    settings: CaptureSettings,
    policy: Box<dyn DefaultDevicePolicy>,
    sink: Option<Arc<dyn VideoSink>>,
}

impl SessionBuilder {
    pub fn new(host: Arc<dyn CameraHost>) -> Self {
        Self {
            host,
            settings: CaptureSettings::default(),
            policy: Box::new(FirstRanked),
            sink: None,
        }
    }

    pub fn settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn policy(mut self, policy: impl DefaultDevicePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn video_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> SessionController {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            state: SessionState::Idle,
            selected_device_id: None,
            active_device_id: None,
            active_stream: None,
            settings: self.settings,
            devices: Vec::new(),
            last_error: None,
        });
        let (transitions, _) = broadcast::channel(64);

        SessionController {
            shared: Arc::new(Shared {
                catalog: DeviceCatalog::new(Arc::clone(&self.host)),
                negotiator: StreamNegotiator::new(Arc::clone(&self.host)),
                host: self.host,
                policy: self.policy,
                sink: self.sink,
                lifecycle: tokio::sync::Mutex::new(()),
                stream: tokio::sync::RwLock::new(None),
                snapshot,
                transitions,
            }),
            watcher: Mutex::new(None),
        }
    }
}

/// Owns the camera stream and every transition of it.
///
/// No stream outlives its controller: dropping the controller releases a
/// stream that is still bound. Prefer [`SessionController::shutdown`] to
/// observe the release.
pub struct SessionController {
    shared: Arc<Shared>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    host: Arc<dyn CameraHost>,
    catalog: DeviceCatalog,
    negotiator: StreamNegotiator,
    policy: Box<dyn DefaultDevicePolicy>,
    sink: Option<Arc<dyn VideoSink>>,
    /// Held for the whole of every lifecycle operation.
    lifecycle: tokio::sync::Mutex<()>,
    stream: tokio::sync::RwLock<Option<Box<dyn LiveStream>>>,
    snapshot: watch::Sender<SessionSnapshot>,
    transitions: broadcast::Sender<StateTransition>,
}

impl SessionController {
    pub fn new(host: Arc<dyn CameraHost>, settings: CaptureSettings) -> Self {
        SessionBuilder::new(host).settings(settings).build()
    }

    pub fn builder(host: Arc<dyn CameraHost>) -> SessionBuilder {
        SessionBuilder::new(host)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Latest snapshot, updated on every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Every state transition, including the intermediate ones a
    /// snapshot subscriber may skip.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.shared.transitions.subscribe()
    }

    pub fn devices(&self) -> Vec<CaptureDevice> {
        self.shared.snapshot.borrow().devices.clone()
    }

    /// Re-enumerate and rank devices.
    ///
    /// On failure the cached list is cleared and the error returned; callers
    /// should treat it as "no cameras" rather than fatal.
    pub async fn refresh_devices(&self) -> SmilescopeResult<Vec<CaptureDevice>> {
        self.shared.refresh_devices().await
    }

    /// Open a stream. Legal from `Idle` only.
    ///
    /// Without `device_id` the selected device is used, or the default
    /// policy's pick after a refresh. `settings`, when given, replace the
    /// session settings before negotiation.
    pub async fn start(
        &self,
        device_id: Option<&str>,
        settings: Option<CaptureSettings>,
    ) -> SmilescopeResult<()> {
        let _guard = self.shared.try_lifecycle("start")?;
        self.shared.reconcile().await;
        self.shared
            .start_locked(device_id.map(str::to_string), settings)
            .await
    }

    /// Release the stream. A no-op when idle.
    pub async fn stop(&self) -> SmilescopeResult<()> {
        let _guard = self.shared.lifecycle.lock().await;
        self.shared.reconcile().await;
        self.shared.stop_locked().await
    }

    /// Bind the session to another device.
    ///
    /// While idle this only changes the device the next `start` uses. While
    /// active the stream is stopped and reopened on `device_id` with the
    /// current settings; the session is briefly `Idle` in between.
    pub async fn switch_device(&self, device_id: &str) -> SmilescopeResult<()> {
        let _guard = self.shared.try_lifecycle("switch_device")?;
        self.shared.reconcile().await;
        self.shared.switch_locked(device_id).await
    }

    /// Switch to the next device in ranked order, wrapping around.
    /// Does nothing with fewer than two known devices.
    pub async fn cycle_device(&self) -> SmilescopeResult<()> {
        let _guard = self.shared.try_lifecycle("cycle_device")?;
        self.shared.reconcile().await;

        let snapshot = self.shared.snapshot();
        if snapshot.devices.len() < 2 {
            return Ok(());
        }
        let current = snapshot
            .active_device_id
            .as_ref()
            .or(snapshot.selected_device_id.as_ref());
        let next = current
            .and_then(|id| snapshot.devices.iter().position(|d| &d.id == id))
            .map(|idx| (idx + 1) % snapshot.devices.len())
            .unwrap_or(0);
        let next_id = snapshot.devices[next].id.clone();
        self.shared.switch_locked(&next_id).await
    }

    /// Merge `update` into the session settings.
    ///
    /// While active, a change to resolution or frame rate restarts the
    /// stream on the same device. An update whose merged resolution and
    /// frame rate equal the current ones leaves the stream running, even if
    /// it names them explicitly. Quality is only read at capture time and
    /// never restarts the stream.
    ///
    /// If the restart cannot reopen the device the error is returned and
    /// the session is left `Idle` with the merged settings kept.
    pub async fn update_settings(&self, update: SettingsUpdate) -> SmilescopeResult<()> {
        let _guard = self.shared.try_lifecycle("update_settings")?;
        self.shared.reconcile().await;

        let before = self.shared.snapshot();
        let merged = before.settings.merged(&update);
        self.shared.update(|s| s.settings = merged);

        match (before.state, before.active_device_id) {
            (SessionState::Active, Some(device_id)) if before.settings.affects_stream(&merged) => {
                tracing::info!(%device_id, "Restarting stream with new settings");
                self.shared.stop_locked().await?;
                self.shared.start_locked(Some(device_id), None).await
            }
            _ => Ok(()),
        }
    }

    /// Snapshot the current frame at its negotiated size.
    pub async fn capture(&self) -> SmilescopeResult<CapturedPhoto> {
        if self.state() != SessionState::Active {
            return Err(SmilescopeError::NotStreaming);
        }
        let (frame, device_id) = {
            let slot = self.shared.stream.read().await;
            let stream = slot.as_ref().ok_or(SmilescopeError::NotStreaming)?;
            (stream.current_frame().await?, stream.info().device_id.clone())
        };
        let quality = self.shared.snapshot.borrow().settings.quality;
        FrameCapturer.capture(frame, quality, &device_id)
    }

    /// React to host hot-plug notifications.
    ///
    /// Bursts of notifications are coalesced, handling waits for any
    /// in-flight lifecycle operation, and a stream whose device vanished is
    /// stopped. Must be called from within a Tokio runtime. Calling it again
    /// replaces the previous watcher.
    pub fn watch_device_changes(&self) {
        let mut changes = self.shared.host.subscribe_device_changes();
        let shared = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        tracing::debug!(added = ?change.added, removed = ?change.removed, "Device change");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Device change notifications coalesced");
                    }
                    Err(RecvError::Closed) => break,
                }
                loop {
                    match changes.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                let Some(shared) = Weak::upgrade(&shared) else {
                    break;
                };
                shared.handle_device_change().await;
            }
        });

        let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop unconditionally. Release failures are logged, not returned,
    /// since no caller remains to act on them.
    pub async fn shutdown(&self) {
        self.stop_watcher();
        let _guard = self.shared.lifecycle.lock().await;
        self.shared.reconcile().await;
        if let Err(e) = self.shared.stop_locked().await {
            tracing::warn!(error = %e, "Failed to release stream during shutdown");
        }
    }

    fn stop_watcher(&self) {
        let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

impl Shared {
    fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        let mut transition = None;
        self.snapshot.send_modify(|s| {
            let from = s.state;
            f(s);
            if s.state != from {
                transition = Some(StateTransition { from, to: s.state });
            }
        });
        if let Some(t) = transition {
            tracing::debug!(from = ?t.from, to = ?t.to, "Session state changed");
            let _ = self.transitions.send(t);
        }
    }

    fn try_lifecycle(
        &self,
        operation: &'static str,
    ) -> SmilescopeResult<tokio::sync::MutexGuard<'_, ()>> {
        self.lifecycle.try_lock().map_err(|_| {
            tracing::debug!(operation, "Lifecycle operation rejected; session busy");
            SmilescopeError::busy(operation)
        })
    }

    /// Repair a transient state left behind by a cancelled operation.
    /// Only called with the lifecycle lock held.
    async fn reconcile(&self) {
        let state = self.state();
        if !matches!(state, SessionState::Starting | SessionState::Stopping) {
            return;
        }
        let info = self.stream.read().await.as_ref().map(|s| s.info().clone());
        tracing::warn!(?state, live = info.is_some(), "Recovering from interrupted lifecycle operation");
        self.update(|s| match info {
            Some(info) => {
                s.state = SessionState::Active;
                s.active_device_id = Some(info.device_id.clone());
                s.active_stream = Some(info);
            }
            None => {
                s.state = SessionState::Idle;
                s.active_device_id = None;
                s.active_stream = None;
            }
        });
    }

    async fn refresh_devices(&self) -> SmilescopeResult<Vec<CaptureDevice>> {
        match self.catalog.refresh_devices().await {
            Ok(devices) => {
                let fallback = self.policy.choose(&devices);
                self.update(|s| {
                    let selected_present = s
                        .selected_device_id
                        .as_ref()
                        .is_some_and(|id| devices.iter().any(|d| &d.id == id));
                    if !selected_present {
                        s.selected_device_id = fallback;
                    }
                    s.devices = devices.clone();
                });
                Ok(devices)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Device enumeration failed; treating catalog as empty");
                self.update(|s| {
                    s.devices.clear();
                    s.selected_device_id = None;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn start_locked(
        &self,
        device_id: Option<String>,
        settings: Option<CaptureSettings>,
    ) -> SmilescopeResult<()> {
        if self.state() != SessionState::Idle {
            return Err(SmilescopeError::AlreadyStreaming);
        }
        if let Some(settings) = settings {
            self.update(|s| s.settings = settings);
        }

        let device_id = match device_id {
            Some(id) => id,
            None => match self.resolve_default_device().await {
                Some(id) => id,
                None => {
                    let err = SmilescopeError::NoDevice;
                    self.update(|s| s.last_error = Some(err.to_string()));
                    return Err(err);
                }
            },
        };

        self.update(|s| {
            s.state = SessionState::Starting;
            s.selected_device_id = Some(device_id.clone());
            s.last_error = None;
        });
        tracing::info!(%device_id, "Starting camera session");

        let settings = self.snapshot.borrow().settings;
        match self.negotiator.open_stream(&device_id, &settings).await {
            Ok(stream) => {
                let info = stream.info().clone();
                *self.stream.write().await = Some(stream);
                if let Some(sink) = &self.sink {
                    sink.attach(&info);
                }
                self.update(|s| {
                    s.state = SessionState::Active;
                    s.active_device_id = Some(device_id);
                    s.active_stream = Some(info);
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%device_id, error = %e, "Failed to start camera");
                self.update(|s| {
                    s.state = SessionState::Idle;
                    s.active_device_id = None;
                    s.active_stream = None;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn resolve_default_device(&self) -> Option<String> {
        let selected = self.snapshot.borrow().selected_device_id.clone();
        if selected.is_some() {
            return selected;
        }
        if let Err(e) = self.refresh_devices().await {
            tracing::debug!(error = %e, "No devices to choose a default from");
        }
        self.snapshot.borrow().selected_device_id.clone()
    }

    async fn stop_locked(&self) -> SmilescopeResult<()> {
        if self.state() == SessionState::Idle {
            return Ok(());
        }
        self.update(|s| s.state = SessionState::Stopping);

        let stream = self.stream.write().await.take();
        let result = match stream {
            Some(mut stream) => {
                let stream_id = stream.info().stream_id;
                let result = stream.stop().await;
                drop(stream);
                tracing::info!(stream_id, "Stream released");
                result
            }
            None => Ok(()),
        };
        if let Some(sink) = &self.sink {
            sink.detach();
        }

        self.update(|s| {
            s.state = SessionState::Idle;
            s.active_device_id = None;
            s.active_stream = None;
            if let Err(e) = &result {
                s.last_error = Some(e.to_string());
            }
        });
        result
    }

    async fn switch_locked(&self, device_id: &str) -> SmilescopeResult<()> {
        match self.state() {
            SessionState::Active => {
                tracing::info!(device_id, "Switching camera");
                self.stop_locked().await?;
                self.start_locked(Some(device_id.to_string()), None).await
            }
            _ => {
                self.update(|s| s.selected_device_id = Some(device_id.to_string()));
                Ok(())
            }
        }
    }

    async fn handle_device_change(&self) {
        let _guard = self.lifecycle.lock().await;
        self.reconcile().await;

        // A failed enumeration says nothing about the active device.
        let devices = match self.refresh_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping device change; enumeration failed");
                return;
            }
        };
        let active = self.snapshot.borrow().active_device_id.clone();
        if let Some(active) = active {
            if !devices.iter().any(|d| d.id == active) {
                tracing::warn!(device_id = %active, "Active camera disappeared; stopping stream");
                if let Err(e) = self.stop_locked().await {
                    tracing::warn!(error = %e, "Failed to release stream of removed camera");
                }
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.get_mut().take() {
            tracing::warn!(
                stream_id = stream.info().stream_id,
                "Session dropped with a live stream; releasing"
            );
            drop(stream);
        }
    }
}
