//! In-memory camera host.
//!
//! Backs the test suite and the CLI `--synthetic` mode. Devices have a
//! native maximum format; ideal constraints are negotiated down to it and
//! exact constraints above it fail. Failures can be injected per device,
//! and every open/release is recorded so lifecycle invariants can be
//! checked from outside.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{
    CameraHost, Constraint, DeviceCapabilities, DeviceChange, DeviceKind, HostDevice, LiveStream,
    RawFrame, StreamInfo, StreamRequest, TrackState,
};
use tokio::sync::broadcast;

/// A fake camera and its native limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticDevice {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
    pub native_width: u32,
    pub native_height: u32,
    pub max_frame_rate: u32,
}

impl SyntheticDevice {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        native_width: u32,
        native_height: u32,
        max_frame_rate: u32,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: DeviceKind::VideoInput,
            native_width,
            native_height,
            max_frame_rate,
        }
    }
}

/// Stream lifecycle record, in the order the host observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Opened { stream_id: u64, device_id: String },
    Released { stream_id: u64, device_id: String },
}

#[derive(Default)]
struct HostState {
    devices: Vec<SyntheticDevice>,
    denied: HashSet<String>,
    unsatisfiable: HashSet<String>,
    enumeration_error: Option<String>,
    open_delay: Duration,
    live: HashSet<u64>,
    max_live: usize,
    next_stream_id: u64,
    events: Vec<HostEvent>,
    requests: Vec<StreamRequest>,
}

pub struct SyntheticHost {
    state: Arc<Mutex<HostState>>,
    changes: broadcast::Sender<DeviceChange>,
}

impl Default for SyntheticHost {
    fn default() -> Self {
        Self::with_devices(Vec::new())
    }
}

impl SyntheticHost {
    pub fn with_devices(devices: Vec<SyntheticDevice>) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            state: Arc::new(Mutex::new(HostState {
                devices,
                ..HostState::default()
            })),
            changes,
        }
    }

    /// A host with an external and a built-in camera.
    pub fn demo() -> Self {
        Self::with_devices(vec![
            SyntheticDevice::new("synthetic-builtin", "Integrated Camera", 1280, 720, 30),
            SyntheticDevice::new("synthetic-usb", "USB Intraoral Camera", 1920, 1080, 60),
        ])
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        lock(&self.state)
    }

    /// Attach a device and notify subscribers.
    pub fn plug(&self, device: SyntheticDevice) {
        let id = device.id.clone();
        self.state().devices.push(device);
        let _ = self.changes.send(DeviceChange {
            added: vec![id],
            removed: Vec::new(),
        });
    }

    /// Detach a device and notify subscribers.
    pub fn unplug(&self, device_id: &str) {
        self.state().devices.retain(|d| d.id != device_id);
        let _ = self.changes.send(DeviceChange {
            added: Vec::new(),
            removed: vec![device_id.to_string()],
        });
    }

    pub fn deny_access(&self, device_id: &str) {
        self.state().denied.insert(device_id.to_string());
    }

    pub fn allow_access(&self, device_id: &str) {
        self.state().denied.remove(device_id);
    }

    pub fn set_unsatisfiable(&self, device_id: &str, unsatisfiable: bool) {
        let mut state = self.state();
        if unsatisfiable {
            state.unsatisfiable.insert(device_id.to_string());
        } else {
            state.unsatisfiable.remove(device_id);
        }
    }

    pub fn fail_enumeration(&self, message: Option<&str>) {
        self.state().enumeration_error = message.map(str::to_string);
    }

    /// Delay applied inside every `open_stream` call.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state().open_delay = delay;
    }

    pub fn live_streams(&self) -> usize {
        self.state().live.len()
    }

    /// Highest number of simultaneously live streams ever observed.
    pub fn max_live_streams(&self) -> usize {
        self.state().max_live
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.state().events.clone()
    }

    /// Every request received by `open_stream`, including failed ones.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.state().requests.clone()
    }
}

fn lock(state: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn negotiate(requested: Option<&Constraint<u32>>, native: u32, what: &str) -> SmilescopeResult<u32> {
    match requested {
        None => Ok(native),
        Some(Constraint::Ideal(v)) => Ok((*v).clamp(1, native.max(1))),
        Some(Constraint::Exact(v)) if *v <= native => Ok(*v),
        Some(Constraint::Exact(v)) => Err(SmilescopeError::constraint(format!(
            "exact {what} {v} exceeds device maximum {native}"
        ))),
    }
}

#[async_trait::async_trait]
impl CameraHost for SyntheticHost {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn enumerate_devices(&self) -> SmilescopeResult<Vec<HostDevice>> {
        let state = self.state();
        if let Some(message) = &state.enumeration_error {
            return Err(SmilescopeError::enumeration(message.clone()));
        }
        Ok(state
            .devices
            .iter()
            .map(|d| HostDevice {
                id: d.id.clone(),
                label: d.label.clone(),
                kind: d.kind,
                group_id: None,
            })
            .collect())
    }

    async fn open_stream(&self, request: &StreamRequest) -> SmilescopeResult<Box<dyn LiveStream>> {
        let delay = {
            let mut state = self.state();
            state.requests.push(request.clone());
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let wanted = request.device_id.value();
        let device = match &request.device_id {
            Constraint::Exact(id) => state.devices.iter().find(|d| &d.id == id),
            Constraint::Ideal(id) => state
                .devices
                .iter()
                .find(|d| &d.id == id)
                .or_else(|| state.devices.first()),
        }
        .cloned()
        .ok_or_else(|| SmilescopeError::access_denied(wanted.as_str(), "device not found"))?;

        if state.denied.contains(&device.id) {
            return Err(SmilescopeError::access_denied(&device.id, "permission denied"));
        }
        if state.unsatisfiable.contains(&device.id) {
            return Err(SmilescopeError::constraint(format!(
                "{} offers no format for this request",
                device.id
            )));
        }

        let width = negotiate(request.width.as_ref(), device.native_width, "width")?;
        let height = negotiate(request.height.as_ref(), device.native_height, "height")?;
        let frame_rate = negotiate(request.frame_rate.as_ref(), device.max_frame_rate, "frame rate")?;

        state.next_stream_id += 1;
        let stream_id = state.next_stream_id;
        state.live.insert(stream_id);
        state.max_live = state.max_live.max(state.live.len());
        state.events.push(HostEvent::Opened {
            stream_id,
            device_id: device.id.clone(),
        });

        Ok(Box::new(SyntheticStream {
            info: StreamInfo {
                stream_id,
                device_id: device.id,
                width,
                height,
                frame_rate,
            },
            host: Arc::clone(&self.state),
            ended: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        }))
    }

    async fn capabilities(&self, device_id: &str) -> SmilescopeResult<Option<DeviceCapabilities>> {
        Ok(self
            .state()
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| DeviceCapabilities {
                max_width: d.native_width,
                max_height: d.native_height,
                max_frame_rate: d.max_frame_rate,
            }))
    }

    fn subscribe_device_changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }
}

struct SyntheticStream {
    info: StreamInfo,
    host: Arc<Mutex<HostState>>,
    ended: AtomicBool,
    frames: AtomicU64,
}

impl SyntheticStream {
    fn release(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = lock(&self.host);
        state.live.remove(&self.info.stream_id);
        state.events.push(HostEvent::Released {
            stream_id: self.info.stream_id,
            device_id: self.info.device_id.clone(),
        });
    }
}

#[async_trait::async_trait]
impl LiveStream for SyntheticStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    async fn current_frame(&self) -> SmilescopeResult<RawFrame> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(SmilescopeError::NotStreaming);
        }
        let tick = self.frames.fetch_add(1, Ordering::Relaxed);
        let (width, height) = (self.info.width, self.info.height);
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width.max(1)) as u8);
                data.push((y * 255 / height.max(1)) as u8);
                data.push((tick % 256) as u8);
            }
        }
        RawFrame::new(width, height, data)
    }

    async fn stop(&mut self) -> SmilescopeResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.release();
    }
}
