use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use smilescope_capture_engine::synthetic::{HostEvent, SyntheticDevice, SyntheticHost};
use smilescope_capture_engine::{
    CaptureSettings, SessionController, SessionSnapshot, SessionState, SettingsUpdate,
    StateTransition, VideoSink,
};
use smilescope_common::error::SmilescopeError;
use smilescope_platform_core::{Constraint, StreamInfo, TrackState};
use tokio::sync::broadcast::error::TryRecvError;

fn two_camera_host() -> Arc<SyntheticHost> {
    Arc::new(SyntheticHost::with_devices(vec![
        SyntheticDevice::new("facetime", "FaceTime HD Camera", 1280, 720, 30),
        SyntheticDevice::new("usb", "USB External Cam", 1920, 1080, 60),
    ]))
}

fn session_for(host: &Arc<SyntheticHost>) -> SessionController {
    SessionController::new(host.clone(), CaptureSettings::default())
}

async fn wait_until(session: &SessionController, what: &str, pred: impl Fn(&SessionSnapshot) -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !pred(&session.snapshot()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<StateTransition>) -> Vec<(SessionState, SessionState)> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(t) => out.push((t.from, t.to)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    out
}

#[tokio::test]
async fn scenario_a_external_camera_ranks_first() {
    let host = two_camera_host();
    let session = session_for(&host);
    let devices = session.refresh_devices().await.unwrap();
    let labels: Vec<_> = devices.iter().map(|d| d.display_label.as_str()).collect();
    assert_eq!(labels, vec!["USB External Cam", "FaceTime HD Camera"]);
}

#[tokio::test]
async fn scenario_b_start_without_devices_never_opens() {
    let host = Arc::new(SyntheticHost::default());
    let session = session_for(&host);

    let err = session.start(None, None).await.unwrap_err();
    assert!(matches!(err, SmilescopeError::NoDevice));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(host.requests().is_empty());
    assert!(session.snapshot().last_error.is_some());
}

#[tokio::test]
async fn enumeration_failure_is_treated_as_empty_catalog() {
    let host = two_camera_host();
    host.fail_enumeration(Some("permission not granted yet"));
    let session = session_for(&host);

    let err = session.refresh_devices().await.unwrap_err();
    assert!(matches!(err, SmilescopeError::DeviceEnumeration { .. }));
    assert!(session.devices().is_empty());

    let err = session.start(None, None).await.unwrap_err();
    assert!(matches!(err, SmilescopeError::NoDevice));
    assert!(host.requests().is_empty());
}

#[tokio::test]
async fn scenario_c_settings_update_restarts_on_same_device() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.start(Some("facetime"), None).await.unwrap();

    let mut transitions = session.subscribe_transitions();
    session
        .update_settings(SettingsUpdate::frame_rate(60))
        .await
        .unwrap();

    assert_eq!(
        drain(&mut transitions),
        vec![
            (SessionState::Active, SessionState::Stopping),
            (SessionState::Stopping, SessionState::Idle),
            (SessionState::Idle, SessionState::Starting),
            (SessionState::Starting, SessionState::Active),
        ]
    );
    let snapshot = session.snapshot();
    assert_eq!(snapshot.active_device_id.as_deref(), Some("facetime"));
    assert_eq!(snapshot.settings.frame_rate, 60);

    let reopen = host.requests().pop().unwrap();
    assert_eq!(reopen.device_id, Constraint::Exact("facetime".to_string()));
    assert_eq!(reopen.frame_rate, Some(Constraint::Ideal(60)));
    session.shutdown().await;
}

#[tokio::test]
async fn scenario_d_access_denied_returns_to_idle() {
    let host = two_camera_host();
    host.deny_access("facetime");
    let session = session_for(&host);

    let err = session.start(Some("facetime"), None).await.unwrap_err();
    assert!(matches!(err, SmilescopeError::StreamAccessDenied { .. }));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.active_device_id, None);
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("permission denied")));
    assert_eq!(host.live_streams(), 0);

    // Retrying is the caller's decision.
    host.allow_access("facetime");
    session.start(Some("facetime"), None).await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    session.shutdown().await;
}

#[tokio::test]
async fn stop_when_idle_is_a_silent_no_op() {
    let host = two_camera_host();
    let session = session_for(&host);
    let mut transitions = session.subscribe_transitions();

    session.stop().await.unwrap();
    session.stop().await.unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert!(drain(&mut transitions).is_empty());
}

#[tokio::test]
async fn switch_releases_old_stream_before_opening_new() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.start(Some("facetime"), None).await.unwrap();
    session.switch_device("usb").await.unwrap();

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("usb"));
    assert_eq!(
        host.events(),
        vec![
            HostEvent::Opened { stream_id: 1, device_id: "facetime".into() },
            HostEvent::Released { stream_id: 1, device_id: "facetime".into() },
            HostEvent::Opened { stream_id: 2, device_id: "usb".into() },
        ]
    );
    assert_eq!(host.max_live_streams(), 1);
    session.shutdown().await;
    assert_eq!(host.live_streams(), 0);
}

#[tokio::test]
async fn capture_requires_an_active_stream() {
    let host = two_camera_host();
    let session = session_for(&host);

    assert!(matches!(
        session.capture().await.unwrap_err(),
        SmilescopeError::NotStreaming
    ));

    session.start(Some("usb"), None).await.unwrap();
    session.stop().await.unwrap();
    assert!(matches!(
        session.capture().await.unwrap_err(),
        SmilescopeError::NotStreaming
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn capture_uses_negotiated_dimensions() {
    let host = two_camera_host();
    let session = session_for(&host);
    // Ideal 1920x1080 against a 1280x720 device.
    session.start(Some("facetime"), None).await.unwrap();

    let photo = session.capture().await.unwrap();
    assert_eq!((photo.width, photo.height), (1280, 720));
    assert_eq!(photo.device_id, "facetime");
    assert_eq!(&photo.encoded_image[..2], &[0xFF, 0xD8]);
    assert_eq!(session.state(), SessionState::Active);
    session.shutdown().await;
}

#[tokio::test]
async fn overlapping_start_is_rejected_as_busy() {
    let host = two_camera_host();
    host.set_open_delay(Duration::from_millis(50));
    let session = session_for(&host);

    let (first, second, switch, update) = tokio::join!(
        session.start(Some("facetime"), None),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.start(Some("usb"), None).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.switch_device("usb").await
        },
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.update_settings(SettingsUpdate::frame_rate(15)).await
        },
    );

    first.unwrap();
    assert!(matches!(second.unwrap_err(), SmilescopeError::SessionBusy { operation: "start" }));
    assert!(matches!(switch.unwrap_err(), SmilescopeError::SessionBusy { .. }));
    assert!(matches!(update.unwrap_err(), SmilescopeError::SessionBusy { .. }));
    assert_eq!(host.max_live_streams(), 1);
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("facetime"));
    session.shutdown().await;
}

#[tokio::test]
async fn stop_during_start_waits_then_releases() {
    let host = two_camera_host();
    host.set_open_delay(Duration::from_millis(50));
    let session = session_for(&host);

    let (started, stopped) = tokio::join!(session.start(Some("usb"), None), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Starting);
        session.stop().await
    });

    started.unwrap();
    stopped.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.live_streams(), 0);
    assert_eq!(host.events().len(), 2);
}

#[tokio::test]
async fn device_changes_wait_for_in_flight_start() {
    let host = two_camera_host();
    host.set_open_delay(Duration::from_millis(50));
    let session = session_for(&host);
    session.refresh_devices().await.unwrap();
    session.watch_device_changes();

    let (started, ()) = tokio::join!(session.start(Some("usb"), None), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        host.unplug("facetime");
        host.plug(SyntheticDevice::new("front", "Front Camera", 640, 480, 30));
    });
    started.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    wait_until(&session, "catalog refresh", |s| {
        s.devices.iter().any(|d| d.id == "front") && !s.devices.iter().any(|d| d.id == "facetime")
    })
    .await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("usb"));

    host.unplug("usb");
    wait_until(&session, "stream teardown", |s| s.state == SessionState::Idle).await;
    assert_eq!(host.live_streams(), 0);
    assert_eq!(session.snapshot().selected_device_id.as_deref(), Some("front"));
}

#[tokio::test]
async fn failed_enumeration_on_hotplug_keeps_the_stream() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.refresh_devices().await.unwrap();
    session.watch_device_changes();
    session.start(Some("usb"), None).await.unwrap();

    host.fail_enumeration(Some("transient"));
    host.plug(SyntheticDevice::new("front", "Front Camera", 640, 480, 30));
    wait_until(&session, "failed refresh", |s| {
        s.last_error.as_deref().is_some_and(|e| e.contains("transient"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("usb"));
    assert_eq!(host.live_streams(), 1);

    host.fail_enumeration(None);
    host.unplug("usb");
    wait_until(&session, "stream teardown", |s| s.state == SessionState::Idle).await;
    assert_eq!(host.live_streams(), 0);
}

#[tokio::test]
async fn failed_refresh_forgets_the_selected_device() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.refresh_devices().await.unwrap();
    assert_eq!(session.snapshot().selected_device_id.as_deref(), Some("usb"));

    host.fail_enumeration(Some("bus reset"));
    session.refresh_devices().await.unwrap_err();
    let snapshot = session.snapshot();
    assert!(snapshot.devices.is_empty());
    assert_eq!(snapshot.selected_device_id, None);

    let err = session.start(None, None).await.unwrap_err();
    assert!(matches!(err, SmilescopeError::NoDevice));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(host.requests().is_empty());
}

fn assert_failed_back_to_idle(session: &SessionController, err: SmilescopeError) {
    assert!(matches!(err, SmilescopeError::StreamConstraint { .. }), "got {err:?}");
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.active_device_id, None);
    assert!(snapshot.active_stream.is_none());
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn unsatisfiable_start_reports_constraint_error() {
    let host = two_camera_host();
    host.set_unsatisfiable("facetime", true);
    let session = session_for(&host);

    let err = session.start(Some("facetime"), None).await.unwrap_err();
    assert_failed_back_to_idle(&session, err);
    assert_eq!(host.live_streams(), 0);
}

#[tokio::test]
async fn unsatisfiable_switch_leaves_no_stream() {
    let host = two_camera_host();
    host.set_unsatisfiable("facetime", true);
    let session = session_for(&host);
    session.start(Some("usb"), None).await.unwrap();

    let err = session.switch_device("facetime").await.unwrap_err();
    assert_failed_back_to_idle(&session, err);
    assert_eq!(host.live_streams(), 0);
    assert_eq!(host.max_live_streams(), 1);
}

#[tokio::test]
async fn unsatisfiable_restart_after_settings_update() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.start(Some("facetime"), None).await.unwrap();

    host.set_unsatisfiable("facetime", true);
    let err = session
        .update_settings(SettingsUpdate::frame_rate(15))
        .await
        .unwrap_err();
    assert_failed_back_to_idle(&session, err);
    assert_eq!(session.snapshot().settings.frame_rate, 15);
    assert_eq!(host.live_streams(), 0);
}

#[tokio::test]
async fn cycle_walks_ranked_devices() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.refresh_devices().await.unwrap();
    session.start(None, None).await.unwrap();
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("usb"));

    session.cycle_device().await.unwrap();
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("facetime"));
    session.cycle_device().await.unwrap();
    assert_eq!(session.snapshot().active_device_id.as_deref(), Some("usb"));
    assert_eq!(host.max_live_streams(), 1);
    session.shutdown().await;
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<String>>,
}

impl VideoSink for RecordingSink {
    fn attach(&self, stream: &StreamInfo) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach {} {}x{}", stream.device_id, stream.width, stream.height));
    }

    fn detach(&self) {
        self.calls.lock().unwrap().push("detach".to_string());
    }
}

#[tokio::test]
async fn video_sink_follows_the_stream() {
    let host = two_camera_host();
    let sink = Arc::new(RecordingSink::default());
    let session = SessionController::builder(host.clone())
        .video_sink(sink.clone())
        .build();

    session.start(Some("usb"), None).await.unwrap();
    session.switch_device("facetime").await.unwrap();
    session.shutdown().await;

    assert_eq!(
        *sink.calls.lock().unwrap(),
        vec![
            "attach usb 1920x1080".to_string(),
            "detach".to_string(),
            "attach facetime 1280x720".to_string(),
            "detach".to_string(),
        ]
    );
}

#[tokio::test]
async fn shutdown_ends_every_track() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.start(Some("usb"), None).await.unwrap();
    session.shutdown().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.live_streams(), 0);
    assert!(matches!(host.events().last(), Some(HostEvent::Released { .. })));
}

#[tokio::test]
async fn snapshot_serializes_for_rendering() {
    let host = two_camera_host();
    let session = session_for(&host);
    session.start(Some("usb"), None).await.unwrap();

    let json = serde_json::to_value(session.snapshot()).unwrap();
    assert_eq!(json["state"], "active");
    assert_eq!(json["active_stream"]["width"], 1920);
    session.shutdown().await;
}

#[test]
fn track_state_is_ended_after_release() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        use smilescope_platform_core::{CameraHost, StreamRequest};
        let host = two_camera_host();
        let mut stream = host.open_stream(&StreamRequest::for_device("usb")).await.unwrap();
        stream.stop().await.unwrap();
        assert_eq!(stream.ready_state(), TrackState::Ended);
    });
}

#[derive(Debug, Clone)]
enum Op {
    Start(usize),
    StartDefault,
    Stop,
    Switch(usize),
    FrameRate(u32),
    Cycle,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Start),
        Just(Op::StartDefault),
        Just(Op::Stop),
        (0..3usize).prop_map(Op::Switch),
        prop_oneof![Just(15u32), Just(30), Just(60)].prop_map(Op::FrameRate),
        Just(Op::Cycle),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_stream_is_ever_live(ops in proptest::collection::vec(op_strategy(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let ids = ["cam-0", "cam-1", "cam-2"];
            let host = Arc::new(SyntheticHost::with_devices(vec![
                SyntheticDevice::new(ids[0], "USB Cam", 1920, 1080, 60),
                SyntheticDevice::new(ids[1], "Integrated", 1280, 720, 30),
                SyntheticDevice::new(ids[2], "Front", 640, 480, 30),
            ]));
            host.deny_access(ids[2]);
            let session = session_for(&host);
            session.refresh_devices().await.unwrap();

            for op in ops {
                let _ = match op {
                    Op::Start(i) => session.start(Some(ids[i]), None).await,
                    Op::StartDefault => session.start(None, None).await,
                    Op::Stop => session.stop().await,
                    Op::Switch(i) => session.switch_device(ids[i]).await,
                    Op::FrameRate(fps) => session.update_settings(SettingsUpdate::frame_rate(fps)).await,
                    Op::Cycle => session.cycle_device().await,
                };
                let live = host.live_streams();
                assert!(live <= 1, "{live} streams live");
                let state = session.state();
                assert!(matches!(state, SessionState::Idle | SessionState::Active));
                assert_eq!(state == SessionState::Active, live == 1);
            }

            session.shutdown().await;
            assert_eq!(host.live_streams(), 0);
            assert!(host.max_live_streams() <= 1);
        });
    }
}
