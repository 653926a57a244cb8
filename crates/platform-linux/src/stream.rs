//! GStreamer-backed live streams.
//!
//! Each stream is a `v4l2src ! videoconvert ! <caps> ! appsink` pipeline.
//! No scaler or rate converter sits in the chain, so whatever the caps
//! negotiate is what the camera actually delivers. Ideal constraints are
//! tried as caps first and dropped one at a time when the device cannot
//! satisfy them; exact constraints are never dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use gst::prelude::*;
use gst_video::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{Constraint, LiveStream, RawFrame, StreamInfo, StreamRequest, TrackState};

const FIRST_FRAME_TIMEOUT_SECS: u64 = 5;
const FRAME_TIMEOUT_SECS: u64 = 2;

pub(crate) fn init_gstreamer() -> SmilescopeResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(SmilescopeError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Caps strings to try, strictest first.
pub fn caps_candidates(request: &StreamRequest) -> Vec<String> {
    let size = |w: Option<&Constraint<u32>>, h: Option<&Constraint<u32>>| {
        let mut out = String::new();
        if let Some(w) = w {
            out.push_str(&format!(",width={}", w.value()));
        }
        if let Some(h) = h {
            out.push_str(&format!(",height={}", h.value()));
        }
        out
    };
    let rate = |r: Option<&Constraint<u32>>| {
        r.map(|r| format!(",framerate={}/1", r.value()))
            .unwrap_or_default()
    };
    fn exact(c: &Option<Constraint<u32>>) -> Option<&Constraint<u32>> {
        c.as_ref().filter(|c| c.is_exact())
    }

    let (w, h, r) = (
        request.width.as_ref(),
        request.height.as_ref(),
        request.frame_rate.as_ref(),
    );
    let (ew, eh, er) = (
        exact(&request.width),
        exact(&request.height),
        exact(&request.frame_rate),
    );

    let mut candidates = vec![
        format!("video/x-raw,format=RGB{}{}", size(w, h), rate(r)),
        format!("video/x-raw,format=RGB{}{}", size(w, h), rate(er)),
        format!("video/x-raw,format=RGB{}{}", size(ew, eh), rate(er)),
    ];
    candidates.dedup();
    candidates
}

fn escape_device(device: &str) -> String {
    device.replace('"', "\\\"")
}

/// A running capture pipeline bound to one device node.
pub struct GstLiveStream {
    info: StreamInfo,
    pipeline: gst::Pipeline,
    sink: gst_app::AppSink,
    ended: AtomicBool,
}

impl GstLiveStream {
    /// Build and start a pipeline for `request`. Blocks until the first
    /// frame arrives or negotiation fails.
    pub fn open(stream_id: u64, device: &str, request: &StreamRequest) -> SmilescopeResult<Self> {
        init_gstreamer()?;

        let mut last_failure = None;
        for caps in caps_candidates(request) {
            match Self::try_open(stream_id, device, &caps) {
                Ok(stream) => return Ok(stream),
                Err(e @ SmilescopeError::StreamAccessDenied { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!(device, %caps, error = %e, "Caps rejected; relaxing");
                    last_failure = Some(e);
                }
            }
        }
        Err(last_failure
            .unwrap_or_else(|| SmilescopeError::constraint(format!("{device} offers no usable format"))))
    }

    fn try_open(stream_id: u64, device: &str, caps: &str) -> SmilescopeResult<Self> {
        let launch = format!(
            "v4l2src device=\"{}\" ! videoconvert ! {caps} ! appsink name=sink max-buffers=1 drop=true sync=false",
            escape_device(device)
        );
        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| SmilescopeError::platform(format!("Failed to build pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| SmilescopeError::platform("Launch string did not produce a pipeline"))?;
        let sink = pipeline
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| SmilescopeError::platform("Pipeline has no appsink"))?;

        if pipeline.set_state(gst::State::Playing).is_err() {
            let err = pipeline_failure(&pipeline, device);
            let _ = pipeline.set_state(gst::State::Null);
            return Err(err);
        }

        let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_seconds(FIRST_FRAME_TIMEOUT_SECS))
        else {
            let err = pipeline_failure(&pipeline, device);
            let _ = pipeline.set_state(gst::State::Null);
            return Err(err);
        };

        let video_info = match sample_video_info(&sample) {
            Ok(info) => info,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        Ok(Self {
            info: StreamInfo {
                stream_id,
                device_id: device.to_string(),
                width: video_info.width(),
                height: video_info.height(),
                frame_rate: whole_fps(video_info.fps()),
            },
            pipeline,
            sink,
            ended: AtomicBool::new(false),
        })
    }

    fn release(&self) -> SmilescopeResult<()> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            SmilescopeError::platform(format!(
                "Failed to stop stream {}: {e:?}",
                self.info.stream_id
            ))
        })?;
        tracing::debug!(stream_id = self.info.stream_id, device = %self.info.device_id, "Pipeline stopped");
        Ok(())
    }
}

/// Turn the pipeline's bus error, if any, into a host error.
fn pipeline_failure(pipeline: &gst::Pipeline, device: &str) -> SmilescopeError {
    let message = pipeline
        .bus()
        .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]));
    match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) => {
            let detail = format!(
                "{} ({})",
                err.error(),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            );
            if err.error().is::<gst::ResourceError>() {
                SmilescopeError::access_denied(device, detail)
            } else {
                SmilescopeError::constraint(detail)
            }
        }
        _ => SmilescopeError::access_denied(device, "device produced no frames"),
    }
}

fn sample_video_info(sample: &gst::Sample) -> SmilescopeResult<gst_video::VideoInfo> {
    let caps = sample
        .caps()
        .ok_or_else(|| SmilescopeError::platform("Sample carries no caps"))?;
    gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| SmilescopeError::platform(format!("Failed to get video info: {e}")))
}

fn whole_fps(fps: gst::Fraction) -> u32 {
    if fps.numer() <= 0 || fps.denom() <= 0 {
        return 0;
    }
    (fps.numer() as f64 / fps.denom() as f64).round() as u32
}

/// Copy the first plane of a mapped RGB frame, honouring its row stride.
fn unpack_frame(frame: &gst_video::VideoFrameRef<&gst::BufferRef>) -> SmilescopeResult<RawFrame> {
    let stride = usize::try_from(frame.plane_stride()[0])
        .map_err(|_| SmilescopeError::platform("Negative row stride"))?;
    let data = frame
        .plane_data(0)
        .map_err(|e| SmilescopeError::platform(format!("Failed to read frame plane: {e}")))?;
    RawFrame::from_strided(frame.width(), frame.height(), stride, data)
}

fn pull_frame(sink: &gst_app::AppSink) -> SmilescopeResult<RawFrame> {
    let sample = sink
        .try_pull_sample(gst::ClockTime::from_seconds(FRAME_TIMEOUT_SECS))
        .ok_or(SmilescopeError::NotStreaming)?;
    let info = sample_video_info(&sample)?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| SmilescopeError::platform("Sample carries no buffer"))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| SmilescopeError::platform(format!("Failed to map frame: {e}")))?;
    unpack_frame(&frame)
}

#[async_trait::async_trait]
impl LiveStream for GstLiveStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) || self.pipeline.current_state() != gst::State::Playing {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    async fn current_frame(&self) -> SmilescopeResult<RawFrame> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(SmilescopeError::NotStreaming);
        }
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || pull_frame(&sink))
            .await
            .map_err(|e| SmilescopeError::platform(format!("Frame pull task failed: {e}")))?
    }

    async fn stop(&mut self) -> SmilescopeResult<()> {
        self.release()
    }
}

impl Drop for GstLiveStream {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "Failed to release stream on drop");
        }
    }
}
