//! Stream negotiation against the host.

use std::sync::Arc;

use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{CameraHost, Constraint, LiveStream, StreamRequest};

use crate::settings::CaptureSettings;

/// Frame rate ceiling applied to recommended settings.
pub const MAX_RECOMMENDED_FRAME_RATE: u32 = 60;

/// Opens one stream per call. Never retries and never touches streams it
/// opened earlier; releasing those is the session's job.
#[derive(Clone)]
pub struct StreamNegotiator {
    host: Arc<dyn CameraHost>,
}

impl StreamNegotiator {
    pub fn new(host: Arc<dyn CameraHost>) -> Self {
        Self { host }
    }

    /// Build the host request: the device is authoritative, the format is
    /// a target.
    pub fn build_request(device_id: &str, settings: &CaptureSettings) -> StreamRequest {
        StreamRequest {
            device_id: Constraint::Exact(device_id.to_string()),
            width: Some(Constraint::Ideal(settings.width)),
            height: Some(Constraint::Ideal(settings.height)),
            frame_rate: Some(Constraint::Ideal(settings.frame_rate)),
        }
    }

    pub async fn open_stream(
        &self,
        device_id: &str,
        settings: &CaptureSettings,
    ) -> SmilescopeResult<Box<dyn LiveStream>> {
        let request = Self::build_request(device_id, settings);
        tracing::debug!(
            device_id,
            width = settings.width,
            height = settings.height,
            frame_rate = settings.frame_rate,
            "Requesting stream"
        );

        let stream = self.host.open_stream(&request).await.map_err(|e| match e {
            SmilescopeError::StreamAccessDenied { .. } | SmilescopeError::StreamConstraint { .. } => e,
            other => SmilescopeError::access_denied(device_id, other.to_string()),
        })?;

        let info = stream.info();
        tracing::info!(
            device_id,
            stream_id = info.stream_id,
            width = info.width,
            height = info.height,
            frame_rate = info.frame_rate,
            "Stream negotiated"
        );
        Ok(stream)
    }

    /// Highest resolution the device reports, frame rate capped at 60.
    /// Falls back to `base` when the host cannot report capabilities.
    pub async fn recommended_settings(
        &self,
        device_id: &str,
        base: &CaptureSettings,
    ) -> CaptureSettings {
        match self.host.capabilities(device_id).await {
            Ok(Some(caps)) => CaptureSettings {
                width: if caps.max_width > 0 { caps.max_width } else { base.width },
                height: if caps.max_height > 0 { caps.max_height } else { base.height },
                frame_rate: if caps.max_frame_rate > 0 {
                    caps.max_frame_rate.min(MAX_RECOMMENDED_FRAME_RATE)
                } else {
                    base.frame_rate
                },
                quality: base.quality,
            },
            Ok(None) => *base,
            Err(e) => {
                tracing::warn!(device_id, error = %e, "Capability probe failed");
                *base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticDevice, SyntheticHost};

    #[test]
    fn request_is_exact_on_device_and_ideal_on_format() {
        let settings = CaptureSettings {
            width: 1280,
            height: 720,
            frame_rate: 24,
            quality: 0.5,
        };
        let request = StreamNegotiator::build_request("cam-a", &settings);
        assert_eq!(request.device_id, Constraint::Exact("cam-a".to_string()));
        assert_eq!(request.width, Some(Constraint::Ideal(1280)));
        assert_eq!(request.height, Some(Constraint::Ideal(720)));
        assert_eq!(request.frame_rate, Some(Constraint::Ideal(24)));
    }

    #[tokio::test]
    async fn host_negotiates_down_to_native_size() {
        let host = Arc::new(SyntheticHost::with_devices(vec![SyntheticDevice::new(
            "cam-a", "Integrated", 640, 480, 30,
        )]));
        let negotiator = StreamNegotiator::new(host.clone());
        let stream = negotiator
            .open_stream("cam-a", &CaptureSettings::default())
            .await
            .unwrap();
        assert_eq!((stream.info().width, stream.info().height), (640, 480));
        assert_eq!(host.live_streams(), 1);
    }

    #[tokio::test]
    async fn access_and_constraint_errors_pass_through() {
        let host = Arc::new(SyntheticHost::with_devices(vec![
            SyntheticDevice::new("cam-a", "A", 640, 480, 30),
            SyntheticDevice::new("cam-b", "B", 640, 480, 30),
        ]));
        host.deny_access("cam-a");
        host.set_unsatisfiable("cam-b", true);
        let negotiator = StreamNegotiator::new(host.clone());

        let denied = negotiator
            .open_stream("cam-a", &CaptureSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(denied, SmilescopeError::StreamAccessDenied { .. }));

        let constrained = negotiator
            .open_stream("cam-b", &CaptureSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(constrained, SmilescopeError::StreamConstraint { .. }));
        assert_eq!(host.live_streams(), 0);
    }

    #[tokio::test]
    async fn recommended_settings_cap_frame_rate() {
        let host = Arc::new(SyntheticHost::with_devices(vec![SyntheticDevice::new(
            "cam-a", "Fast", 3840, 2160, 120,
        )]));
        let negotiator = StreamNegotiator::new(host);
        let base = CaptureSettings::default();
        let recommended = negotiator.recommended_settings("cam-a", &base).await;
        assert_eq!((recommended.width, recommended.height), (3840, 2160));
        assert_eq!(recommended.frame_rate, 60);
        assert_eq!(recommended.quality, base.quality);

        let unknown = negotiator.recommended_settings("missing", &base).await;
        assert_eq!(unknown, base);
    }
}
