//! List cameras.

use std::sync::Arc;

use serde::Serialize;
use smilescope_capture_engine::{CaptureDevice, CaptureSettings, DeviceCatalog, StreamNegotiator};
use smilescope_common::config::AppConfig;
use smilescope_platform_core::CameraHost;

#[derive(Serialize)]
struct DeviceRow<'a> {
    #[serde(flatten)]
    device: &'a CaptureDevice,
    short_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommended: Option<CaptureSettings>,
}

pub async fn run(
    host: Arc<dyn CameraHost>,
    config: &AppConfig,
    json: bool,
    probe: bool,
) -> anyhow::Result<()> {
    let devices = match DeviceCatalog::new(Arc::clone(&host)).refresh_devices().await {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(error = %e, "Could not enumerate cameras");
            Vec::new()
        }
    };

    let base = CaptureSettings::from(&config.camera);
    let negotiator = StreamNegotiator::new(host);
    let mut rows = Vec::with_capacity(devices.len());
    for device in &devices {
        let recommended = if probe {
            Some(negotiator.recommended_settings(&device.id, &base).await)
        } else {
            None
        };
        rows.push(DeviceRow {
            device,
            short_label: device.short_label(),
            recommended,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Cameras ({}):", rows.len());
    for (idx, row) in rows.iter().enumerate() {
        println!(
            "  [{idx}] {} ({:?})",
            row.device.display_label, row.device.category
        );
        println!("      id: {}", row.device.id);
        if let Some(settings) = &row.recommended {
            println!(
                "      recommended: {} @ {}fps",
                settings.resolution(),
                settings.frame_rate
            );
        }
    }

    Ok(())
}
