//! Follow camera hot-plug events.

use std::sync::Arc;
use std::time::Duration;

use smilescope_capture_engine::{CaptureDevice, CaptureSettings};
use smilescope_common::config::AppConfig;
use smilescope_platform_core::CameraHost;

use crate::host;

fn print_devices(devices: &[CaptureDevice]) {
    if devices.is_empty() {
        println!("  (no cameras)");
    }
    for device in devices {
        println!("  {} [{}]", device.display_label, device.id);
    }
}

pub async fn run(host: Arc<dyn CameraHost>, config: &AppConfig, secs: u64) -> anyhow::Result<()> {
    let session = host::session(host, config, CaptureSettings::from(&config.camera));
    if let Err(e) = session.refresh_devices().await {
        tracing::warn!(error = %e, "Could not enumerate cameras");
    }

    let mut known = session.devices();
    println!("Cameras:");
    print_devices(&known);

    let mut updates = session.subscribe();
    session.watch_device_changes();

    let deadline = async {
        if secs == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(secs)).await
        }
    };
    tokio::pin!(deadline);

    println!("Watching for changes (Ctrl+C to stop)...");
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let devices = updates.borrow_and_update().devices.clone();
                if devices != known {
                    println!("Cameras changed:");
                    print_devices(&devices);
                    known = devices;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
