//! Capture stills.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smilescope_capture_engine::{CaptureSettings, Resolution, SessionController, SettingsUpdate};
use smilescope_common::config::AppConfig;
use smilescope_common::error::{ErrorKind, SmilescopeError};
use smilescope_platform_core::CameraHost;

use crate::host;

pub struct CaptureArgs {
    pub device: Option<String>,
    pub resolution: Option<Resolution>,
    pub fps: Option<u32>,
    pub quality: Option<f32>,
    pub count: u32,
    pub interval_ms: u64,
    pub output: Option<PathBuf>,
}

pub async fn run(
    host: Arc<dyn CameraHost>,
    config: &AppConfig,
    args: CaptureArgs,
) -> anyhow::Result<()> {
    let settings = CaptureSettings::from(&config.camera).merged(&SettingsUpdate {
        resolution: args.resolution,
        frame_rate: args.fps,
        quality: args.quality,
    });
    let output = args.output.clone().unwrap_or_else(|| config.capture_dir.clone());

    let session = host::session(host, config, settings);
    if let Err(e) = session.refresh_devices().await {
        tracing::warn!(error = %e, "Could not enumerate cameras");
    }

    if let Err(e) = session.start(args.device.as_deref(), None).await {
        if let Some(hint) = start_hint(&e) {
            eprintln!("{hint}");
        }
        anyhow::bail!("Failed to start camera: {e}");
    }

    if let Some(stream) = session.snapshot().active_stream {
        println!(
            "Streaming from {} at {}x{} @ {}fps",
            stream.device_id, stream.width, stream.height, stream.frame_rate
        );
    }

    let result = capture_stills(&session, &args, &output).await;
    session.shutdown().await;
    result
}

/// What the user can do about a failed start, if anything.
fn start_hint(err: &SmilescopeError) -> Option<&'static str> {
    if !err.is_user_actionable() {
        return None;
    }
    match err.kind() {
        ErrorKind::NoDevice => {
            Some("No camera found. Connect a camera, then run `smilescope devices` to confirm it is detected.")
        }
        ErrorKind::AccessDenied => Some(
            "Camera access was refused. Add your user to the `video` group \
             (sudo usermod -aG video $USER, then log in again) and close other apps using the camera.",
        ),
        ErrorKind::Constraint => Some("The camera cannot deliver these settings. Try a lower --resolution or --fps."),
        _ => None,
    }
}

async fn capture_stills(
    session: &SessionController,
    args: &CaptureArgs,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    for n in 0..args.count {
        if n > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(args.interval_ms)) => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("Interrupted after {n} stills.");
                    return Ok(());
                }
            }
        }

        let photo = session.capture().await?;
        let path = output.join(photo.file_name());
        photo.write_to(&path)?;
        println!(
            "Saved {} ({}x{}, {} bytes)",
            path.display(),
            photo.width,
            photo.height,
            photo.encoded_image.len()
        );
    }
    Ok(())
}
