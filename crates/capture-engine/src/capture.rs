//! Still capture from a live frame.

use std::path::Path;

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::RawFrame;

/// Encoding of a captured still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoFormat {
    Jpeg,
}

impl PhotoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// An encoded still. Owned by the caller once returned.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedPhoto {
    #[serde(skip)]
    pub encoded_image: Vec<u8>,
    pub format: PhotoFormat,
    pub width: u32,
    pub height: u32,
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
}

impl CapturedPhoto {
    /// Suggested file name, unique per millisecond.
    pub fn file_name(&self) -> String {
        format!(
            "scan-{}.{}",
            self.captured_at.format("%Y%m%dT%H%M%S%.3fZ"),
            self.format.extension()
        )
    }

    pub fn write_to(&self, path: &Path) -> SmilescopeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.encoded_image)?;
        Ok(())
    }
}

/// Encodes frames at their native size.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCapturer;

impl FrameCapturer {
    /// Map `[0.0, 1.0]` onto the JPEG encoder's `1..=100` scale.
    pub fn jpeg_quality(quality: f32) -> u8 {
        (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
    }

    pub fn capture(
        &self,
        frame: RawFrame,
        quality: f32,
        device_id: &str,
    ) -> SmilescopeResult<CapturedPhoto> {
        let (width, height) = (frame.width, frame.height);
        if width == 0 || height == 0 {
            return Err(SmilescopeError::encode(format!(
                "cannot encode empty {width}x{height} frame"
            )));
        }
        let raster = RgbImage::from_raw(width, height, frame.data).ok_or_else(|| {
            SmilescopeError::encode(format!("frame buffer does not match {width}x{height} RGB"))
        })?;

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, Self::jpeg_quality(quality))
            .encode_image(&raster)
            .map_err(|e| SmilescopeError::encode(format!("Failed to encode JPEG: {e}")))?;

        tracing::debug!(device_id, width, height, bytes = encoded.len(), "Frame captured");
        Ok(CapturedPhoto {
            encoded_image: encoded,
            format: PhotoFormat::Jpeg,
            width,
            height,
            device_id: device_id.to_string(),
            captured_at: Utc::now(),
        })
    }
}
