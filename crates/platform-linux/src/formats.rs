//! Capture format probing via `v4l2-ctl`.

use smilescope_platform_core::DeviceCapabilities;

/// Largest size and fastest rate `dev_path` advertises.
///
/// Returns `None` when `v4l2-ctl` is missing, fails, or lists nothing
/// usable.
pub fn probe_capabilities(dev_path: &str) -> Option<DeviceCapabilities> {
    let output = std::process::Command::new("v4l2-ctl")
        .args(["--device", dev_path, "--list-formats-ext"])
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(device = dev_path, status = ?output.status, "v4l2-ctl format listing failed");
        return None;
    }
    parse_format_listing(&String::from_utf8_lossy(&output.stdout))
}

/// Whether `dev_path` reports the Video Capture capability.
/// `None` if `v4l2-ctl` is not available.
pub fn probe_capture_capability(dev_path: &str) -> Option<bool> {
    let output = std::process::Command::new("v4l2-ctl")
        .args(["--device", dev_path, "--info"])
        .output()
        .ok()?;
    if !output.status.success() {
        return Some(false);
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .to_lowercase()
            .contains("video capture"),
    )
}

/// Parse `v4l2-ctl --list-formats-ext` output.
///
/// The reported size is the one with the largest area across all pixel
/// formats; stepwise ranges contribute their upper bound.
pub fn parse_format_listing(listing: &str) -> Option<DeviceCapabilities> {
    let mut best_size: Option<(u32, u32)> = None;
    let mut max_fps = 0u32;

    for line in listing.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Size:") {
            for (w, h) in rest.split_whitespace().filter_map(parse_size) {
                let area = |s: (u32, u32)| u64::from(s.0) * u64::from(s.1);
                if best_size.map_or(true, |b| area((w, h)) > area(b)) {
                    best_size = Some((w, h));
                }
            }
        } else if line.starts_with("Interval:") {
            if let Some(fps) = parse_fps(line) {
                max_fps = max_fps.max(fps);
            }
        }
    }

    let (max_width, max_height) = best_size?;
    Some(DeviceCapabilities {
        max_width,
        max_height,
        max_frame_rate: max_fps,
    })
}

fn parse_size(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

// "Interval: Discrete 0.033s (30.000 fps)"
fn parse_fps(line: &str) -> Option<u32> {
    let open = line.rfind('(')?;
    let value = line[open + 1..].trim_end_matches(')').strip_suffix(" fps")?;
    let fps: f64 = value.trim().parse().ok()?;
    (fps.is_finite() && fps > 0.0).then(|| fps.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.017s (60.000 fps)
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\tSize: Discrete 1920x1080
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t[1]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (29.970 fps)
";

    #[test]
    fn largest_size_and_fastest_rate_win() {
        let caps = parse_format_listing(LISTING).unwrap();
        assert_eq!(caps.max_width, 1920);
        assert_eq!(caps.max_height, 1080);
        assert_eq!(caps.max_frame_rate, 60);
    }

    #[test]
    fn stepwise_ranges_use_upper_bound() {
        let listing = "\t[0]: 'YUYV'\n\t\tSize: Stepwise 16x16 - 2592x1944 with step 16/16\n";
        let caps = parse_format_listing(listing).unwrap();
        assert_eq!((caps.max_width, caps.max_height), (2592, 1944));
        assert_eq!(caps.max_frame_rate, 0);
    }

    #[test]
    fn empty_listing_has_no_capabilities() {
        assert!(parse_format_listing("ioctl: VIDIOC_ENUM_FMT\n\tType: Video Capture\n").is_none());
    }

    #[test]
    fn fractional_rates_round() {
        assert_eq!(parse_fps("Interval: Discrete 0.033s (29.970 fps)"), Some(30));
        assert_eq!(parse_fps("Interval: Discrete 0.200s (5.000 fps)"), Some(5));
        assert_eq!(parse_fps("Interval: Stepwise"), None);
    }
}
