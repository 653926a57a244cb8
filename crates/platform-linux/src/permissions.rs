//! Permission detection and guidance for Linux.
//!
//! Camera capture needs a loaded V4L2 driver, read/write access to the
//! device nodes, and the GStreamer elements the stream pipeline is built
//! from.

use std::path::Path;

use gstreamer as gst;
use serde::Serialize;

use crate::devices;
use crate::formats;
use crate::stream::init_gstreamer;

/// GStreamer elements every capture pipeline needs.
const REQUIRED_ELEMENTS: [&str; 3] = ["v4l2src", "videoconvert", "appsink"];

/// A system capability Smilescope may need.
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub required: bool,
    pub fix_instructions: Option<String>,
}

/// Check all capabilities and report status.
pub fn check_capabilities() -> Vec<Capability> {
    let nodes = devices::enumerate().unwrap_or_default();
    let capture_nodes: Vec<String> = devices::capture_ids(&nodes).into_iter().collect();
    vec![
        check_video_devices(&capture_nodes),
        check_device_access(&capture_nodes),
        check_gstreamer_elements(),
        check_v4l2_utils(capture_nodes.first().map(String::as_str)),
    ]
}

fn check_video_devices(capture_nodes: &[String]) -> Capability {
    let available = !capture_nodes.is_empty();
    Capability {
        name: "Camera Device".to_string(),
        description: format!("Video4Linux capture nodes ({} found)", capture_nodes.len()),
        available,
        required: true,
        fix_instructions: (!available).then(|| {
            "Connect a camera and verify /dev/video* exists (v4l2-ctl --list-devices)".to_string()
        }),
    }
}

fn check_device_access(capture_nodes: &[String]) -> Capability {
    let denied: Vec<&str> = capture_nodes
        .iter()
        .filter(|node| {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(Path::new(node))
                .is_err()
        })
        .map(String::as_str)
        .collect();

    let in_video_group = std::process::Command::new("groups")
        .output()
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .split_whitespace()
                .any(|g| g == "video")
        })
        .unwrap_or(false);

    let available = !capture_nodes.is_empty() && denied.is_empty();
    Capability {
        name: "Camera Access".to_string(),
        description: "Read/write access to the camera device nodes".to_string(),
        available,
        required: true,
        fix_instructions: if denied.is_empty() {
            None
        } else if !in_video_group {
            Some("Add user to video group: sudo usermod -aG video $USER (logout required)".to_string())
        } else {
            Some(format!("Close other applications using {}", denied.join(", ")))
        },
    }
}

fn check_gstreamer_elements() -> Capability {
    let missing: Vec<&str> = match init_gstreamer() {
        Ok(()) => REQUIRED_ELEMENTS
            .iter()
            .copied()
            .filter(|name| gst::ElementFactory::find(name).is_none())
            .collect(),
        Err(_) => REQUIRED_ELEMENTS.to_vec(),
    };

    Capability {
        name: "GStreamer".to_string(),
        description: "GStreamer elements for live capture (v4l2src, videoconvert, appsink)"
            .to_string(),
        available: missing.is_empty(),
        required: true,
        fix_instructions: (!missing.is_empty()).then(|| {
            format!(
                "Missing {}; install gstreamer1.0-plugins-base and gstreamer1.0-plugins-good",
                missing.join(", ")
            )
        }),
    }
}

fn check_v4l2_utils(probe_node: Option<&str>) -> Capability {
    let available = match probe_node {
        Some(node) => formats::probe_capture_capability(node).is_some(),
        None => std::process::Command::new("v4l2-ctl")
            .arg("--version")
            .output()
            .is_ok(),
    };

    Capability {
        name: "v4l2-utils".to_string(),
        description: "v4l2-ctl for reporting camera formats and recommended settings".to_string(),
        available,
        required: false,
        fix_instructions: (!available)
            .then(|| "Install v4l-utils: sudo apt install v4l-utils".to_string()),
    }
}

/// Print a user-friendly capability report.
pub fn print_capability_report(capabilities: &[Capability]) {
    println!("Smilescope System Capabilities:");
    println!("{}", "-".repeat(60));

    for cap in capabilities {
        let status = if cap.available {
            "[OK]"
        } else if cap.required {
            "[MISSING - REQUIRED]"
        } else {
            "[MISSING - OPTIONAL]"
        };

        println!("  {} {}: {}", status, cap.name, cap.description);

        if let Some(ref fix) = cap.fix_instructions {
            println!("    Fix: {fix}");
        }
    }
}

/// Whether every required capability is available.
pub fn all_required_available(capabilities: &[Capability]) -> bool {
    capabilities.iter().all(|c| c.available || !c.required)
}
