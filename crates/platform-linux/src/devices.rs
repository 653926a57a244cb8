//! V4L2 device discovery through sysfs.
//!
//! Every `/sys/class/video4linux/videoN` entry is one device node. A single
//! physical camera usually exposes several (capture plus metadata); only the
//! node with `index == 0` carries frames, the rest are reported as
//! [`DeviceKind::Other`] so the catalog skips them.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use smilescope_common::error::{SmilescopeError, SmilescopeResult};
use smilescope_platform_core::{DeviceChange, DeviceKind, HostDevice};

pub const SYSFS_VIDEO4LINUX: &str = "/sys/class/video4linux";
pub const DEV_ROOT: &str = "/dev";

/// Enumerate the video nodes of this machine.
pub fn enumerate() -> SmilescopeResult<Vec<HostDevice>> {
    enumerate_from(Path::new(SYSFS_VIDEO4LINUX), Path::new(DEV_ROOT))
}

/// Enumerate video nodes below `sysfs_root`, naming them under `dev_root`.
///
/// A missing class directory means no V4L2 driver is loaded and yields an
/// empty list.
pub fn enumerate_from(sysfs_root: &Path, dev_root: &Path) -> SmilescopeResult<Vec<HostDevice>> {
    let entries = match std::fs::read_dir(sysfs_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SmilescopeError::enumeration(format!(
                "cannot read {}: {e}",
                sysfs_root.display()
            )))
        }
    };

    let mut nodes: Vec<(u32, PathBuf, String)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SmilescopeError::enumeration(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(number) = node_number(&name) {
            nodes.push((number, entry.path(), name));
        }
    }
    nodes.sort_by_key(|(number, _, _)| *number);

    let devices = nodes
        .into_iter()
        .map(|(_, sysfs_dir, node)| describe_node(&sysfs_dir, &dev_root.join(&node)))
        .collect::<Vec<_>>();
    tracing::debug!(count = devices.len(), root = %sysfs_root.display(), "Enumerated V4L2 nodes");
    Ok(devices)
}

fn node_number(name: &str) -> Option<u32> {
    name.strip_prefix("video")?.parse().ok()
}

fn describe_node(sysfs_dir: &Path, dev_path: &Path) -> HostDevice {
    let label = read_attr(sysfs_dir, "name").unwrap_or_default();
    let index = read_attr(sysfs_dir, "index")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let group_id = std::fs::canonicalize(sysfs_dir.join("device"))
        .ok()
        .map(|p| p.to_string_lossy().into_owned());

    HostDevice {
        id: dev_path.to_string_lossy().into_owned(),
        label,
        kind: if index == 0 {
            DeviceKind::VideoInput
        } else {
            DeviceKind::Other
        },
        group_id,
    }
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(attr))
        .ok()
        .map(|v| v.trim().to_string())
}

/// Ids of the capture nodes in `devices`.
pub fn capture_ids(devices: &[HostDevice]) -> BTreeSet<String> {
    devices
        .iter()
        .filter(|d| d.kind == DeviceKind::VideoInput)
        .map(|d| d.id.clone())
        .collect()
}

/// Difference between two polls, or `None` when nothing changed.
pub fn diff(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Option<DeviceChange> {
    let added: Vec<String> = current.difference(previous).cloned().collect();
    let removed: Vec<String> = previous.difference(current).cloned().collect();
    if added.is_empty() && removed.is_empty() {
        None
    } else {
        Some(DeviceChange { added, removed })
    }
}
