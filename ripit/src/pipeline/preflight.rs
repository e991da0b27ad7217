//! Download preflight: directories and free-space check.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::{debug, warn};

use super::markers::pending_dir;
use crate::utils::{format_bytes, fs};
use crate::{Error, Result};

/// Space assumed per track when the real size is unknown.
pub const PER_TRACK_ESTIMATE: u64 = 100 * 1024 * 1024;
pub const SAFETY_FACTOR: u64 = 3;
/// No single file may require more than this.
pub const ABSOLUTE_LIMIT: u64 = 30 * 1024 * 1024 * 1024;

/// Result of a disk space check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSpaceStatus {
    Ok {
        available_bytes: u64,
    },
    InsufficientSpace {
        available_bytes: u64,
        required_bytes: u64,
    },
    /// Could not determine the volume for the path.
    Unknown,
}

/// Source of free-space figures.
pub trait FreeSpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// Free space from the mounted disk list.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceMonitor;

impl FreeSpaceProbe for ResourceMonitor {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        let path_str = path.to_string_lossy();

        // The longest matching mount point is the most specific volume.
        let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
        for disk in disks.list() {
            let mount_point = disk.mount_point().to_string_lossy();
            if path_str.starts_with(mount_point.as_ref()) {
                let mount_len = mount_point.len();
                if best_match.is_none_or(|(_, len)| mount_len > len) {
                    best_match = Some((disk, mount_len));
                }
            }
        }

        best_match.map(|(disk, _)| disk.available_space())
    }
}

/// Estimated bytes needed to download and merge `track_count` tracks.
pub fn required_space(track_count: usize) -> u64 {
    (track_count as u64)
        .saturating_mul(PER_TRACK_ESTIMATE)
        .saturating_mul(SAFETY_FACTOR)
}

pub fn check_disk_space(available: Option<u64>, required_bytes: u64) -> DiskSpaceStatus {
    match available {
        Some(available_bytes) if available_bytes >= required_bytes => {
            DiskSpaceStatus::Ok { available_bytes }
        }
        Some(available_bytes) => DiskSpaceStatus::InsufficientSpace {
            available_bytes,
            required_bytes,
        },
        None => DiskSpaceStatus::Unknown,
    }
}

/// Create the download root and its pending directory, then check free space.
///
/// Returns the pending directory. An undeterminable volume is logged and allowed.
pub async fn prepare(
    base_dir: &Path,
    track_count: usize,
    probe: &dyn FreeSpaceProbe,
) -> Result<PathBuf> {
    fs::ensure_dir_all_with_op("creating download directory", base_dir).await?;
    let pending = pending_dir(base_dir);
    fs::ensure_dir_all_with_op("creating pending directory", &pending).await?;

    let required = required_space(track_count);
    if required > ABSOLUTE_LIMIT {
        return Err(Error::resource(format!(
            "Required disk space {} exceeds absolute limit of {}",
            format_bytes(required),
            format_bytes(ABSOLUTE_LIMIT)
        )));
    }

    let resolved = tokio::fs::canonicalize(base_dir)
        .await
        .unwrap_or_else(|_| base_dir.to_path_buf());

    match check_disk_space(probe.available_space(&resolved), required) {
        DiskSpaceStatus::Ok { available_bytes } => {
            debug!(
                path = %resolved.display(),
                available = available_bytes,
                required,
                "Disk space OK"
            );
            Ok(pending)
        }
        DiskSpaceStatus::InsufficientSpace {
            available_bytes,
            required_bytes,
        } => Err(Error::resource(format!(
            "Not enough disk space. Required: {}, Available: {}",
            format_bytes(required_bytes),
            format_bytes(available_bytes)
        ))),
        DiskSpaceStatus::Unknown => {
            warn!(path = %resolved.display(), "Could not determine disk space, continuing");
            Ok(pending)
        }
    }
}
