//! Marker file naming.
//!
//! A track is downloaded to `{sourceId}-{formatId}-[*].{ext}` and renamed to
//! `{sourceId}-{formatId}-[+].{ext}` once complete, so a later run can skip it.

use std::path::{Path, PathBuf};

use crate::domain::Track;

/// Sub-directory of the download root holding in-flight tracks and sidecars.
pub const PENDING_DIR_NAME: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Download in progress.
    Temp,
    /// Download complete.
    Final,
}

impl Marker {
    pub fn as_char(&self) -> char {
        match self {
            Self::Temp => '*',
            Self::Final => '+',
        }
    }
}

pub fn marker_file_name(source_id: &str, track: &Track, marker: Marker) -> String {
    let ext = if track.ext.is_empty() {
        String::new()
    } else {
        format!(".{}", track.ext)
    };
    format!(
        "{}-{}-[{}]{}",
        source_id,
        track.format_id,
        marker.as_char(),
        ext
    )
}

pub fn marker_path(pending_dir: &Path, source_id: &str, track: &Track, marker: Marker) -> PathBuf {
    pending_dir.join(marker_file_name(source_id, track, marker))
}

pub fn chapters_file_name(source_id: &str) -> String {
    format!("{source_id}-chapters.ffmetadata")
}

pub fn pending_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(PENDING_DIR_NAME)
}
