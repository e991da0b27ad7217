//! FFMETADATA chapter sidecar.

use std::path::{Path, PathBuf};

use super::markers::chapters_file_name;
use crate::Result;
use crate::domain::Chapter;
use crate::utils::fs::io_error;

/// Render chapters in the FFMETADATA1 format with a millisecond timebase.
pub fn render_ffmetadata(chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    for (index, chapter) in chapters.iter().enumerate() {
        let start = to_millis(chapter.start_time);
        let end = to_millis(chapter.end_time.unwrap_or(0.0));
        let title = match chapter.title.as_deref() {
            Some(title) if !title.is_empty() => title.replace('\n', " "),
            _ => format!("Chapter {}", index + 1),
        };
        out.push_str(&format!(
            "[CHAPTER]\nTIMEBASE=1/1000\nSTART={start}\nEND={end}\ntitle={title}\n\n"
        ));
    }
    out
}

fn to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).floor() as i64
}

/// Write the sidecar for `source_id` into `dir`. Returns `None` when there are no chapters.
pub async fn write_chapter_file(
    dir: &Path,
    source_id: &str,
    chapters: &[Chapter],
) -> Result<Option<PathBuf>> {
    if chapters.is_empty() {
        return Ok(None);
    }

    let path = dir.join(chapters_file_name(source_id));
    tokio::fs::write(&path, render_ffmetadata(chapters))
        .await
        .map_err(|e| io_error("writing chapter file", &path, e))?;
    Ok(Some(path))
}
