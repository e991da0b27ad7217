//! Stage 2: one extractor run per track, with marker-based skip and temp→final rename.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::markers::{Marker, marker_path};
use super::output_parser::{DownloadProgressParser, ParsingSink};
use super::{
    DownloadProgress, LOG_TAIL_LINES, MediaPipeline, Stage, StageReporter, check_outcome,
    tool_name,
};
use crate::domain::{MediaFileData, Track};
use crate::utils::fs::{file_size, io_error, remove_file_if_exists};
use crate::utils::format_bytes;
use crate::{Error, Result};

/// Extractor arguments for one track written to `output`.
pub fn build_download_args(url: &str, format_id: &str, output: &Path) -> Vec<String> {
    vec![
        url.to_string(),
        "-f".to_string(),
        format_id.to_string(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
    ]
}

impl MediaPipeline {
    pub(super) async fn download_track(
        &self,
        file: &MediaFileData,
        track: &Track,
        pending: &Path,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source_id = &file.source.id;
        let final_path = marker_path(pending, source_id, track, Marker::Final);

        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            debug!(file_id = %file.id, track = %track.format_id, "Track already downloaded");
            reporter.report(
                Stage::Download,
                format!(
                    "Track {} already downloaded: {}",
                    track.format_id,
                    super::file_name(&final_path)
                ),
            );
            return Ok(());
        }

        let temp_path = marker_path(pending, source_id, track, Marker::Temp);
        if let Err(e) = self.fetch_track(file, track, &temp_path, reporter, cancel).await {
            if let Err(cleanup) = remove_file_if_exists(&temp_path).await {
                warn!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "Failed to remove temp marker"
                );
            }
            return Err(e);
        }

        let size = file_size(&temp_path).await.unwrap_or(0);
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| io_error("renaming downloaded track", &temp_path, e))?;

        info!(file_id = %file.id, track = %track.format_id, size, "Track downloaded");
        reporter.report_size(
            Stage::TrackDone,
            format!(
                "Track {} downloaded successfully ({})",
                track.format_id,
                format_bytes(size)
            ),
            format_bytes(size),
        );
        Ok(())
    }

    /// Run the extractor into `temp_path` and check that it produced data.
    async fn fetch_track(
        &self,
        file: &MediaFileData,
        track: &Track,
        temp_path: &Path,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let tool = tool_name(&self.tools.extractor);
        reporter.report(
            Stage::Download,
            format!("Downloading track {}", track.format_id),
        );

        let args = build_download_args(&file.source.webpage_url, &track.format_id, temp_path);
        debug!(file_id = %file.id, tool = %tool, ?args, "Starting extractor");

        let mut sink = ParsingSink::new(DownloadProgressParser, |progress: DownloadProgress| {
            debug!(file_id = %file.id, ?progress, "Download progress");
            reporter.report_progress(
                Stage::Download,
                format!(
                    "Downloading track, {}%, {}, ETA {}",
                    progress.percent, progress.speed, progress.eta
                ),
                &progress,
            );
        });

        let outcome = self
            .runner
            .run_streaming(&self.tools.extractor, &args, cancel, &mut sink)
            .await
            .map_err(|e| Error::process(&tool, format!("could not be started: {e}")))?;
        sink.finish();

        if let Err(e) = check_outcome(&tool, outcome) {
            if !e.is_aborted() {
                warn!(
                    file_id = %file.id,
                    track = %track.format_id,
                    tool = %tool,
                    output = %sink.log_tail(LOG_TAIL_LINES),
                    "Track download failed"
                );
            }
            return Err(e);
        }

        if file_size(temp_path).await.unwrap_or(0) == 0 {
            return Err(Error::resource(format!(
                "Downloaded track not found: {}",
                temp_path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_args_order() {
        let args = build_download_args(
            "https://example.com/watch?v=x",
            "137",
            Path::new("/tmp/pending/x-137-[*].mp4"),
        );
        assert_eq!(
            args,
            vec![
                "https://example.com/watch?v=x",
                "-f",
                "137",
                "-o",
                "/tmp/pending/x-137-[*].mp4",
                "--no-warnings",
                "--newline",
            ]
        );
    }
}
