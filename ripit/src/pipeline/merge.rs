//! Stages 5 and 6: stream-copy merge of every track, then verification of the output.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::markers::{Marker, marker_path};
use super::output_parser::{MergeProgress, MergeProgressParser, ParsingSink};
use super::{LOG_TAIL_LINES, MediaPipeline, Stage, StageReporter, check_outcome, tool_name};
use crate::domain::MediaFileData;
use crate::utils::fs::{file_size, is_non_empty_file};
use crate::{Error, Result};

/// Transcoder arguments: every track as an input with its first stream mapped, the
/// chapter sidecar as a metadata-only input, identifying tags, and a stream copy.
pub fn build_merge_args(
    inputs: &[PathBuf],
    chapters: Option<&Path>,
    file: &MediaFileData,
    output: &Path,
) -> Vec<String> {
    let mut args = Vec::with_capacity(inputs.len() * 4 + 16);
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.to_string_lossy().into_owned());
    }
    if let Some(chapters) = chapters {
        args.push("-i".to_string());
        args.push(chapters.to_string_lossy().into_owned());
    }

    args.push("-progress".to_string());
    args.push("pipe:1".to_string());

    if chapters.is_some() {
        args.push("-map_metadata".to_string());
        args.push(inputs.len().to_string());
    }
    for index in 0..inputs.len() {
        args.push("-map".to_string());
        args.push(format!("{index}:0"));
    }

    for (key, value) in [
        ("file_id", file.id.as_str()),
        ("media_id", file.source.id.as_str()),
        ("extractor", file.source.extractor.as_str()),
    ] {
        args.push("-metadata".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push("-c".to_string());
    args.push("copy".to_string());
    args.push("-y".to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

impl MediaPipeline {
    pub(super) async fn merge_tracks(
        &self,
        file: &MediaFileData,
        pending: &Path,
        chapters: Option<&Path>,
        base_dir: &Path,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let mut inputs = Vec::with_capacity(file.track_ids.len());
        for track in &file.track_ids {
            let path = marker_path(pending, &file.source.id, track, Marker::Final);
            if !is_non_empty_file(&path).await {
                return Err(Error::resource(format!(
                    "Downloaded track not found: {}",
                    path.display()
                )));
            }
            inputs.push(path);
        }

        let output = base_dir.join(format!("{}.{}", file.file_name, self.container.extension()));
        let args = build_merge_args(&inputs, chapters, file, &output);
        let tool = tool_name(&self.tools.transcoder);

        reporter.report(Stage::Merge, "Running ffmpeg to merge tracks");
        debug!(file_id = %file.id, tool = %tool, ?args, "Starting merge");

        let mut sink = ParsingSink::new(MergeProgressParser::default(), |progress: MergeProgress| {
            debug!(file_id = %file.id, ?progress, "Merge progress");
            reporter.report_progress(
                Stage::Merge,
                "Merging tracks in progress...".to_string(),
                &progress,
            );
        });

        let outcome = self
            .runner
            .run_streaming(&self.tools.transcoder, &args, cancel, &mut sink)
            .await
            .map_err(|e| Error::process(&tool, format!("could not be started: {e}")))?;
        sink.finish();

        if let Err(e) = check_outcome(&tool, outcome) {
            if !e.is_aborted() {
                warn!(
                    file_id = %file.id,
                    tool = %tool,
                    output = %sink.log_tail(LOG_TAIL_LINES),
                    "Merge failed"
                );
            }
            return Err(e);
        }
        Ok(output)
    }

    /// Check the merged file and log a probe of it. Returns its size.
    pub(super) async fn verify(&self, output: &Path, cancel: &CancellationToken) -> Result<u64> {
        let size = file_size(output).await.unwrap_or(0);
        if size == 0 {
            return Err(Error::resource(format!(
                "Final file not created or empty: {}",
                output.display()
            )));
        }

        self.probe(output, cancel).await;
        Ok(size)
    }

    async fn probe(&self, output: &Path, cancel: &CancellationToken) {
        let args = vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        match self.runner.run_buffered(&self.tools.prober, &args, cancel).await {
            Ok(out) if out.outcome.status.is_completed() => {
                match serde_json::from_str::<serde_json::Value>(&out.stdout) {
                    Ok(info) => debug!(path = %output.display(), %info, "Probe result"),
                    Err(e) => {
                        warn!(path = %output.display(), error = %e, "Probe output is not JSON")
                    }
                }
            }
            Ok(out) => warn!(
                path = %output.display(),
                status = %out.outcome.status,
                stderr = %out.stderr.trim(),
                "Probe failed"
            ),
            Err(e) => warn!(path = %output.display(), error = %e, "Probe could not be started"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media_file::fixtures;

    #[test]
    fn test_merge_args_without_chapters() {
        let file = fixtures::media_file("f1");
        let inputs = vec![PathBuf::from("a.mp4"), PathBuf::from("b.webm")];
        let args = build_merge_args(&inputs, None, &file, Path::new("out.mkv"));

        assert_eq!(
            args,
            vec![
                "-i", "a.mp4", "-i", "b.webm", "-progress", "pipe:1", "-map", "0:0", "-map",
                "1:0", "-metadata", "file_id=f1", "-metadata", "media_id=src-f1", "-metadata",
                "extractor=youtube", "-c", "copy", "-y", "out.mkv",
            ]
        );
    }

    #[test]
    fn test_merge_args_map_chapter_metadata() {
        let file = fixtures::media_file("f1");
        let inputs = vec![PathBuf::from("a.mp4"), PathBuf::from("b.webm")];
        let args = build_merge_args(
            &inputs,
            Some(Path::new("src-f1-chapters.ffmetadata")),
            &file,
            Path::new("out.mkv"),
        );

        assert_eq!(&args[4..6], ["-i", "src-f1-chapters.ffmetadata"]);
        let pos = args.iter().position(|a| a == "-map_metadata").unwrap();
        assert_eq!(args[pos + 1], "2");
        assert!(pos > args.iter().position(|a| a == "-progress").unwrap());
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 2);
    }
}
