//! Per-file media pipeline: preflight, track downloads, chapters, merge, verification.
//!
//! Stages run strictly in order and any failure ends the run with the error tagged by its
//! stage. Completed tracks keep their final marker, so a later run resumes at the first
//! track that is not done yet.

pub mod chapters;
mod download;
pub mod markers;
mod merge;
pub mod output_parser;
pub mod preflight;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use process_utils::{ProcessRunner, RunOutcome, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ToolPaths;
use crate::domain::MediaFileData;
use crate::tasks::TaskEmitter;
use crate::{Error, Result};

pub use download::build_download_args;
pub use merge::build_merge_args;
pub use output_parser::{
    DownloadProgress, DownloadProgressParser, LineOutcome, LineParser, MergeProgress,
    MergeProgressParser, OutputStreamParser,
};
pub use preflight::{FreeSpaceProbe, ResourceMonitor};

/// Log lines kept in error messages and warnings on tool failure.
const LOG_TAIL_LINES: usize = 20;

/// Pipeline stage numbers as reported in progress payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preflight = 1,
    Download = 2,
    TrackDone = 3,
    Chapters = 4,
    Merge = 5,
    Result = 6,
}

impl Stage {
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Container of the merged output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputContainer {
    #[default]
    Mkv,
    Mp4,
}

impl OutputContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
        }
    }
}

impl FromStr for OutputContainer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mkv" => Ok(Self::Mkv),
            "mp4" => Ok(Self::Mp4),
            other => Err(format!("unsupported container '{other}', expected mkv or mp4")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tools: ToolPaths,
    pub container: OutputContainer,
    pub force_kill_delay: Duration,
}

/// Merged file produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub path: PathBuf,
    pub size: u64,
}

/// Emits stage-numbered progress for one file.
pub(crate) struct StageReporter<'a> {
    emitter: &'a TaskEmitter,
    file_id: &'a str,
}

impl StageReporter<'_> {
    pub(crate) fn report(&self, stage: Stage, message: impl Into<String>) {
        self.emit(stage, message.into(), json!({}));
    }

    pub(crate) fn report_progress<T: Serialize>(
        &self,
        stage: Stage,
        message: String,
        progress: &T,
    ) {
        let progress = serde_json::to_value(progress).unwrap_or(Value::Null);
        self.emit(stage, message, json!({ "progress": progress }));
    }

    pub(crate) fn report_size(&self, stage: Stage, message: String, file_size: String) {
        self.emit(stage, message, json!({ "fileSize": file_size }));
    }

    fn emit(&self, stage: Stage, message: String, extra: Value) {
        let mut payload = json!({ "fileId": self.file_id, "stage": stage.number() });
        if let (Some(payload), Value::Object(extra)) = (payload.as_object_mut(), extra) {
            payload.extend(extra);
        }
        self.emitter.progress(Some(message), payload);
    }
}

pub struct MediaPipeline {
    tools: ToolPaths,
    container: OutputContainer,
    runner: ProcessRunner,
    space: Arc<dyn FreeSpaceProbe>,
}

impl MediaPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            tools: config.tools,
            container: config.container,
            runner: ProcessRunner::new().with_force_kill_delay(config.force_kill_delay),
            space: Arc::new(ResourceMonitor),
        }
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn FreeSpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Download every selected track of `file` and merge them under `base_dir`.
    pub async fn run(
        &self,
        file: &MediaFileData,
        base_dir: &Path,
        emitter: &TaskEmitter,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let reporter = StageReporter {
            emitter,
            file_id: &file.id,
        };

        reporter.report(
            Stage::Preflight,
            format!("Starting download tracks for file '{}'", file.source.title),
        );
        let pending = preflight::prepare(base_dir, file.track_ids.len(), self.space.as_ref())
            .await
            .map_err(|e| e.at_stage(Stage::Preflight.number()))?;

        for track in &file.track_ids {
            ensure_not_cancelled(cancel, Stage::Download)?;
            self.download_track(file, track, &pending, &reporter, cancel)
                .await
                .map_err(|e| e.at_stage(Stage::Download.number()))?;
        }

        ensure_not_cancelled(cancel, Stage::Chapters)?;
        let chapters = file.source.chapters();
        let chapter_file = if chapters.is_empty() {
            None
        } else {
            reporter.report(
                Stage::Chapters,
                format!("Generating chapter track for file '{}'", file.source.title),
            );
            let path = chapters::write_chapter_file(&pending, &file.source.id, &chapters)
                .await
                .map_err(|e| e.at_stage(Stage::Chapters.number()))?;
            if let Some(path) = &path {
                reporter.report(
                    Stage::Chapters,
                    format!("Chapter track generated: {}", file_name(path)),
                );
            }
            path
        };

        ensure_not_cancelled(cancel, Stage::Merge)?;
        let output = self
            .merge_tracks(file, &pending, chapter_file.as_deref(), base_dir, &reporter, cancel)
            .await
            .map_err(|e| e.at_stage(Stage::Merge.number()))?;

        let size = self
            .verify(&output, cancel)
            .await
            .map_err(|e| e.at_stage(Stage::Result.number()))?;

        info!(file_id = %file.id, path = %output.display(), size, "Media file ready");
        Ok(PipelineOutput { path: output, size })
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Aborted.at_stage(stage.number()))
    } else {
        Ok(())
    }
}

/// Map a streaming run outcome to the pipeline's error taxonomy.
fn check_outcome(tool: &str, outcome: RunOutcome) -> Result<()> {
    match outcome.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Aborted | RunStatus::Terminated => Err(Error::Aborted),
        RunStatus::Failed => Err(Error::process(
            tool,
            match outcome.code {
                Some(code) => format!("failed with exit code {code}"),
                None => "was killed by a signal".to_string(),
            },
        )),
    }
}

/// Short tool name for messages, e.g. `yt-dlp` for `/opt/bin/yt-dlp.exe`.
fn tool_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_numbers() {
        assert_eq!(Stage::Preflight.number(), 1);
        assert_eq!(Stage::Merge.number(), 5);
        assert_eq!(Stage::Result.number(), 6);
    }

    #[test]
    fn test_check_outcome() {
        let ok = RunOutcome {
            status: RunStatus::Completed,
            code: Some(0),
        };
        assert!(check_outcome("ffmpeg", ok).is_ok());

        let aborted = RunOutcome {
            status: RunStatus::Terminated,
            code: None,
        };
        assert!(check_outcome("ffmpeg", aborted).unwrap_err().is_aborted());

        let failed = RunOutcome {
            status: RunStatus::Failed,
            code: Some(1),
        };
        assert_eq!(
            check_outcome("ffmpeg", failed).unwrap_err().to_string(),
            "ffmpeg failed with exit code 1"
        );
    }

    #[test]
    fn test_tool_name() {
        assert_eq!(tool_name(Path::new("/opt/bin/yt-dlp")), "yt-dlp");
        assert_eq!(tool_name(Path::new("C:/tools/ffmpeg.exe")), "ffmpeg");
    }
}
