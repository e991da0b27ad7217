use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{MediaFileData, MediaStatus};
use crate::pipeline::{MediaPipeline, Stage};
use crate::settings::{AppSettings, SettingsStore};
use crate::store::QueueStore;
use crate::tasks::{TaskContext, TaskHandler, TaskOutcome};
use crate::utils::format_bytes;
use crate::Result;

/// Runs the media pipeline for one queue entry and keeps its status in the store current.
pub struct DownloadMediaFileHandler {
    pipeline: Arc<MediaPipeline>,
    store: Arc<QueueStore>,
    settings: Arc<dyn SettingsStore>,
}

impl DownloadMediaFileHandler {
    pub fn new(
        pipeline: Arc<MediaPipeline>,
        store: Arc<QueueStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            pipeline,
            store,
            settings,
        }
    }

    fn set_status(&self, file_id: &str, status: MediaStatus) {
        match self.store.modify(file_id, |entry| entry.status = status) {
            Ok(true) => self.store.request_list(),
            Ok(false) => {}
            Err(e) => warn!(file_id, error = %e, "Failed to update queue entry status"),
        }
    }
}

#[async_trait]
impl TaskHandler for DownloadMediaFileHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let file: MediaFileData = ctx.payload()?;
        let settings = AppSettings::load(self.settings.as_ref()).await?;
        info!(
            task_id = %ctx.task_id,
            file_id = %file.id,
            dir = %settings.base_download_dir.display(),
            "Downloading media file"
        );

        self.set_status(&file.id, MediaStatus::Downloading);
        let output = match self
            .pipeline
            .run(&file, &settings.base_download_dir, &ctx.emitter, &ctx.cancel)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let status = if e.is_aborted() || ctx.cancel.is_cancelled() {
                    MediaStatus::Added
                } else {
                    MediaStatus::Error
                };
                self.set_status(&file.id, status);
                return Err(e);
            }
        };

        let created = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        match self.store.modify(&file.id, |entry| {
            entry.status = MediaStatus::Loaded;
            entry.size = Some(output.size);
            entry.created = Some(created);
        }) {
            Ok(true) => self.store.request_list(),
            Ok(false) => {}
            Err(e) => warn!(file_id = %file.id, error = %e, "Failed to record finished download"),
        }

        Ok(TaskOutcome::reply(
            format!(
                "File '{}' downloaded and merged successfully",
                file.source.title
            ),
            json!({
                "fileId": file.id,
                "stage": Stage::Result.number(),
                "fileSize": format_bytes(output.size),
                "filePath": output.path.to_string_lossy(),
            }),
        ))
    }
}
