//! Service container: builds the stores, the pipeline and both lanes, and registers every handler.

use std::sync::Arc;

use process_utils::ProcessRunner;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::domain::{TaskEvent, TaskKind};
use crate::extractor::Extractor;
use crate::pipeline::{MediaPipeline, PipelineConfig};
use crate::settings::{JsonSettingsStore, SettingsStore};
use crate::store::QueueStore;
use crate::tasks::handlers::{
    AddMediaFileHandler, AnalyzeMediaInfoHandler, AppSettingsChangeHandler,
    AppSettingsGetHandler, DeleteMediaFilesHandler, DownloadMediaFileHandler,
    GetMediaFilesHandler, UpdateMediaFileHandler,
};
use crate::tasks::{
    EventSink, SequentialConfig, SequentialTaskProcessor, TaskDispatcher, TaskProcessor,
};
use crate::utils::fs::ensure_dir_all_with_op;

pub struct ServiceContainer {
    pub config: AppConfig,
    pub events: EventSink,
    pub queue: Arc<QueueStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub pipeline: Arc<MediaPipeline>,
    pub dispatcher: TaskDispatcher,
}

impl ServiceContainer {
    /// Build every service from `config` using the JSON settings file.
    ///
    /// Returns the container and the receiver every event is published to.
    pub async fn new(config: AppConfig) -> Result<(Self, mpsc::UnboundedReceiver<TaskEvent>)> {
        ensure_dir_all_with_op("creating data directory", &config.data_dir).await?;
        let settings: Arc<dyn SettingsStore> =
            Arc::new(JsonSettingsStore::open(config.settings_file()).await?);
        Self::with_settings(config, settings).await
    }

    /// Build every service around the given settings store.
    pub async fn with_settings(
        config: AppConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TaskEvent>)> {
        let (events, rx) = EventSink::channel();

        let queue = Arc::new(QueueStore::new(
            config.queue_file(),
            config.max_backups,
            events.clone(),
        ));
        queue.init().await?;
        let invalid = queue.invalid_entries();
        if !invalid.is_empty() {
            warn!(count = invalid.len(), "Queue file has invalid entries");
        }

        let tools = config.tool_paths();
        let pipeline = Arc::new(MediaPipeline::new(PipelineConfig {
            tools: tools.clone(),
            container: config.output_container,
            force_kill_delay: config.force_kill_delay(),
        }));
        let extractor = Extractor::new(
            tools.extractor.clone(),
            ProcessRunner::new().with_force_kill_delay(config.force_kill_delay()),
        );

        let concurrent = Arc::new(
            TaskProcessor::new(events.clone()).with_max_concurrent(config.max_concurrent_tasks),
        );
        concurrent.register(
            TaskKind::AnalyzeMediaInfo,
            Arc::new(AnalyzeMediaInfoHandler::new(extractor)),
        )?;
        concurrent.register(
            TaskKind::AddMediaFile,
            Arc::new(AddMediaFileHandler::new(queue.clone())),
        )?;
        concurrent.register(
            TaskKind::DeleteMediaFiles,
            Arc::new(DeleteMediaFilesHandler::new(queue.clone())),
        )?;
        concurrent.register(
            TaskKind::UpdateMediaFile,
            Arc::new(UpdateMediaFileHandler::new(queue.clone())),
        )?;
        concurrent.register(
            TaskKind::GetMediaFilesReq,
            Arc::new(GetMediaFilesHandler::new(queue.clone())),
        )?;
        concurrent.register(
            TaskKind::AppSettingsGet,
            Arc::new(AppSettingsGetHandler::new(settings.clone())),
        )?;
        concurrent.register(
            TaskKind::AppSettingsChange,
            Arc::new(AppSettingsChangeHandler::new(settings.clone())),
        )?;

        let sequential = SequentialTaskProcessor::new(
            events.clone(),
            SequentialConfig {
                monitor_floor: config.monitor_floor(),
                monitor_fallback: config.monitor_fallback(),
            },
        );
        sequential.register_batch_task(
            TaskKind::DownloadMediaFiles,
            Arc::new(DownloadMediaFileHandler::new(
                pipeline.clone(),
                queue.clone(),
                settings.clone(),
            )),
        )?;

        info!(
            queue = %config.queue_file().display(),
            extractor = %tools.extractor.display(),
            transcoder = %tools.transcoder.display(),
            "Services initialized"
        );

        let container = Self {
            config,
            events,
            queue,
            settings,
            pipeline,
            dispatcher: TaskDispatcher::new(concurrent, sequential),
        };
        Ok((container, rx))
    }

    /// Cancel running work and wait for pending queue writes.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down services");
        self.dispatcher.shutdown();
        self.queue.flush().await?;
        info!("Services shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::media_file::fixtures;
    use crate::domain::{EventKind, TaskEnvelope};
    use crate::settings::MemorySettingsStore;

    fn config(dir: &TempDir) -> AppConfig {
        AppConfig {
            data_dir: dir.path().to_path_buf(),
            bin_dir: dir.path().join("bin"),
            log_dir: dir.path().join("logs"),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let dir = TempDir::new().unwrap();
        let (services, mut rx) =
            ServiceContainer::with_settings(config(&dir), Arc::new(MemorySettingsStore::new()))
                .await
                .unwrap();

        let file = fixtures::media_file("f1");
        let ids = services
            .dispatcher
            .submit(TaskEnvelope {
                task_type: TaskKind::AddMediaFile.as_str().to_string(),
                payload: json!({ "file": file }),
            })
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, ids[0]);
        assert_eq!(event.kind, EventKind::Result);
        assert_eq!(event.message.as_deref(), Some("Media file successfully added"));
        assert_eq!(event.payload, json!({ "success": true }));

        services
            .dispatcher
            .submit(TaskEnvelope {
                task_type: TaskKind::GetMediaFilesReq.as_str().to_string(),
                payload: serde_json::Value::Null,
            })
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_broadcast());
        assert_eq!(event.kind, EventKind::MediaFilesList);
        assert_eq!(event.payload[0]["id"], "f1");

        services.shutdown().await.unwrap();
        assert!(dir.path().join("queue.json").exists());
    }

    #[tokio::test]
    async fn test_settings_change_defaults_missing_value() {
        let dir = TempDir::new().unwrap();
        let (services, mut rx) =
            ServiceContainer::with_settings(config(&dir), Arc::new(MemorySettingsStore::new()))
                .await
                .unwrap();

        services
            .dispatcher
            .submit(TaskEnvelope {
                task_type: TaskKind::AppSettingsChange.as_str().to_string(),
                payload: json!({ "changeField": "baseDownloadDir", "value": "/media/out" }),
            })
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, json!({ "baseDownloadDir": "/media/out" }));

        services
            .dispatcher
            .submit(TaskEnvelope {
                task_type: TaskKind::AppSettingsChange.as_str().to_string(),
                payload: json!({ "changeField": "" }),
            })
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Error);
    }
}
