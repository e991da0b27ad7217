use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::domain::task::AnalyzePayload;
use crate::extractor::Extractor;
use crate::tasks::{TaskContext, TaskHandler, TaskOutcome};
use crate::{Error, Result};

/// Detects what a URL points at, then fetches full metadata for a single video.
pub struct AnalyzeMediaInfoHandler {
    extractor: Extractor,
}

impl AnalyzeMediaInfoHandler {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl TaskHandler for AnalyzeMediaInfoHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let AnalyzePayload { url } = ctx.payload()?;
        info!(task_id = %ctx.task_id, url = %url, "Analyzing media URL");

        ctx.emitter.progress(
            Some("Step 1/2. Detecting media type".to_string()),
            Value::Null,
        );
        let url_info = self.extractor.url_info(&url, &ctx.cancel).await?;
        if !url_info.is_video() {
            return Err(Error::validation("Video expected"));
        }

        ctx.emitter.progress(
            Some(format!(
                "Step 2/2. Fetching full metadata for: {}",
                url_info.title.as_deref().unwrap_or("no title")
            )),
            serde_json::to_value(&url_info)?,
        );
        let source = self.extractor.source_file(&url, &ctx.cancel).await?;

        Ok(TaskOutcome::Reply {
            message: None,
            payload: serde_json::to_value(&source)?,
        })
    }
}
