use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::task::{AddFilePayload, DeleteFilesPayload, UpdateFilePayload};
use crate::store::QueueStore;
use crate::tasks::{TaskContext, TaskHandler, TaskOutcome};
use crate::Result;

pub struct AddMediaFileHandler {
    store: Arc<QueueStore>,
}

impl AddMediaFileHandler {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for AddMediaFileHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let AddFilePayload { file } = ctx.payload()?;
        let success = self.store.add(file)?;
        Ok(TaskOutcome::reply(
            "Media file successfully added",
            json!({ "success": success }),
        ))
    }
}

/// Removes entries, then broadcasts the new list.
pub struct DeleteMediaFilesHandler {
    store: Arc<QueueStore>,
}

impl DeleteMediaFilesHandler {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for DeleteMediaFilesHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let DeleteFilesPayload { delete_file_ids } = ctx.payload()?;
        let removed = self.store.remove_files(&delete_file_ids)?;
        self.store.request_list();
        Ok(TaskOutcome::reply(
            format!("Success: {removed} media file(s) deleted"),
            json!({ "deleted": delete_file_ids }),
        ))
    }
}

pub struct UpdateMediaFileHandler {
    store: Arc<QueueStore>,
}

impl UpdateMediaFileHandler {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for UpdateMediaFileHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let UpdateFilePayload { updated_file } = ctx.payload()?;
        let updated = self.store.update(updated_file)?;
        Ok(TaskOutcome::reply("File updated", json!({ "updated": updated })))
    }
}

/// Answers through the `MEDIAFILES_LIST` broadcast only.
pub struct GetMediaFilesHandler {
    store: Arc<QueueStore>,
}

impl GetMediaFilesHandler {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for GetMediaFilesHandler {
    async fn handle(&self, _ctx: TaskContext) -> Result<TaskOutcome> {
        self.store.request_list();
        Ok(TaskOutcome::Silent)
    }
}
