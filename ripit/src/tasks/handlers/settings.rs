use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::domain::task::SettingsChangePayload;
use crate::settings::{AppSettings, SettingsStore, default_download_dir};
use crate::tasks::{TaskContext, TaskHandler, TaskOutcome};
use crate::{Error, Result};

pub struct AppSettingsGetHandler {
    settings: Arc<dyn SettingsStore>,
}

impl AppSettingsGetHandler {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TaskHandler for AppSettingsGetHandler {
    async fn handle(&self, _ctx: TaskContext) -> Result<TaskOutcome> {
        let settings = AppSettings::load(self.settings.as_ref()).await?;
        Ok(TaskOutcome::Reply {
            message: None,
            payload: serde_json::to_value(settings)?,
        })
    }
}

/// Sets one field. A missing value resets it to the platform download directory.
pub struct AppSettingsChangeHandler {
    settings: Arc<dyn SettingsStore>,
}

impl AppSettingsChangeHandler {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TaskHandler for AppSettingsChangeHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
        let SettingsChangePayload {
            change_field,
            value,
        } = ctx.payload()?;
        if change_field.trim().is_empty() {
            return Err(Error::validation("changeField must not be empty"));
        }

        let value = match value {
            Some(value) if !value.is_null() => value,
            _ => Value::String(default_download_dir().to_string_lossy().into_owned()),
        };
        info!(field = %change_field, %value, "Changing setting");
        self.settings.set(&change_field, value).await?;

        let settings = AppSettings::load(self.settings.as_ref()).await?;
        Ok(TaskOutcome::Reply {
            message: None,
            payload: serde_json::to_value(settings)?,
        })
    }
}
