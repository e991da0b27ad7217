//! Task catalogue: wire type strings, lane routing and typed payloads.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::media_file::MediaFileData;
use crate::{Error, Result};

/// Which processor runs a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Every task starts immediately.
    Concurrent,
    /// One task at a time, in submission order.
    Sequential,
}

/// Every task type the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    AnalyzeMediaInfo,
    AddMediaFile,
    DeleteMediaFiles,
    UpdateMediaFile,
    GetMediaFilesReq,
    AppSettingsGet,
    AppSettingsChange,
    DownloadMediaFiles,
    BatchStatePushOn,
    BatchStatePushOff,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        Self::AnalyzeMediaInfo,
        Self::AddMediaFile,
        Self::DeleteMediaFiles,
        Self::UpdateMediaFile,
        Self::GetMediaFilesReq,
        Self::AppSettingsGet,
        Self::AppSettingsChange,
        Self::DownloadMediaFiles,
        Self::BatchStatePushOn,
        Self::BatchStatePushOff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzeMediaInfo => "TID_ANALYZE-MEDIA-INFO",
            Self::AddMediaFile => "TID_ADD_MEDIAFILE",
            Self::DeleteMediaFiles => "TID_DELETE_MEDIAFILES",
            Self::UpdateMediaFile => "TID_UPDATE_MEDIAFILE",
            Self::GetMediaFilesReq => "TID_GET_MEDIAFILES_REQ",
            Self::AppSettingsGet => "TID_APP_SETTINGS_GET",
            Self::AppSettingsChange => "TID_APP_SETTINGS_CHANGE",
            Self::DownloadMediaFiles => "BTID_DOWNLOAD_MEDIAFILES_REQ",
            Self::BatchStatePushOn => "BTID_BATCH_TASKS_STATE_PUSH_ON",
            Self::BatchStatePushOff => "BTID_BATCH_TASKS_STATE_PUSH_OFF",
        }
    }

    pub fn lane(&self) -> Lane {
        if self.is_batch() || self.is_control() {
            Lane::Sequential
        } else {
            Lane::Concurrent
        }
    }

    /// Batch payloads are arrays, expanded to one queued task per element.
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::DownloadMediaFiles)
    }

    /// Monitoring toggles handled by the sequential lane itself, never queued.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::BatchStatePushOn | Self::BatchStatePushOff)
    }

    /// Check a payload against the typed shape for this kind.
    ///
    /// Batch kinds check each element.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        if !self.is_batch() {
            return self.validate_item(payload);
        }
        let items = payload.as_array().ok_or_else(|| {
            Error::validation(format!("{}: batch payload must be an array", self))
        })?;
        items.iter().try_for_each(|item| self.validate_item(item))
    }

    fn validate_item(&self, payload: &Value) -> Result<()> {
        match self {
            Self::AnalyzeMediaInfo => check::<AnalyzePayload>(*self, payload),
            Self::AddMediaFile => check::<AddFilePayload>(*self, payload),
            Self::DeleteMediaFiles => check::<DeleteFilesPayload>(*self, payload),
            Self::UpdateMediaFile => check::<UpdateFilePayload>(*self, payload),
            Self::AppSettingsChange => check::<SettingsChangePayload>(*self, payload),
            Self::BatchStatePushOn => check::<PushOnPayload>(*self, payload),
            Self::DownloadMediaFiles => check::<MediaFileData>(*self, payload),
            Self::GetMediaFilesReq | Self::AppSettingsGet | Self::BatchStatePushOff => Ok(()),
        }
    }
}

fn check<T: DeserializeOwned>(kind: TaskKind, payload: &Value) -> Result<()> {
    T::deserialize(payload)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("{kind} payload: {e}")))
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownTaskType(s.to_string()))
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Untyped submission as it arrives from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// An admitted task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub payload: Value,
}

impl Task {
    /// New task with a fresh id.
    pub fn new(kind: TaskKind, payload: Value) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            kind,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzePayload {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFilePayload {
    pub file: MediaFileData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesPayload {
    pub delete_file_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFilePayload {
    pub updated_file: MediaFileData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChangePayload {
    pub change_field: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOnPayload {
    pub push_interval: u64,
}
