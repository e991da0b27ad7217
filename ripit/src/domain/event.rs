//! Outbound event envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::Task;

/// Task id carried by events that are not scoped to one task.
pub const BROADCAST_TASK_ID: &str = "BROADCAST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "result")]
    Result,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Queue store snapshot.
    #[serde(rename = "MEDIAFILES_LIST")]
    MediaFilesList,
    /// Sequential lane state.
    #[serde(rename = "SEQ-PROCESSOR-TASKS-LIST")]
    SeqProcessorTasksList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl TaskEvent {
    pub fn new(
        task_id: impl Into<String>,
        kind: EventKind,
        message: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            message,
            payload,
        }
    }

    pub fn broadcast(kind: EventKind, payload: Value) -> Self {
        Self::new(BROADCAST_TASK_ID, kind, None, payload)
    }

    pub fn is_broadcast(&self) -> bool {
        self.task_id == BROADCAST_TASK_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueEntryStatus {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "pending")]
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshotEntry {
    #[serde(flatten)]
    pub task: Task,
    pub status: QueueEntryStatus,
}

/// Sequential lane state, current task first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub tasks: Vec<QueueSnapshotEntry>,
}

impl QueueSnapshot {
    pub fn new(current: Option<&Task>, pending: impl IntoIterator<Item = Task>) -> Self {
        let mut tasks: Vec<QueueSnapshotEntry> = current
            .map(|task| QueueSnapshotEntry {
                task: task.clone(),
                status: QueueEntryStatus::InProgress,
            })
            .into_iter()
            .collect();
        tasks.extend(pending.into_iter().map(|task| QueueSnapshotEntry {
            task,
            status: QueueEntryStatus::Pending,
        }));
        Self { tasks }
    }
}
