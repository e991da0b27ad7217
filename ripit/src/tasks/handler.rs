//! Handler contract shared by both lanes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::TaskEmitter;
use crate::domain::{Task, TaskKind};
use crate::{Error, Result};

/// Everything a handler gets for one run.
pub struct TaskContext {
    pub task_id: String,
    pub kind: TaskKind,
    pub payload: Value,
    pub cancel: CancellationToken,
    pub emitter: TaskEmitter,
}

impl TaskContext {
    /// Deserialize the payload into its typed shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload)
            .map_err(|e| Error::validation(format!("{} payload: {e}", self.kind)))
    }
}

/// What the lane should emit once a handler returns `Ok`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Emit a `result` event.
    Reply {
        message: Option<String>,
        payload: Value,
    },
    /// The handler already published what it had to (e.g. a broadcast).
    Silent,
}

impl TaskOutcome {
    pub fn reply(message: impl Into<String>, payload: Value) -> Self {
        Self::Reply {
            message: Some(message.into()),
            payload,
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome>;
}

/// Run `handler` for `task` and turn its outcome into events.
///
/// A cancelled token always yields `cancelled`, whatever the handler returned.
pub(crate) async fn execute(
    handler: Arc<dyn TaskHandler>,
    task: Task,
    emitter: TaskEmitter,
    cancel: CancellationToken,
) {
    let ctx = TaskContext {
        task_id: task.task_id.clone(),
        kind: task.kind,
        payload: task.payload,
        cancel: cancel.clone(),
        emitter: emitter.clone(),
    };

    // Spawned so a panicking handler surfaces as an error event instead of killing the lane.
    let joined = tokio::spawn(async move { handler.handle(ctx).await }).await;
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(task_id = %task.task_id, kind = %task.kind, error = %e, "Task handler panicked");
            Err(Error::Other(format!("Task handler failed: {e}")))
        }
    };

    if cancel.is_cancelled() {
        debug!(task_id = %task.task_id, kind = %task.kind, "Task cancelled");
        emitter.cancelled();
        return;
    }

    match outcome {
        Ok(TaskOutcome::Reply { message, payload }) => emitter.result(message, payload),
        Ok(TaskOutcome::Silent) => {}
        Err(e) => {
            warn!(task_id = %task.task_id, kind = %task.kind, error = %e, "Task failed");
            let payload = e
                .stage()
                .map(|stage| json!({ "stage": stage }))
                .unwrap_or(Value::Null);
            emitter.error(e.to_string(), payload);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use super::*;

    /// Replies with its payload, after an optional delay that honours cancellation.
    pub struct EchoHandler {
        pub delay: Duration,
    }

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, ctx: TaskContext) -> Result<TaskOutcome> {
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(Error::Aborted),
                _ = tokio::time::sleep(self.delay) => Ok(TaskOutcome::Reply {
                    message: None,
                    payload: ctx.payload,
                }),
            }
        }
    }

    pub struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _ctx: TaskContext) -> Result<TaskOutcome> {
            Err(Error::resource("disk full").at_stage(1))
        }
    }
}
