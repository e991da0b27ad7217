//! Routes submitted envelopes to the lane that owns their type.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{SequentialTaskProcessor, TaskProcessor};
use crate::Result;
use crate::domain::{Lane, Task, TaskEnvelope, TaskKind};

pub struct TaskDispatcher {
    concurrent: Arc<TaskProcessor>,
    sequential: SequentialTaskProcessor,
}

impl TaskDispatcher {
    pub fn new(concurrent: Arc<TaskProcessor>, sequential: SequentialTaskProcessor) -> Self {
        Self {
            concurrent,
            sequential,
        }
    }

    /// Parse, validate and route an envelope. Returns the ids of the admitted tasks.
    pub fn submit(&self, envelope: TaskEnvelope) -> Result<Vec<String>> {
        let kind: TaskKind = envelope.task_type.parse()?;
        if let Err(e) = kind.validate_payload(&envelope.payload) {
            warn!(kind = %kind, error = %e, "Rejected task payload");
            return Err(e);
        }

        let ids = match kind.lane() {
            Lane::Concurrent => vec![self.concurrent.run(Task::new(kind, envelope.payload))?],
            Lane::Sequential => self.sequential.enqueue(kind, envelope.payload)?,
        };
        debug!(kind = %kind, ?ids, "Task submitted");
        Ok(ids)
    }

    /// Abort a task on whichever lane holds it.
    pub fn abort(&self, task_id: &str) -> bool {
        self.concurrent.abort(task_id) || self.sequential.abort(task_id)
    }

    pub fn concurrent(&self) -> &Arc<TaskProcessor> {
        &self.concurrent
    }

    pub fn sequential(&self) -> &SequentialTaskProcessor {
        &self.sequential
    }

    /// Cancel everything running on both lanes.
    pub fn shutdown(&self) {
        self.concurrent.shutdown();
        self.sequential.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::Error;
    use crate::domain::{EventKind, TaskEvent};
    use crate::domain::media_file::fixtures;
    use crate::tasks::handler::test_support::EchoHandler;
    use crate::tasks::{EventSink, SequentialConfig};

    fn dispatcher() -> (TaskDispatcher, UnboundedReceiver<TaskEvent>) {
        let (sink, rx) = EventSink::channel();
        let concurrent = Arc::new(TaskProcessor::new(sink.clone()));
        let sequential = SequentialTaskProcessor::new(sink, SequentialConfig::default());
        let echo = || {
            Arc::new(EchoHandler {
                delay: Duration::ZERO,
            })
        };
        concurrent.register(TaskKind::AnalyzeMediaInfo, echo()).unwrap();
        sequential
            .register_batch_task(TaskKind::DownloadMediaFiles, echo())
            .unwrap();
        (TaskDispatcher::new(concurrent, sequential), rx)
    }

    fn envelope(task_type: &str, payload: Value) -> TaskEnvelope {
        TaskEnvelope {
            task_type: task_type.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let (dispatcher, _rx) = dispatcher();
        let err = dispatcher
            .submit(envelope("TID_SOMETHING", Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTaskType(_)));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_before_routing() {
        let (dispatcher, _rx) = dispatcher();
        let err = dispatcher
            .submit(envelope("TID_ANALYZE-MEDIA-INFO", json!({ "link": "x" })))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(dispatcher.concurrent().active_count(), 0);

        let err = dispatcher
            .submit(envelope(
                "BTID_DOWNLOAD_MEDIAFILES_REQ",
                json!([{ "id": "broken" }]),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(dispatcher.sequential().snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_routes_by_lane() {
        let (dispatcher, mut rx) = dispatcher();

        let ids = dispatcher
            .submit(envelope(
                "TID_ANALYZE-MEDIA-INFO",
                json!({ "url": "https://example.com" }),
            ))
            .unwrap();
        assert_eq!(ids.len(), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, ids[0]);
        assert_eq!(event.kind, EventKind::Result);

        let files = json!([fixtures::media_file("a"), fixtures::media_file("b")]);
        let ids = dispatcher
            .submit(envelope("BTID_DOWNLOAD_MEDIAFILES_REQ", files))
            .unwrap();
        assert_eq!(ids.len(), 2);

        let ids = dispatcher
            .submit(envelope(
                "BTID_BATCH_TASKS_STATE_PUSH_ON",
                json!({ "pushInterval": 0 }),
            ))
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_abort_unknown_id() {
        let (dispatcher, _rx) = dispatcher();
        assert!(!dispatcher.abort("nope"));
    }
}
