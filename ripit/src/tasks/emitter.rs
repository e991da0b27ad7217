//! Event sinks.
//!
//! All lanes and the store publish into one unbounded channel. Each running task gets a
//! [`TaskEmitter`] that stamps its id on every event.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::{EventKind, TaskEvent};

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped, event discarded");
        }
    }

    pub fn broadcast(&self, kind: EventKind, payload: Value) {
        self.send(TaskEvent::broadcast(kind, payload));
    }

    pub fn for_task(&self, task_id: impl Into<String>) -> TaskEmitter {
        TaskEmitter {
            task_id: task_id.into(),
            sink: self.clone(),
        }
    }
}

/// Send-only sink scoped to one task.
#[derive(Debug, Clone)]
pub struct TaskEmitter {
    task_id: String,
    sink: EventSink,
}

impl TaskEmitter {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn emit(&self, kind: EventKind, message: Option<String>, payload: Value) {
        self.sink
            .send(TaskEvent::new(self.task_id.clone(), kind, message, payload));
    }

    pub fn progress(&self, message: Option<String>, payload: Value) {
        self.emit(EventKind::Progress, message, payload);
    }

    pub fn result(&self, message: Option<String>, payload: Value) {
        self.emit(EventKind::Result, message, payload);
    }

    pub fn error(&self, message: impl Into<String>, payload: Value) {
        self.emit(EventKind::Error, Some(message.into()), payload);
    }

    pub fn cancelled(&self) {
        self.emit(EventKind::Cancelled, None, Value::Null);
    }
}
