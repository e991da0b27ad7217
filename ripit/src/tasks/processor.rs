//! Concurrent lane: every task starts as soon as it is submitted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handler::{TaskHandler, execute};
use super::EventSink;
use crate::domain::{Task, TaskKind};
use crate::{Error, Result};

pub struct TaskProcessor {
    handlers: RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
    /// Cancellation tokens of in-flight tasks.
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
    /// Optional cap on simultaneously running handlers.
    limiter: Option<Arc<Semaphore>>,
    events: EventSink,
}

impl TaskProcessor {
    pub fn new(events: EventSink) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            limiter: None,
            events,
        }
    }

    /// Limit concurrently running handlers. `None` means unbounded.
    pub fn with_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&kind) {
            return Err(Error::registration(format!(
                "Handler for type \"{kind}\" already registered"
            )));
        }
        handlers.insert(kind, handler);
        Ok(())
    }

    /// Start `task` in the background and return its id.
    pub fn run(&self, task: Task) -> Result<String> {
        let handler = self.handlers.read().get(&task.kind).cloned().ok_or_else(|| {
            Error::registration(format!("No handler registered for type \"{}\"", task.kind))
        })?;

        let task_id = task.task_id.clone();
        let cancel = CancellationToken::new();
        self.active.lock().insert(task_id.clone(), cancel.clone());

        let emitter = self.events.for_task(&task_id);
        let active = Arc::clone(&self.active);
        let tracked_id = task_id.clone();
        let limiter = self.limiter.clone();
        debug!(task_id = %task_id, kind = %task.kind, "Starting task");

        tokio::spawn(async move {
            let permit = match limiter {
                Some(limiter) => tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = limiter.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            if cancel.is_cancelled() {
                emitter.cancelled();
            } else {
                execute(handler, task, emitter, cancel).await;
            }

            drop(permit);
            active.lock().remove(&tracked_id);
        });

        Ok(task_id)
    }

    /// Cancel an in-flight task. Unknown or finished ids are ignored.
    pub fn abort(&self, task_id: &str) -> bool {
        match self.active.lock().remove(task_id) {
            Some(cancel) => {
                info!(task_id, "Aborting task");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancel every in-flight task.
    pub fn shutdown(&self) {
        for (_, cancel) in self.active.lock().drain() {
            cancel.cancel();
        }
    }
}
