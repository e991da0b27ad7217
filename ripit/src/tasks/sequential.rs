//! Sequential lane: strict FIFO, one handler at a time, with batch expansion and state broadcasts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::EventSink;
use super::handler::{TaskHandler, execute};
use crate::domain::task::PushOnPayload;
use crate::domain::{EventKind, QueueSnapshot, Task, TaskKind};
use crate::{Error, Result};

/// Monitoring interval limits.
#[derive(Debug, Clone, Copy)]
pub struct SequentialConfig {
    /// Intervals at or below this are replaced by `monitor_fallback`.
    pub monitor_floor: Duration,
    pub monitor_fallback: Duration,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            monitor_floor: Duration::from_millis(100),
            monitor_fallback: Duration::from_millis(2000),
        }
    }
}

struct Running {
    task: Task,
    cancel: CancellationToken,
}

#[derive(Default)]
struct LaneState {
    queue: VecDeque<Task>,
    current: Option<Running>,
    /// Set while the drain loop is alive.
    processing: bool,
    monitor: Option<CancellationToken>,
}

struct Inner {
    handlers: RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
    state: Mutex<LaneState>,
    events: EventSink,
    config: SequentialConfig,
}

/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct SequentialTaskProcessor {
    inner: Arc<Inner>,
}

impl SequentialTaskProcessor {
    pub fn new(events: EventSink, config: SequentialConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                state: Mutex::new(LaneState::default()),
                events,
                config,
            }),
        }
    }

    pub fn register_task(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Result<()> {
        self.register(kind, handler, false)
    }

    /// Register a handler that receives one element of a batch payload per task.
    pub fn register_batch_task(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Result<()> {
        self.register(kind, handler, true)
    }

    fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>, batch: bool) -> Result<()> {
        if kind.is_control() {
            return Err(Error::registration(format!(
                "\"{kind}\" is handled by the lane itself"
            )));
        }
        if kind.is_batch() != batch {
            let expected = if kind.is_batch() { "a batch" } else { "a single" };
            return Err(Error::registration(format!(
                "\"{kind}\" must be registered as {expected} task"
            )));
        }

        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&kind) {
            return Err(Error::registration(format!(
                "Handler for type \"{kind}\" already registered"
            )));
        }
        handlers.insert(kind, handler);
        Ok(())
    }

    /// Queue a task, or each element of a batch payload as its own task.
    ///
    /// Monitoring toggles are applied immediately and return no ids.
    pub fn enqueue(&self, kind: TaskKind, payload: Value) -> Result<Vec<String>> {
        if kind.is_control() {
            self.apply_control(kind, payload)?;
            return Ok(Vec::new());
        }

        if !self.inner.handlers.read().contains_key(&kind) {
            return Err(Error::registration(format!(
                "No handler registered for type \"{kind}\""
            )));
        }

        let tasks = if kind.is_batch() {
            let Value::Array(items) = payload else {
                return Err(Error::validation(format!(
                    "{kind}: expected payload to be an array of entities"
                )));
            };
            items
                .into_iter()
                .map(|item| Task::new(kind, item))
                .collect::<Vec<_>>()
        } else {
            vec![Task::new(kind, payload)]
        };

        let ids: Vec<String> = tasks.iter().map(|task| task.task_id.clone()).collect();
        debug!(kind = %kind, count = ids.len(), "Enqueued tasks");

        let start = {
            let mut state = self.inner.state.lock();
            state.queue.extend(tasks);
            !std::mem::replace(&mut state.processing, true)
        };
        if start {
            tokio::spawn(Arc::clone(&self.inner).drain());
        }

        self.inner.broadcast_state();
        Ok(ids)
    }

    /// Cancel the running task, or drop a queued one. Returns whether the id was found.
    pub fn abort(&self, task_id: &str) -> bool {
        let found = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if let Some(running) = &state.current
                && running.task.task_id == task_id
            {
                info!(task_id, "Aborting running task");
                running.cancel.cancel();
                true
            } else {
                let before = state.queue.len();
                state.queue.retain(|task| task.task_id != task_id);
                before != state.queue.len()
            }
        };
        self.inner.broadcast_state();
        found
    }

    /// Current task first, then the pending queue.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshot()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.state.lock().monitor.is_some()
    }

    /// Stop monitoring, drop queued tasks and cancel the running one.
    pub fn shutdown(&self) {
        self.stop_monitoring();
        let mut state = self.inner.state.lock();
        state.queue.clear();
        if let Some(running) = &state.current {
            running.cancel.cancel();
        }
    }

    fn apply_control(&self, kind: TaskKind, payload: Value) -> Result<()> {
        if kind == TaskKind::BatchStatePushOn {
            let PushOnPayload { push_interval } = serde_json::from_value(payload)
                .map_err(|e| Error::validation(format!("{kind} payload: {e}")))?;
            self.start_monitoring(push_interval);
        } else {
            self.stop_monitoring();
        }
        Ok(())
    }

    fn start_monitoring(&self, push_interval_ms: u64) {
        if push_interval_ms == 0 {
            self.inner.broadcast_state();
            return;
        }

        let requested = Duration::from_millis(push_interval_ms);
        let period = if requested > self.inner.config.monitor_floor {
            requested
        } else {
            self.inner.config.monitor_fallback
        };
        debug!(?period, "Starting queue state monitoring");

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.state.lock().monitor.replace(token.clone()) {
            previous.cancel();
        }

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.broadcast_state();
                    }
                }
            }
        });
    }

    fn stop_monitoring(&self) {
        if let Some(token) = self.inner.state.lock().monitor.take() {
            debug!("Stopping queue state monitoring");
            token.cancel();
        }
    }
}

impl Inner {
    fn handler_for(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(&kind).cloned()
    }

    /// Run queued tasks one by one until the queue is empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(task) => {
                        let cancel = CancellationToken::new();
                        state.current = Some(Running {
                            task: task.clone(),
                            cancel: cancel.clone(),
                        });
                        Some((task, cancel))
                    }
                    None => {
                        state.current = None;
                        state.processing = false;
                        None
                    }
                }
            };
            self.broadcast_state();

            let Some((task, cancel)) = next else { break };
            let emitter = self.events.for_task(&task.task_id);
            match self.handler_for(task.kind) {
                Some(handler) => {
                    debug!(task_id = %task.task_id, kind = %task.kind, "Processing task");
                    execute(handler, task, emitter, cancel).await;
                }
                None => {
                    warn!(task_id = %task.task_id, kind = %task.kind, "No handler for queued task");
                    emitter.error(
                        format!("No handler registered for type \"{}\"", task.kind),
                        Value::Null,
                    );
                }
            }

            self.state.lock().current = None;
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot::new(
            state.current.as_ref().map(|running| &running.task),
            state.queue.iter().cloned(),
        )
    }

    fn broadcast_state(&self) {
        match serde_json::to_value(self.snapshot()) {
            Ok(payload) => self.events.broadcast(EventKind::SeqProcessorTasksList, payload),
            Err(e) => warn!(error = %e, "Failed to serialize queue state"),
        }
    }
}
