//! Lifecycle event stream for plan runs.
//!
//! Every run owns an [`EventEmitter`]. Components push structured events
//! into it; the emitter keeps an append-only journal and fans each event out
//! to live subscribers over a broadcast channel. Emitting never waits on
//! consumers: a slow subscriber lags and drops events, the journal stays
//! complete.
//!
//! # Event Types
//!
//! - `start`: a request was accepted
//! - `phase`: the runtime moved to planning, execution or answering
//! - `info`: free-form progress text
//! - `plan_ready`: the plan passed analysis
//! - `task`: one planned task, emitted once per task
//! - `executing`: a task was dispatched
//! - `complete`: a task completed
//! - `error`: a task failed or the run hit a fatal error
//! - `answer`: a chunk of the final answer
//! - `done`: nothing more will be emitted
//!
//! # Wire Form
//!
//! Transports only need `{"type": ..., "content": ...}`; see
//! [`PlanEvent::to_wire`].

use chrono::{DateTime, Utc};
use plan_core::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Kind of lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Phase,
    Info,
    PlanReady,
    Task,
    Executing,
    Complete,
    Error,
    Answer,
    Done,
}

impl EventKind {
    /// Returns the wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Phase => "phase",
            EventKind::Info => "info",
            EventKind::PlanReady => "plan_ready",
            EventKind::Task => "task",
            EventKind::Executing => "executing",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Answer => "answer",
            EventKind::Done => "done",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanEvent {
    /// Event kind, serialized as `type`
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Human-readable payload
    pub content: String,
    /// Position in the run's stream, starting at 0
    pub seq: u64,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Task the event is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl PlanEvent {
    /// Returns the minimal `{type, content}` record.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "content": self.content,
        })
    }
}

struct EmitterInner {
    run_id: Uuid,
    journal: Mutex<Vec<PlanEvent>>,
    sender: broadcast::Sender<PlanEvent>,
    capacity: usize,
}

/// Ordered, append-only event sink for one run.
///
/// Clones share the same journal and channel.
///
/// # Example
///
/// ```ignore
/// let events = EventEmitter::new(1024);
/// let mut rx = events.subscribe();
/// events.emit(EventKind::Start, "request accepted");
/// let first = rx.recv().await?;
/// ```
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    /// Creates an emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EmitterInner {
                run_id: Uuid::new_v4(),
                journal: Mutex::new(Vec::new()),
                sender,
                capacity,
            }),
        }
    }

    fn journal(&self) -> MutexGuard<'_, Vec<PlanEvent>> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Emits an event not tied to a task.
    pub fn emit(&self, kind: EventKind, content: impl Into<String>) -> PlanEvent {
        self.push(kind, content.into(), None)
    }

    /// Emits an event about one task.
    pub fn emit_for_task(&self, kind: EventKind, task_id: &TaskId, content: impl Into<String>) -> PlanEvent {
        self.push(kind, content.into(), Some(task_id.clone()))
    }

    fn push(&self, kind: EventKind, content: String, task_id: Option<TaskId>) -> PlanEvent {
        let mut journal = self.journal();
        let event = PlanEvent {
            kind,
            content,
            seq: journal.len() as u64,
            timestamp: Utc::now(),
            task_id,
        };
        journal.push(event.clone());
        // No receiver is not an error; the journal is the source of truth.
        let _ = self.inner.sender.send(event.clone());
        event
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.inner.sender.subscribe()
    }

    /// Returns a copy of every event emitted so far.
    pub fn replay(&self) -> Vec<PlanEvent> {
        self.journal().clone()
    }

    /// Returns the kinds of every event emitted so far.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.journal().iter().map(|e| e.kind).collect()
    }

    /// Returns the number of events emitted.
    pub fn len(&self) -> usize {
        self.journal().len()
    }

    /// Returns true if nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.journal().is_empty()
    }

    /// Returns the run identifier.
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Returns the configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("run_id", &self.inner.run_id)
            .field("events", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
