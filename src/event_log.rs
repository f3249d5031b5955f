//! Append-only audit trail of engine transitions.
//!
//! Every status change the engine performs lands here with a monotonic id
//! and a run-relative timestamp, so a halted run can be replayed step by
//! step without diffing dumps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single entry in the run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence id (for ordering).
    pub id: u64,
    /// Milliseconds since the run was constructed.
    pub timestamp_ms: u64,
    /// Transition and its data.
    pub kind: EventKind,
}

/// Engine transitions recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // run level
    FlushStarted {
        queued: usize,
    },
    RunCompleted {
        total_duration_ms: u64,
    },
    RunHalted {
        failed_index: usize,
    },

    // task level
    TaskAppended {
        index: usize,
        task_type: String,
    },
    TaskStarted {
        index: usize,
    },
    TaskSucceeded {
        index: usize,
        duration_ms: u64,
    },
    TaskFailed {
        index: usize,
        error: String,
        duration_ms: u64,
    },
    TaskCancelled {
        index: usize,
    },
}

impl EventKind {
    /// Task index if the event is task-scoped.
    pub fn task_index(&self) -> Option<usize> {
        match self {
            Self::TaskAppended { index, .. }
            | Self::TaskStarted { index }
            | Self::TaskSucceeded { index, .. }
            | Self::TaskFailed { index, .. }
            | Self::TaskCancelled { index } => Some(*index),
            Self::FlushStarted { .. } | Self::RunCompleted { .. } | Self::RunHalted { .. } => None,
        }
    }

    /// Check if this is a run-level event.
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::FlushStarted { .. } | Self::RunCompleted { .. } | Self::RunHalted { .. }
        )
    }
}

/// Thread-safe, append-only log. Clones share the same underlying trail.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    started: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new log (at run construction).
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            started: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a transition; returns its sequence id.
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.started.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    /// All events so far (cloned).
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events scoped to one task index.
    pub fn for_task(&self, index: usize) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.task_index() == Some(index))
            .collect()
    }

    /// Run-level events only.
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize the trail for persistence/debugging.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
