//! Baton - ordered async task execution engine
//!
//! Runs a heterogeneous sequence of asynchronous tasks — perception
//! ("Insight") queries and interaction ("Action") invocations against a UI —
//! strictly in insertion order, tracking per-task and run-level status,
//! timing, and structured logs. New tasks may be appended even while earlier
//! ones are still executing; the in-flight flush picks them up. At any point
//! the run can be snapshotted into a JSON-safe dump for reporting.

pub mod context;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod task;
pub mod value;

pub use context::{TaskContext, TaskView};
pub use error::{ExecutorError, FixSuggestion};
pub use event_log::{Event, EventKind, EventLog};
pub use executor::{Executor, ExecutorBuilder, RunDump, RunStatus, TaskDump};
pub use task::{ExecutorFn, InsightKind, TaskKind, TaskOutput, TaskSpec, TaskStatus, TaskTiming};
pub use value::{LiveResource, TaskValue};
