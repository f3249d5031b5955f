//! Task model: kinds, statuses, timing, and the task-spec contract.
//!
//! A task is one unit of asynchronous work. The caller supplies a
//! [`TaskSpec`] — a kind tag, an opaque param, and an async executor — and
//! the engine tracks the resulting record through
//! `pending → running → success | fail`, or straight to `cancelled` when an
//! earlier task fails.

use std::fmt;
use std::future::Future;

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::TaskContext;
use crate::value::TaskValue;

/// Boxed asynchronous executor supplied by the caller.
///
/// Invoked at most once, with the task's param and an execution context.
pub type ExecutorFn =
    Box<dyn FnOnce(TaskValue, TaskContext) -> BoxFuture<'static, Result<TaskOutput>> + Send>;

/// Perception query subkind carried by Insight tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    /// Resolve an element on the UI.
    Find,
    /// Extract structured data from the UI.
    Extract,
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightKind::Find => write!(f, "find"),
            InsightKind::Extract => write!(f, "extract"),
        }
    }
}

/// Task kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Perception query against the UI.
    Insight(InsightKind),
    /// Interaction invoked against the UI.
    Action,
}

impl TaskKind {
    /// Dump tag, e.g. `"Insight"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::Insight(_) => "Insight",
            TaskKind::Action => "Action",
        }
    }

    /// Dump subtype tag, carried by Insight tasks only.
    pub fn sub_type(&self) -> Option<&'static str> {
        match self {
            TaskKind::Insight(InsightKind::Find) => Some("find"),
            TaskKind::Insight(InsightKind::Extract) => Some("extract"),
            TaskKind::Action => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_type() {
            Some(sub) => write!(f, "{}:{}", self.type_name(), sub),
            None => write!(f, "{}", self.type_name()),
        }
    }
}

/// Per-task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, not yet started.
    Pending,
    /// Executor currently awaited.
    Running,
    /// Executor returned; output recorded.
    Success,
    /// Executor failed; error recorded.
    Fail,
    /// Skipped because an earlier task in the run failed.
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Fail | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Fail => write!(f, "fail"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Wall-clock bounds of a task's running window, epoch milliseconds.
///
/// `start` is set at `pending → running`, `end` when the task leaves
/// `running`. Cancelled tasks never get timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl TaskTiming {
    /// Whether the task ever started running.
    pub fn is_set(&self) -> bool {
        self.start.is_some()
    }

    pub(crate) fn mark_start(&mut self) {
        self.start = Some(now_ms());
    }

    pub(crate) fn mark_end(&mut self) {
        self.end = Some(now_ms());
    }
}

/// Epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Result returned by a task executor: the output payload plus an optional
/// structured log record (e.g. a perception dump for report rendering).
#[derive(Debug)]
pub struct TaskOutput {
    /// Output payload, recorded on the task as its `output`.
    pub value: TaskValue,
    /// Structured log record, recorded on the task as its `log`.
    pub log: Option<Value>,
}

impl TaskOutput {
    pub fn new(value: impl Into<TaskValue>) -> Self {
        Self {
            value: value.into(),
            log: None,
        }
    }

    /// Attach a structured log record.
    pub fn with_log(mut self, log: Value) -> Self {
        self.log = Some(log);
        self
    }
}

/// Spec for one unit of work, as accepted by append.
pub struct TaskSpec {
    pub(crate) kind: TaskKind,
    pub(crate) param: TaskValue,
    pub(crate) executor: ExecutorFn,
}

impl TaskSpec {
    /// Generic constructor; prefer the per-kind helpers below.
    pub fn new<F, Fut>(kind: TaskKind, param: impl Into<TaskValue>, executor: F) -> Self
    where
        F: FnOnce(TaskValue, TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self {
            kind,
            param: param.into(),
            executor: Box::new(move |param, context| Box::pin(executor(param, context))),
        }
    }

    /// Perception query that resolves an element.
    pub fn insight_find<F, Fut>(param: impl Into<TaskValue>, executor: F) -> Self
    where
        F: FnOnce(TaskValue, TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self::new(TaskKind::Insight(InsightKind::Find), param, executor)
    }

    /// Perception query that extracts structured data.
    pub fn insight_extract<F, Fut>(param: impl Into<TaskValue>, executor: F) -> Self
    where
        F: FnOnce(TaskValue, TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self::new(TaskKind::Insight(InsightKind::Extract), param, executor)
    }

    /// UI interaction, handed the element resolved by the preceding query.
    pub fn action<F, Fut>(param: impl Into<TaskValue>, executor: F) -> Self
    where
        F: FnOnce(TaskValue, TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self::new(TaskKind::Action, param, executor)
    }

    /// Kind tag of the task this spec describes.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

/// One unit of work tracked by the engine.
///
/// `output` and `error` are mutually exclusive; each is populated exactly
/// once, at the task's terminal transition.
pub(crate) struct Task {
    pub(crate) kind: TaskKind,
    pub(crate) param: TaskValue,
    pub(crate) status: TaskStatus,
    pub(crate) output: Option<TaskValue>,
    pub(crate) log: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) timing: TaskTiming,
    /// Taken when the task starts running; cleared on cancellation.
    pub(crate) executor: Option<ExecutorFn>,
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec) -> Self {
        Self {
            kind: spec.kind,
            param: spec.param,
            status: TaskStatus::Pending,
            output: None,
            log: None,
            error: None,
            timing: TaskTiming::default(),
            executor: Some(spec.executor),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}
