//! The task execution engine.
//!
//! An [`Executor`] owns an ordered task list and drives each task's executor
//! to completion in insertion order. New tasks may be appended while a flush
//! is running; the in-flight pass picks them up without a second flush call.
//! At any point the run can be snapshotted into a JSON-safe [`RunDump`].
//!
//! ## Concurrency
//!
//! The handle is cheap to clone; clones share the same run. Tasks execute
//! one at a time, strictly in list order — suspension happens only inside an
//! awaited executor, and no lock is held across an await. A
//! `tokio::sync::Mutex` gate serializes drive loops, so a second concurrent
//! `flush` awaits the in-flight pass and observes its completion instead of
//! re-running tasks. Only the drive loop transitions a task out of
//! `pending`; only `append` extends the tail.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::context::{TaskContext, TaskView};
use crate::error::ExecutorError;
use crate::event_log::{EventKind, EventLog};
use crate::task::{now_ms, Task, TaskKind, TaskSpec, TaskStatus, TaskTiming};
use crate::value::TaskValue;

/// Run-level lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No task has ever been added.
    Init,
    /// Work is queued and waiting for a flush.
    Pending,
    /// A flush is driving the task list.
    Running,
    /// Every queued task succeeded.
    Completed,
    /// A task failed; the run is halted until new work is appended.
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Init => write!(f, "init"),
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

struct RunState {
    status: RunStatus,
    tasks: Vec<Task>,
}

struct Inner {
    id: String,
    description: Option<String>,
    state: RwLock<RunState>,
    /// Serializes drive loops: at most one flush advances the run at a time.
    flush_gate: Mutex<()>,
    events: EventLog,
}

/// Ordered task execution engine. Cheap to clone; clones share the run.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

/// Builder for a run with a description and initial tasks.
pub struct ExecutorBuilder {
    id: String,
    description: Option<String>,
    specs: Vec<TaskSpec>,
}

impl ExecutorBuilder {
    /// Human-readable description carried into every dump.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Queue one initial task.
    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Queue several initial tasks, in order.
    pub fn tasks(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn build(self) -> Executor {
        let events = EventLog::new();
        let tasks: Vec<Task> = self.specs.into_iter().map(Task::from_spec).collect();
        for (index, task) in tasks.iter().enumerate() {
            events.emit(EventKind::TaskAppended {
                index,
                task_type: task.kind.to_string(),
            });
        }
        let status = if tasks.is_empty() {
            RunStatus::Init
        } else {
            RunStatus::Pending
        };
        Executor {
            inner: Arc::new(Inner {
                id: self.id,
                description: self.description,
                state: RwLock::new(RunState { status, tasks }),
                flush_gate: Mutex::new(()),
                events,
            }),
        }
    }
}

enum DriveOutcome {
    /// Queue drained with no failure; carries the last task's output.
    Completed(Option<TaskValue>),
    /// A task failed; the rest of the queue was cancelled.
    Halted,
}

impl Executor {
    /// New empty run in `init` status.
    pub fn new(id: impl Into<String>) -> Self {
        Self::builder(id).build()
    }

    /// Start building a run with a description and initial tasks.
    pub fn builder(id: impl Into<String>) -> ExecutorBuilder {
        ExecutorBuilder {
            id: id.into(),
            description: None,
            specs: Vec::new(),
        }
    }

    /// Caller-supplied run id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Caller-supplied run description.
    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    /// Current run-level status.
    pub fn status(&self) -> RunStatus {
        self.inner.state.read().status
    }

    /// Number of tasks ever queued, including finished ones.
    pub fn task_count(&self) -> usize {
        self.inner.state.read().tasks.len()
    }

    /// Audit trail of engine transitions.
    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    /// Queue one more task at the tail of the run.
    ///
    /// Always accepted. Appending to a completed or halted run re-opens it
    /// as `pending`; appending while a flush is running hands the task to
    /// the in-flight pass.
    pub fn append(&self, spec: TaskSpec) {
        let task_type = spec.kind.to_string();
        let index = {
            let mut state = self.inner.state.write();
            let index = state.tasks.len();
            state.tasks.push(Task::from_spec(spec));
            match state.status {
                RunStatus::Init | RunStatus::Completed | RunStatus::Error => {
                    state.status = RunStatus::Pending;
                }
                // the in-flight pass re-checks the tail and picks this up
                RunStatus::Pending | RunStatus::Running => {}
            }
            index
        };
        self.inner.events.emit(EventKind::TaskAppended { index, task_type });
        debug!(run_id = %self.inner.id, index, "task appended");
    }

    /// Drive every pending task to completion, in insertion order.
    ///
    /// Resolves with the final task's output once the queue drains with no
    /// failure, or `None` when a task failed — the run status and [`dump`]
    /// carry the diagnosis. Flushing a run still halted in `error` status
    /// fails fast with [`ExecutorError::RunHalted`].
    ///
    /// [`dump`]: Executor::dump
    #[instrument(skip(self), fields(run_id = %self.inner.id))]
    pub async fn flush(&self) -> Result<Option<TaskValue>, ExecutorError> {
        if self.status() == RunStatus::Error {
            return Err(ExecutorError::RunHalted {
                id: self.inner.id.clone(),
            });
        }

        let _gate = self.inner.flush_gate.lock().await;

        // Re-check under the gate: a concurrent flush may have halted the
        // run while this call was waiting.
        let queued = {
            let mut state = self.inner.state.write();
            match state.status {
                RunStatus::Error => {
                    return Err(ExecutorError::RunHalted {
                        id: self.inner.id.clone(),
                    })
                }
                RunStatus::Init => return Ok(None),
                _ => {}
            }
            state.status = RunStatus::Running;
            state
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count()
        };
        self.inner.events.emit(EventKind::FlushStarted { queued });
        debug!(queued, "flush started");

        match self.drive().await {
            DriveOutcome::Completed(last_output) => Ok(last_output),
            DriveOutcome::Halted => Ok(None),
        }
    }

    /// The drive loop. Claims the first pending task under the state lock on
    /// every iteration, so tasks appended mid-pass are executed in the same
    /// pass, and the completion decision cannot race an append.
    async fn drive(&self) -> DriveOutcome {
        let pass_started = Instant::now();
        loop {
            let (index, executor, param, context) = {
                let mut state = self.inner.state.write();
                let next = state
                    .tasks
                    .iter()
                    .position(|t| t.status == TaskStatus::Pending);
                let Some(index) = next else {
                    state.status = RunStatus::Completed;
                    let last_output = state.tasks.last().and_then(|t| t.output.clone());
                    drop(state);
                    self.inner.events.emit(EventKind::RunCompleted {
                        total_duration_ms: pass_started.elapsed().as_millis() as u64,
                    });
                    debug!("run completed");
                    return DriveOutcome::Completed(last_output);
                };

                // the preceding task's output feeds the Action context
                let element = match state.tasks[index].kind {
                    TaskKind::Action if index > 0 => state.tasks[index - 1]
                        .output
                        .as_ref()
                        .and_then(|output| output.get("element")),
                    _ => None,
                };

                let task = &mut state.tasks[index];
                task.status = TaskStatus::Running;
                task.timing.mark_start();
                let executor = task
                    .executor
                    .take()
                    .expect("pending task holds its executor");
                let param = task.param.clone();
                let context = TaskContext::new(TaskView {
                    index,
                    kind: task.kind,
                    param: task.param.clone(),
                })
                .with_element(element);
                (index, executor, param, context)
            };

            self.inner.events.emit(EventKind::TaskStarted { index });
            debug!(index, "task started");
            let task_started = Instant::now();

            match executor(param, context).await {
                Ok(output) => {
                    {
                        let mut state = self.inner.state.write();
                        let task = &mut state.tasks[index];
                        task.output = Some(output.value);
                        task.log = output.log;
                        task.status = TaskStatus::Success;
                        task.timing.mark_end();
                    }
                    self.inner.events.emit(EventKind::TaskSucceeded {
                        index,
                        duration_ms: task_started.elapsed().as_millis() as u64,
                    });
                    debug!(index, "task succeeded");
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(index, %error, "task failed; cancelling the rest of the run");
                    let cancelled = {
                        let mut state = self.inner.state.write();
                        let task = &mut state.tasks[index];
                        task.error = Some(error.clone());
                        task.status = TaskStatus::Fail;
                        task.timing.mark_end();

                        let mut cancelled = Vec::new();
                        for (later_index, later) in
                            state.tasks.iter_mut().enumerate().skip(index + 1)
                        {
                            if later.status == TaskStatus::Pending {
                                later.status = TaskStatus::Cancelled;
                                later.executor = None;
                                cancelled.push(later_index);
                            }
                        }
                        state.status = RunStatus::Error;
                        cancelled
                    };
                    self.inner.events.emit(EventKind::TaskFailed {
                        index,
                        error,
                        duration_ms: task_started.elapsed().as_millis() as u64,
                    });
                    for cancelled_index in cancelled {
                        self.inner.events.emit(EventKind::TaskCancelled {
                            index: cancelled_index,
                        });
                    }
                    self.inner
                        .events
                        .emit(EventKind::RunHalted { failed_index: index });
                    return DriveOutcome::Halted;
                }
            }
        }
    }

    /// Point-in-time snapshot of the whole run.
    ///
    /// Read-only and safe at any status, including mid-run; live resources
    /// in params/outputs are redacted to placeholder strings.
    pub fn dump(&self) -> RunDump {
        let state = self.inner.state.read();
        let tasks = state
            .tasks
            .iter()
            .map(|task| TaskDump {
                task_type: task.kind.type_name().to_string(),
                sub_type: task.kind.sub_type().map(str::to_string),
                param: task.param.to_dump(),
                status: task.status,
                output: task.output.as_ref().map(TaskValue::to_dump),
                log: task.log.clone(),
                error: task.error.clone(),
                timing: task.timing.is_set().then_some(task.timing),
            })
            .collect();
        RunDump {
            id: self.inner.id.clone(),
            description: self.inner.description.clone(),
            status: state.status,
            log_time: now_ms(),
            tasks,
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// Serializable snapshot of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDump {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: RunStatus,
    /// Wall-clock time the snapshot was taken, epoch milliseconds.
    pub log_time: i64,
    pub tasks: Vec<TaskDump>,
}

/// One task entry in a run dump. Live resources in `param`/`output` are
/// already redacted to placeholder strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDump {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub param: Value,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TaskTiming>,
}
