//! Execution context handed to task executors.

use crate::task::TaskKind;
use crate::value::TaskValue;

/// Immutable view of the task being executed.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    /// Position in the run's task list.
    pub index: usize,
    /// Kind tag of the task.
    pub kind: TaskKind,
    /// The task's own param.
    pub param: TaskValue,
}

/// Context passed to every executor alongside its param.
///
/// Action executors additionally receive the element resolved by the
/// preceding perception task, so an interaction can target what the query
/// found without re-resolving it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// The task currently executing.
    pub task: TaskView,
    /// `"element"` field of the immediately preceding task's output;
    /// populated for Action tasks only.
    pub element: Option<TaskValue>,
}

impl TaskContext {
    pub(crate) fn new(task: TaskView) -> Self {
        Self {
            task,
            element: None,
        }
    }

    pub(crate) fn with_element(mut self, element: Option<TaskValue>) -> Self {
        self.element = element;
        self
    }
}
