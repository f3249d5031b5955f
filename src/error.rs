//! Engine error types with fix suggestions.

use thiserror::Error;

/// Trait for errors that provide fix suggestions.
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Errors surfaced by engine operations.
///
/// Task failures are not errors of the engine itself; they are captured on
/// the task record and reflected in the run status.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Flush was called on a run already halted by a failed task.
    #[error("run '{id}' is halted after a task failure; flushing it again would run nothing")]
    RunHalted { id: String },
}

impl FixSuggestion for ExecutorError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ExecutorError::RunHalted { .. } => {
                Some("Inspect dump() for the failed task, then append new tasks to resume the run")
            }
        }
    }
}
