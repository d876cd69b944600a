//! Per-file task model for the processing pipeline.
//!
//! A job expands into one task per input file. Tasks move through a small
//! state machine (pending -> running -> succeeded | failed) and terminal
//! states are never left.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of a single per-file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be dispatched.
    Pending,
    /// Task is currently being processed.
    Running,
    /// Task finished and its output was written.
    Succeeded,
    /// Task failed; the rest of the job continues.
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of per-file work within a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Position of the input file in the job payload (0-based).
    pub index: usize,
    /// Path to the input audio file.
    pub input: PathBuf,
    /// Derived output path (None for analysis-only work).
    pub output: Option<PathBuf>,
    /// Current status of the task.
    pub status: TaskStatus,
    /// Recorded failure reason once the task has failed.
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(index: usize, input: PathBuf, output: Option<PathBuf>) -> Self {
        Self {
            index,
            input,
            output,
            status: TaskStatus::Pending,
            error: None,
        }
    }

    /// Mark the task as running. Has no effect on terminal tasks.
    pub fn start(&mut self) {
        if !self.is_terminal() {
            self.status = TaskStatus::Running;
        }
    }

    /// Mark the task as succeeded. Has no effect on terminal tasks.
    pub fn succeed(&mut self) {
        if !self.is_terminal() {
            self.status = TaskStatus::Succeeded;
        }
    }

    /// Mark the task as failed with a reason. Has no effect on terminal tasks.
    pub fn fail(&mut self, reason: &str) {
        if !self.is_terminal() {
            self.status = TaskStatus::Failed;
            self.error = Some(reason.to_string());
        }
    }

    /// Check if the task is in a terminal state (succeeded or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// The output path if the task succeeded, None otherwise.
    ///
    /// This is the value reported in the completion event's `outputs`
    /// array for this task's position.
    pub fn reported_output(&self) -> Option<PathBuf> {
        if self.status == TaskStatus::Succeeded {
            self.output.clone()
        } else {
            None
        }
    }
}
