//! Core types for PlanKit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a task within one plan.
///
/// TaskId wraps the string identifier chosen by the plan generator and
/// implements the traits needed for map keys and graph node lookup.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the TaskId and returns the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a task.
///
/// ```text
/// pending -> ready -> running -> completed | failed
/// pending -> skipped            (a dependency failed or the run was cancelled)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies
    Pending,
    /// All dependencies completed, waiting for dispatch
    Ready,
    /// Tool invocation in flight
    Running,
    /// Finished with an accepted result
    Completed,
    /// Finished without a usable result
    Failed,
    /// Never invoked
    Skipped,
}

impl TaskStatus {
    /// Returns true once the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Returns true if dependents of a task in this status can never run.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Skipped)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}
