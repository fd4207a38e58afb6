//! Execution report returned by the executor.
//!
//! The report mirrors every task's state at the end of a run and is what
//! answer-generation and transport collaborators consume. It is produced
//! even when tasks fail or the run is cancelled.

use chrono::{DateTime, Utc};
use plan_core::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

/// Final state of one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task identifier
    pub task_id: TaskId,
    /// Human-readable intent
    pub description: String,
    /// Tool name
    pub tool: String,
    /// Terminal status
    pub status: TaskStatus,
    /// Accepted result, present only when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error text, present only when failed or skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Arguments after reference substitution, if resolution succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_arguments: Option<Value>,
    /// Task whose result was copied, for aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<TaskId>,
    /// True if the analyzer created this task
    #[serde(default)]
    pub synthesized: bool,
    /// Number of tool invocations made
    #[serde(default)]
    pub attempts: u32,
    /// When the task started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached its terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskReport {
    /// Returns the wall time spent on the task, if it ran.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Outcome of one plan run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Per-task reports in plan declaration order
    pub tasks: Vec<TaskReport>,
    /// Final result store contents
    pub results: BTreeMap<TaskId, Value>,
    /// True if the caller cancelled the run
    pub cancelled: bool,
    /// True if the run timeout fired
    pub timed_out: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Returns the report for a task.
    pub fn task(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.task_id == id)
    }

    /// Returns the status of a task.
    pub fn status_of(&self, id: impl Into<TaskId>) -> Option<TaskStatus> {
        let id = id.into();
        self.task(&id).map(|t| t.status)
    }

    /// Returns the stored result of a task.
    pub fn result_of(&self, id: impl Into<TaskId>) -> Option<&Value> {
        self.results.get(&id.into())
    }

    /// Counts tasks with the given status.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Returns true if every task completed.
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Returns true if every task reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Renders the plain-text summary handed to answer generation.
    ///
    /// # Example
    ///
    /// ```text
    /// task t1 (add numbers):
    ///   status: completed
    ///   result: 8
    /// ```
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        for task in &self.tasks {
            let _ = writeln!(out, "task {} ({}):", task.task_id, task.description);
            let _ = writeln!(out, "  status: {}", task.status);
            if let Some(result) = &task.result {
                let text = match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(out, "  result: {}", text);
            }
            if let Some(error) = &task.error {
                let _ = writeln!(out, "  error: {}", error);
            }
        }
        out
    }

    /// Returns the wall time of the run.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
