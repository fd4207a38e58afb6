//! Timeout configuration for tasks and whole runs.
//!
//! A task timeout turns a hung invocation into a failed task without
//! blocking sibling branches. A run timeout is optional; when it fires the
//! run is cancelled and unfinished tasks are skipped.

use std::time::Duration;

/// Error types for timeout operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// Task exceeded its time limit
    #[error("Task '{task_id}' exceeded timeout limit of {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },
    /// Run exceeded its time limit
    #[error("Run exceeded timeout limit of {timeout:?}")]
    RunTimeout { timeout: Duration },
}

/// Time limit for a single tool invocation.
///
/// # Example
///
/// ```
/// use plan_agent::workflow::timeout::TaskTimeout;
/// use std::time::Duration;
///
/// let timeout = TaskTimeout::from_secs(30);
/// assert_eq!(timeout.duration(), Duration::from_secs(30));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskTimeout(Duration);

impl TaskTimeout {
    /// Creates a new TaskTimeout with the specified duration.
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates a TaskTimeout from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a TaskTimeout from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for TaskTimeout {
    /// Default timeout is 30 seconds.
    fn default() -> Self {
        Self(Duration::from_secs(30))
    }
}

/// Time limit for a whole plan run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunTimeout(Duration);

impl RunTimeout {
    /// Creates a new RunTimeout with the specified duration.
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates a RunTimeout from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a RunTimeout from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        self.0
    }
}

/// Timeout limits applied by the executor.
///
/// Both limits are optional. By default tasks get 30 seconds and the run
/// has no limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Per-invocation limit
    pub task_timeout: Option<TaskTimeout>,
    /// Whole-run limit
    pub run_timeout: Option<RunTimeout>,
}

impl TimeoutConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration with no limits at all.
    pub fn no_timeouts() -> Self {
        Self {
            task_timeout: None,
            run_timeout: None,
        }
    }

    /// Sets the per-task limit.
    pub fn with_task_timeout(mut self, timeout: TaskTimeout) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Sets the whole-run limit.
    pub fn with_run_timeout(mut self, timeout: RunTimeout) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_timeout: Some(TaskTimeout::default()),
            run_timeout: None,
        }
    }
}
