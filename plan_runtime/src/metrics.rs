//! Run metrics for tool invocations, reuse and task outcomes.

use plan_agent::ExecutionReport;
use plan_core::TaskStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of metric being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A tool was invoked
    ToolInvocation,
    /// A task was answered from an equivalent task's result
    ReuseHit,
    /// A task got its remediation attempt
    Remediation,
    /// A task completed
    TaskCompleted,
    /// A task failed
    TaskFailed,
    /// A task was skipped
    TaskSkipped,
}

/// Metrics collector shared across runs.
///
/// Clones share the same counters.
#[derive(Clone, Debug)]
pub struct RunMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Counts by kind
    counts: [AtomicU64; 6],
    /// Total tool time (nanoseconds)
    tool_time_ns: AtomicU64,
    /// Number of runs recorded
    runs: AtomicU64,
}

impl RunMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counts: Default::default(),
                tool_time_ns: AtomicU64::new(0),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Records a metric occurrence.
    pub fn record(&self, kind: MetricKind) {
        self.record_many(kind, 1);
    }

    fn record_many(&self, kind: MetricKind, n: u64) {
        self.inner.counts[kind as usize].fetch_add(n, Ordering::Relaxed);
    }

    /// Records time spent inside a tool.
    pub fn record_tool_time(&self, duration: Duration) {
        self.inner
            .tool_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Folds a finished run into the counters.
    pub fn record_report(&self, report: &ExecutionReport) {
        self.inner.runs.fetch_add(1, Ordering::Relaxed);
        for task in &report.tasks {
            if task.alias_of.is_some() && task.status == TaskStatus::Completed {
                self.record(MetricKind::ReuseHit);
            }
            self.record_many(MetricKind::ToolInvocation, u64::from(task.attempts));
            if task.attempts > 1 {
                self.record(MetricKind::Remediation);
            }
            match task.status {
                TaskStatus::Completed => self.record(MetricKind::TaskCompleted),
                TaskStatus::Failed => self.record(MetricKind::TaskFailed),
                TaskStatus::Skipped => self.record(MetricKind::TaskSkipped),
                _ => {}
            }
            if task.alias_of.is_none() {
                if let Some(ms) = task.duration_ms() {
                    self.record_tool_time(Duration::from_millis(ms.max(0) as u64));
                }
            }
        }
    }

    /// Gets the count for a specific metric.
    pub fn count(&self, kind: MetricKind) -> u64 {
        self.inner.counts[kind as usize].load(Ordering::Relaxed)
    }

    /// Gets the total tool time.
    pub fn tool_time(&self) -> Duration {
        Duration::from_nanos(self.inner.tool_time_ns.load(Ordering::Relaxed))
    }

    /// Gets the share of result lookups served by reuse (0.0 to 1.0).
    pub fn reuse_rate(&self) -> f64 {
        let hits = self.count(MetricKind::ReuseHit);
        let total = hits + self.count(MetricKind::ToolInvocation);

        if total == 0 {
            return 0.0;
        }

        hits as f64 / total as f64
    }

    /// Gets all metrics as a summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            runs: self.inner.runs.load(Ordering::Relaxed),
            tool_invocations: self.count(MetricKind::ToolInvocation),
            reuse_hits: self.count(MetricKind::ReuseHit),
            remediations: self.count(MetricKind::Remediation),
            completed: self.count(MetricKind::TaskCompleted),
            failed: self.count(MetricKind::TaskFailed),
            skipped: self.count(MetricKind::TaskSkipped),
            tool_time: self.tool_time(),
            reuse_rate: self.reuse_rate(),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        for count in &self.inner.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.inner.tool_time_ns.store(0, Ordering::Relaxed);
        self.inner.runs.store(0, Ordering::Relaxed);
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of run metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Number of runs recorded
    pub runs: u64,
    /// Number of tool invocations, remediation attempts included
    pub tool_invocations: u64,
    /// Number of tasks resolved by copying an equivalent result
    pub reuse_hits: u64,
    /// Number of tasks that used their remediation attempt
    pub remediations: u64,
    /// Completed tasks
    pub completed: u64,
    /// Failed tasks
    pub failed: u64,
    /// Skipped tasks
    pub skipped: u64,
    /// Total time spent in tools
    pub tool_time: Duration,
    /// Reuse rate (0.0 to 1.0)
    pub reuse_rate: f64,
}
