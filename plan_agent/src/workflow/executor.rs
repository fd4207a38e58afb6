//! Concurrent plan executor.
//!
//! Walks a validated [`PlanGraph`] and drives every task through
//!
//! ```text
//! pending -> ready -> running -> completed | failed
//! pending -> skipped
//! ```
//!
//! A task becomes ready only once each of its dependencies has completed
//! and its result is in the [`ResultStore`]. Ready tasks are dispatched in
//! declaration order, up to `max_concurrency` at a time. Aliases are resolved
//! by copying the canonical task's result without invoking anything. A
//! failure never aborts independent branches; it skips everything that
//! depends on the failed task.
//!
//! The run always ends with a full [`ExecutionReport`], including after
//! cancellation or a run timeout.

use crate::events::{EventEmitter, EventKind};
use crate::workflow::cancellation::{CancellationToken, CancellationTokenSource};
use crate::workflow::dag::PlanGraph;
use crate::workflow::reflection::{DefaultReflector, Reflector, Remediation, Step, TaskIntent};
use crate::workflow::report::{ExecutionReport, TaskReport};
use crate::workflow::resolver::ReferenceResolver;
use crate::workflow::store::ResultStore;
use crate::workflow::task::{PlanTask, TaskError};
use crate::workflow::timeout::{TaskTimeout, TimeoutConfig, TimeoutError};
use crate::workflow::tools::{ToolCall, ToolError, ToolInvoker, ToolRegistry};
use chrono::{DateTime, Utc};
use plan_core::{TaskId, TaskStatus};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Default number of tool invocations in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Executes one plan graph.
///
/// # Example
///
/// ```ignore
/// let graph = DependencyAnalyzer::new().analyze(&plan)?;
/// let executor = PlanExecutor::new(graph)
///     .with_tool_invoker(Arc::new(registry))
///     .with_max_concurrency(2);
/// let report = executor.execute().await;
/// assert!(report.all_terminal());
/// ```
pub struct PlanExecutor {
    graph: Arc<PlanGraph>,
    invoker: Arc<dyn ToolInvoker>,
    reflector: Arc<dyn Reflector>,
    timeout_config: TimeoutConfig,
    cancellation_source: Option<CancellationTokenSource>,
    events: EventEmitter,
    max_concurrency: usize,
}

impl PlanExecutor {
    /// Creates an executor with an empty tool registry and default settings.
    pub fn new(graph: PlanGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            invoker: Arc::new(ToolRegistry::new()),
            reflector: Arc::new(DefaultReflector),
            timeout_config: TimeoutConfig::default(),
            cancellation_source: None,
            events: EventEmitter::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Sets the tool-invocation collaborator.
    pub fn with_tool_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Sets the reflection policy.
    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    /// Sets task and run time limits.
    pub fn with_timeout_config(mut self, config: TimeoutConfig) -> Self {
        self.timeout_config = config;
        self
    }

    /// Lets the caller cancel the run through the given source.
    pub fn with_cancellation_source(mut self, source: CancellationTokenSource) -> Self {
        self.cancellation_source = Some(source);
        self
    }

    /// Sends lifecycle events to the given emitter.
    pub fn with_event_emitter(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Limits the number of concurrent invocations; 1 runs tasks one by one
    /// in declaration order.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Returns the plan graph.
    pub fn graph(&self) -> &PlanGraph {
        &self.graph
    }

    /// Returns the event emitter.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Returns the cancellation token, if a source was configured.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.cancellation_source.as_ref().map(|s| s.token())
    }

    /// Cancels the run, if a source was configured.
    pub fn cancel(&self) {
        if let Some(source) = &self.cancellation_source {
            source.cancel();
        }
    }

    /// Runs the plan to completion and returns the report.
    ///
    /// A fresh result store is created for each call.
    pub async fn execute(&self) -> ExecutionReport {
        let span = info_span!("plan_run", run_id = %self.events.run_id(), tasks = self.graph.len());
        Run::new(self).drive().instrument(span).await
    }
}

#[derive(Clone, Debug, Default)]
struct TaskState {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
    resolved_arguments: Option<Value>,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Outcome of one spawned task invocation.
struct TaskRun {
    outcome: Result<Value, TaskError>,
    attempts: u32,
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Mutable state of a single execution.
struct Run<'a> {
    executor: &'a PlanExecutor,
    store: ResultStore,
    resolver: ReferenceResolver,
    states: HashMap<TaskId, TaskState>,
    in_flight: JoinSet<(TaskId, TaskRun)>,
    started_at: DateTime<Utc>,
    cancelled: bool,
    timed_out: bool,
}

impl<'a> Run<'a> {
    fn new(executor: &'a PlanExecutor) -> Self {
        let store = ResultStore::new();
        let resolver = ReferenceResolver::new(store.clone(), executor.graph.task_ids());
        let states = executor
            .graph
            .task_ids()
            .into_iter()
            .map(|id| (id, TaskState::default()))
            .collect();

        Self {
            executor,
            store,
            resolver,
            states,
            in_flight: JoinSet::new(),
            started_at: Utc::now(),
            cancelled: false,
            timed_out: false,
        }
    }

    async fn drive(mut self) -> ExecutionReport {
        info!("plan execution started");
        let token = self.executor.cancellation_token();
        let deadline = self
            .executor
            .timeout_config
            .run_timeout
            .map(|t| Instant::now() + t.duration());

        loop {
            if token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
                self.interrupt(Interrupt::Cancelled).await;
                break;
            }

            self.promote_ready();
            self.dispatch_ready();

            if self.in_flight.is_empty() {
                // aliases completed during dispatch may have unblocked more work
                if self.has_status(TaskStatus::Ready) || self.promote_ready() > 0 {
                    continue;
                }
                break;
            }

            let cancelled = async {
                match &token {
                    Some(t) => t.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            };
            let timed_out = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancelled => {
                    self.interrupt(Interrupt::Cancelled).await;
                    break;
                }
                _ = timed_out => {
                    self.interrupt(Interrupt::TimedOut).await;
                    break;
                }
                joined = self.in_flight.join_next() => {
                    match joined {
                        Some(Ok((task_id, run))) => self.apply(&task_id, run),
                        Some(Err(e)) => warn!(error = %e, "invocation task ended abnormally"),
                        None => {}
                    }
                }
            }
        }

        self.finish()
    }

    fn has_status(&self, status: TaskStatus) -> bool {
        self.states.values().any(|s| s.status == status)
    }

    fn status(&self, id: &TaskId) -> TaskStatus {
        self.states.get(id).map(|s| s.status).unwrap_or_default()
    }

    /// Moves pending tasks whose dependencies all completed to ready.
    ///
    /// Returns the number of tasks promoted.
    fn promote_ready(&mut self) -> usize {
        let graph = Arc::clone(&self.executor.graph);
        let mut promoted = 0;
        for task in graph.tasks() {
            if self.status(&task.id) != TaskStatus::Pending {
                continue;
            }
            let satisfied = task
                .dependencies
                .iter()
                .all(|dep| self.status(dep) == TaskStatus::Completed && self.store.contains(dep));
            if satisfied {
                if let Some(state) = self.states.get_mut(&task.id) {
                    state.status = TaskStatus::Ready;
                }
                promoted += 1;
                debug!(task_id = %task.id, "task ready");
                self.executor
                    .events
                    .emit_for_task(EventKind::Info, &task.id, format!("task {} ready", task.id));
            }
        }
        promoted
    }

    /// Starts ready tasks in declaration order while capacity allows.
    fn dispatch_ready(&mut self) {
        let graph = Arc::clone(&self.executor.graph);
        for task in graph.tasks() {
            if self.status(&task.id) != TaskStatus::Ready {
                continue;
            }
            if let Some(canonical) = &task.alias_of {
                self.complete_alias(task, canonical);
                continue;
            }
            if self.in_flight.len() >= self.executor.max_concurrency {
                break;
            }
            self.start(task);
        }
    }

    fn complete_alias(&mut self, task: &PlanTask, canonical: &TaskId) {
        let now = Utc::now();
        match self.store.get(canonical) {
            Some(value) => {
                info!(task_id = %task.id, canonical = %canonical, "reusing result of equivalent task");
                self.executor.events.emit_for_task(
                    EventKind::Info,
                    &task.id,
                    format!("task {} reuses the result of {}", task.id, canonical),
                );
                if let Some(state) = self.states.get_mut(&task.id) {
                    state.started_at = Some(now);
                }
                self.complete(&task.id, value);
            }
            None => {
                // unreachable while aliases depend on their canonical task
                let error = TaskError::Reference(plan_core::ReferenceError::NotCompleted {
                    task_id: canonical.clone(),
                    field: None,
                });
                self.fail(&task.id, error);
            }
        }
    }

    fn start(&mut self, task: &PlanTask) {
        let arguments = match self.resolver.resolve_arguments(&task.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "argument resolution failed");
                self.fail(&task.id, TaskError::Reference(e));
                return;
            }
        };

        if let Some(state) = self.states.get_mut(&task.id) {
            state.status = TaskStatus::Running;
            state.started_at = Some(Utc::now());
            state.resolved_arguments = Some(Value::Object(arguments.clone()));
        }

        info!(task_id = %task.id, tool = %task.tool, "dispatching task");
        self.executor.events.emit_for_task(
            EventKind::Executing,
            &task.id,
            format!("{} {}", task.tool, Value::Object(arguments.clone())),
        );

        let invocation = Invocation {
            task_id: task.id.clone(),
            description: task.description.clone(),
            tool: task.tool.clone(),
            arguments,
            invoker: Arc::clone(&self.executor.invoker),
            reflector: Arc::clone(&self.executor.reflector),
            task_timeout: self.executor.timeout_config.task_timeout,
            events: self.executor.events.clone(),
        };
        let span = info_span!("task", task_id = %task.id, tool = %task.tool);
        let task_id = task.id.clone();

        self.in_flight.spawn(async move {
            let mut handle = AbortOnDrop(tokio::spawn(invocation.run().instrument(span)));
            let run = match (&mut handle.0).await {
                Ok(run) => run,
                Err(e) => TaskRun {
                    outcome: Err(TaskError::Panicked(e.to_string())),
                    attempts: 1,
                },
            };
            (task_id, run)
        });
    }

    fn apply(&mut self, task_id: &TaskId, run: TaskRun) {
        if let Some(state) = self.states.get_mut(task_id) {
            state.attempts = run.attempts;
        }
        match run.outcome {
            Ok(value) => self.complete(task_id, value),
            Err(error) => self.fail(task_id, error),
        }
    }

    /// Writes the result to the store, then marks the task completed.
    fn complete(&mut self, task_id: &TaskId, value: Value) {
        if let Err(e) = self.store.record(task_id, value.clone()) {
            warn!(task_id = %task_id, error = %e, "result already recorded");
        }
        if let Some(state) = self.states.get_mut(task_id) {
            state.status = TaskStatus::Completed;
            state.result = Some(value.clone());
            state.finished_at = Some(Utc::now());
        }
        info!(task_id = %task_id, "task completed");
        self.executor
            .events
            .emit_for_task(EventKind::Complete, task_id, render(&value));
    }

    fn fail(&mut self, task_id: &TaskId, error: TaskError) {
        let message = error.to_string();
        if let Some(state) = self.states.get_mut(task_id) {
            state.status = TaskStatus::Failed;
            state.error = Some(message.clone());
            state.finished_at = Some(Utc::now());
        }
        warn!(task_id = %task_id, error = %message, "task failed");
        self.executor
            .events
            .emit_for_task(EventKind::Error, task_id, format!("task {} failed: {}", task_id, message));
        self.skip_dependents(task_id);
    }

    /// Skips every task downstream of a failed task.
    fn skip_dependents(&mut self, task_id: &TaskId) {
        let graph = Arc::clone(&self.executor.graph);
        let downstream = graph.transitive_dependents(task_id);
        for task in graph.tasks().filter(|t| downstream.contains(&t.id)) {
            let reason = format!("dependency {} did not complete", task_id);
            self.skip(&task.id, reason);
        }
    }

    fn skip(&mut self, task_id: &TaskId, reason: String) {
        let Some(state) = self.states.get_mut(task_id) else {
            return;
        };
        if !matches!(state.status, TaskStatus::Pending | TaskStatus::Ready) {
            return;
        }
        state.status = TaskStatus::Skipped;
        state.error = Some(reason.clone());
        state.finished_at = Some(Utc::now());
        debug!(task_id = %task_id, reason = %reason, "task skipped");
        self.executor
            .events
            .emit_for_task(EventKind::Info, task_id, format!("task {} skipped: {}", task_id, reason));
    }

    /// Stops the run: unstarted tasks are skipped, in-flight ones aborted.
    async fn interrupt(&mut self, why: Interrupt) {
        let reason = match why {
            Interrupt::Cancelled => {
                self.cancelled = true;
                "run cancelled".to_string()
            }
            Interrupt::TimedOut => {
                self.timed_out = true;
                let timeout = self
                    .executor
                    .timeout_config
                    .run_timeout
                    .map(|t| t.duration())
                    .unwrap_or_default();
                TimeoutError::RunTimeout { timeout }.to_string()
            }
        };
        warn!(reason = %reason, "plan execution interrupted");

        let graph = Arc::clone(&self.executor.graph);
        for id in graph.task_ids() {
            self.skip(&id, reason.clone());
        }

        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Ok((task_id, run)) = joined {
                // finished before the abort landed; keep the result
                self.apply(&task_id, run);
            }
        }

        let aborted: Vec<TaskId> = self
            .states
            .iter()
            .filter(|(_, s)| s.status == TaskStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        for id in aborted {
            self.fail(&id, TaskError::Tool(ToolError::Cancelled(reason.clone())));
        }
        self.executor.events.emit(EventKind::Info, reason);
    }

    fn finish(mut self) -> ExecutionReport {
        let graph = Arc::clone(&self.executor.graph);

        // nothing can run any more; anything left over is unreachable
        let leftover: Vec<TaskId> = graph
            .task_ids()
            .into_iter()
            .filter(|id| !self.status(id).is_terminal())
            .collect();
        for id in leftover {
            if self.status(&id) == TaskStatus::Running {
                self.fail(&id, TaskError::Panicked("invocation task was lost".to_string()));
            } else {
                self.skip(&id, "never became ready".to_string());
            }
        }

        let tasks: Vec<TaskReport> = graph
            .tasks()
            .map(|task| {
                let state = self.states.remove(&task.id).unwrap_or_default();
                TaskReport {
                    task_id: task.id.clone(),
                    description: task.description.clone(),
                    tool: task.tool.clone(),
                    status: state.status,
                    result: state.result,
                    error: state.error,
                    resolved_arguments: state.resolved_arguments,
                    alias_of: task.alias_of.clone(),
                    synthesized: task.synthesized,
                    attempts: state.attempts,
                    started_at: state.started_at,
                    finished_at: state.finished_at,
                }
            })
            .collect();

        let results: BTreeMap<TaskId, Value> = self.store.snapshot().into_iter().collect();
        let report = ExecutionReport {
            run_id: self.executor.events.run_id(),
            tasks,
            results,
            cancelled: self.cancelled,
            timed_out: self.timed_out,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        info!(
            completed = report.count(TaskStatus::Completed),
            failed = report.count(TaskStatus::Failed),
            skipped = report.count(TaskStatus::Skipped),
            "plan execution finished"
        );
        report
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a spawned task needs to invoke and reflect.
struct Invocation {
    task_id: TaskId,
    description: String,
    tool: String,
    arguments: Map<String, Value>,
    invoker: Arc<dyn ToolInvoker>,
    reflector: Arc<dyn Reflector>,
    task_timeout: Option<TaskTimeout>,
    events: EventEmitter,
}

impl Invocation {
    async fn run(self) -> TaskRun {
        let mut arguments = self.arguments.clone();
        let mut remediation = Remediation::new();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let call = ToolCall::new(self.task_id.clone(), self.tool.clone(), arguments.clone());
            let outcome = self.invoke_once(&call).await;

            let intent = TaskIntent {
                task_id: &self.task_id,
                description: &self.description,
                tool: &self.tool,
                arguments: &arguments,
            };
            let step = remediation.step(self.reflector.as_ref(), &intent, outcome).await;

            match step {
                Step::Complete(value) => {
                    return TaskRun {
                        outcome: Ok(value),
                        attempts,
                    }
                }
                Step::Fail(error) => {
                    return TaskRun {
                        outcome: Err(error),
                        attempts,
                    }
                }
                Step::Retry {
                    arguments: next,
                    reason,
                } => {
                    warn!(reason = %reason, "remediating task");
                    self.events.emit_for_task(
                        EventKind::Info,
                        &self.task_id,
                        format!("retrying task {}: {}", self.task_id, reason),
                    );
                    arguments = next;
                }
            }
        }
    }

    async fn invoke_once(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let Some(limit) = self.task_timeout else {
            return self.invoker.invoke(call).await;
        };
        match tokio::time::timeout(limit.duration(), self.invoker.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(
                TimeoutError::TaskTimeout {
                    task_id: call.task_id.to_string(),
                    timeout: limit.duration(),
                }
                .to_string(),
            )),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::analyzer::DependencyAnalyzer;
    use crate::workflow::tools::{number_value, required_number, FunctionTool};
    use async_trait::async_trait;
    use plan_core::{PlanDocument, TaskSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts invocations per tool and answers from a fixed table.
    struct MockInvoker {
        calls: AtomicUsize,
    }

    impl MockInvoker {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolInvoker for MockInvoker {
        async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let a = required_number(&call.arguments, "a").unwrap_or(0.0);
            let b = required_number(&call.arguments, "b").unwrap_or(0.0);
            match call.tool.as_str() {
                "add" => Ok(number_value(a + b)),
                "multiply" => Ok(number_value(a * b)),
                "fail" => Err(ToolError::InvalidArguments("always fails".into())),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!(null))
                }
                other => Err(ToolError::ToolNotFound(other.to_string())),
            }
        }
    }

    fn graph(tasks: Vec<TaskSpec>) -> PlanGraph {
        DependencyAnalyzer::new().analyze(&PlanDocument::new(tasks)).unwrap()
    }

    #[tokio::test]
    async fn test_chained_arithmetic() {
        let invoker = Arc::new(MockInvoker::new());
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("t1", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
            TaskSpec::new("t2", "multiply")
                .with_argument("a", json!("${t1}"))
                .with_argument("b", json!(2))
                .depends_on("t1"),
        ]))
        .with_tool_invoker(invoker.clone());

        let report = executor.execute().await;
        assert_eq!(report.result_of("t1"), Some(&json!(8)));
        assert_eq!(report.result_of("t2"), Some(&json!(16)));
        assert_eq!(
            report.task(&TaskId::new("t2")).unwrap().resolved_arguments,
            Some(json!({"a": 8, "b": 2}))
        );
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("bad", "fail"),
            TaskSpec::new("child", "add").with_argument("a", json!("${bad}")),
            TaskSpec::new("grandchild", "add").with_argument("a", json!("${child}")),
            TaskSpec::new("other", "add").with_argument("a", json!(1)).with_argument("b", json!(1)),
        ]))
        .with_tool_invoker(Arc::new(MockInvoker::new()));

        let report = executor.execute().await;
        assert_eq!(report.status_of("bad"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("child"), Some(TaskStatus::Skipped));
        assert_eq!(report.status_of("grandchild"), Some(TaskStatus::Skipped));
        assert_eq!(report.status_of("other"), Some(TaskStatus::Completed));
        assert!(report.all_terminal());
    }

    #[tokio::test]
    async fn test_alias_resolved_by_copy() {
        let invoker = Arc::new(MockInvoker::new());
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("t1", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
            TaskSpec::new("t2", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
        ]))
        .with_tool_invoker(invoker.clone());

        let report = executor.execute().await;
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.result_of("t2"), Some(&json!(3)));
        assert_eq!(report.task(&TaskId::new("t2")).unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_task_timeout_fails_without_blocking_siblings() {
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("slow", "hang"),
            TaskSpec::new("fast", "add").with_argument("a", json!(2)).with_argument("b", json!(2)),
        ]))
        .with_tool_invoker(Arc::new(MockInvoker::new()))
        .with_reflector(Arc::new(crate::workflow::reflection::DefaultReflector))
        .with_timeout_config(TimeoutConfig::no_timeouts().with_task_timeout(TaskTimeout::from_millis(50)));

        let report = executor.execute().await;
        assert_eq!(report.status_of("fast"), Some(TaskStatus::Completed));
        let slow = report.task(&TaskId::new("slow")).unwrap();
        assert_eq!(slow.status, TaskStatus::Failed);
        assert!(slow.error.as_deref().unwrap_or("").contains("timed out"));
        // timeouts get one remediation attempt
        assert_eq!(slow.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_completed_results() {
        let source = CancellationTokenSource::new();
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("t1", "add").with_argument("a", json!(1)).with_argument("b", json!(1)),
            TaskSpec::new("t2", "hang").with_argument("x", json!("${t1}")),
            TaskSpec::new("t3", "add").with_argument("a", json!("${t2}")),
        ]))
        .with_tool_invoker(Arc::new(MockInvoker::new()))
        .with_timeout_config(TimeoutConfig::no_timeouts())
        .with_cancellation_source(source.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            source.cancel();
        };
        let (report, _) = tokio::join!(executor.execute(), canceller);

        assert!(report.cancelled);
        assert_eq!(report.result_of("t1"), Some(&json!(2)));
        assert_eq!(report.status_of("t2"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("t3"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let executor = PlanExecutor::new(graph(vec![TaskSpec::new("t1", "hang")]))
            .with_tool_invoker(Arc::new(MockInvoker::new()))
            .with_timeout_config(
                TimeoutConfig::no_timeouts()
                    .with_run_timeout(crate::workflow::timeout::RunTimeout::from_millis(30)),
            );

        let report = executor.execute().await;
        assert!(report.timed_out);
        assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_events_follow_completion_order() {
        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("t2", "multiply")
                .with_argument("a", json!("${t1}"))
                .with_argument("b", json!(2)),
            TaskSpec::new("t1", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
        ]))
        .with_tool_invoker(Arc::new(MockInvoker::new()));

        executor.execute().await;
        let completes: Vec<TaskId> = executor
            .events()
            .replay()
            .into_iter()
            .filter(|e| e.kind == EventKind::Complete)
            .filter_map(|e| e.task_id)
            .collect();
        assert_eq!(completes, vec![TaskId::new("t1"), TaskId::new("t2")]);
    }

    #[tokio::test]
    async fn test_registry_invoker() {
        let mut registry = ToolRegistry::new();
        registry
            .register(FunctionTool::sync("add", "Add", |args| {
                Ok(number_value(required_number(args, "a")? + required_number(args, "b")?))
            }))
            .unwrap();

        let executor = PlanExecutor::new(graph(vec![
            TaskSpec::new("t1", "add").with_argument("a", json!(2)).with_argument("b", json!(3)),
            TaskSpec::new("t2", "missing"),
        ]))
        .with_tool_invoker(Arc::new(registry));

        let report = executor.execute().await;
        assert_eq!(report.result_of("t1"), Some(&json!(5)));
        assert_eq!(report.status_of("t2"), Some(TaskStatus::Failed));
        assert_eq!(report.task(&TaskId::new("t2")).unwrap().attempts, 1);
    }
}
