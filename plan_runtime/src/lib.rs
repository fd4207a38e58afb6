//! PlanKit runtime layer - one request from plan to answer.
//!
//! This crate wires the plan interpreter to its collaborators:
//!
//! - A [`Planner`] turns the user request into plan text
//! - The analyzer and executor from `plan_agent` run the plan
//! - An [`AnswerGenerator`] turns the execution report into answer chunks
//!
//! Every step is reported on the run's event stream:
//!
//! ```text
//! start, phase(planning), info, plan_ready, task..., phase(execution),
//! executing/complete/error..., phase(answer), answer..., done
//! ```
//!
//! A plan that cannot be parsed or analyzed ends the stream with `error`
//! followed by `done`; no task runs.
//!
//! # Examples
//!
//! ```rust,no_run
//! use plan_runtime::{PlanRuntime, StaticPlanner};
//! use plan_runtime::config::RuntimeConfig;
//! use plan_agent::ToolRegistry;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let planner = StaticPlanner::new(r#"{"tasks": [{"task_id": "t1", "tool": "add", "arguments": {"a": 3, "b": 5}}]}"#);
//! let runtime = PlanRuntime::new(RuntimeConfig::default(), Arc::new(planner), Arc::new(ToolRegistry::new()));
//! let outcome = runtime.run("what is 3 + 5?").await;
//! println!("{}", outcome.answer);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;

use async_trait::async_trait;
use config::RuntimeConfig;
use metrics::RunMetrics;
use plan_agent::workflow::{DefaultReflector, ToolDescriptor};
use plan_agent::{
    CancellationTokenSource, EventEmitter, EventKind, ExecutionReport, PlanEvent, PlanExecutor,
    PlanGraph, Reflector, ToolInvoker,
};
use plan_core::PlanDocument;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Produces plan text for a request.
///
/// The text may be bare JSON or contain a fenced JSON block; see
/// [`PlanDocument::from_generator_output`].
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str, tools: &[ToolDescriptor]) -> anyhow::Result<String>;
}

/// Turns an execution report into answer text, chunk by chunk.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, request: &str, report: &ExecutionReport) -> anyhow::Result<Vec<String>>;
}

/// Planner that always returns the same text.
#[derive(Clone, Debug)]
pub struct StaticPlanner {
    text: String,
}

impl StaticPlanner {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Serializes a plan document as the planner's output.
    pub fn from_document(plan: &PlanDocument) -> anyhow::Result<Self> {
        Ok(Self::new(serde_json::to_string(plan)?))
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _request: &str, _tools: &[ToolDescriptor]) -> anyhow::Result<String> {
        Ok(self.text.clone())
    }
}

/// Answers with the report's plain-text summary, one chunk per task.
#[derive(Clone, Copy, Debug, Default)]
pub struct SummaryAnswer;

#[async_trait]
impl AnswerGenerator for SummaryAnswer {
    async fn answer(&self, _request: &str, report: &ExecutionReport) -> anyhow::Result<Vec<String>> {
        let summary = report.summary_text();
        let mut chunks = Vec::new();
        let mut current = String::new();
        for line in summary.lines() {
            if line.starts_with("task ") && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }
}

/// Everything one request produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Execution report; absent if the plan never ran
    pub report: Option<ExecutionReport>,
    /// Concatenated answer chunks
    pub answer: String,
    /// Fatal error that stopped the request, if any
    pub error: Option<String>,
    /// Every event emitted for the request
    pub events: Vec<PlanEvent>,
}

impl RunOutcome {
    /// Returns true if the request reached the answer phase.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs requests end to end.
pub struct PlanRuntime {
    config: RuntimeConfig,
    planner: Arc<dyn Planner>,
    answerer: Arc<dyn AnswerGenerator>,
    invoker: Arc<dyn ToolInvoker>,
    reflector: Arc<dyn Reflector>,
    metrics: RunMetrics,
}

impl PlanRuntime {
    /// Creates a runtime that answers with the report summary.
    ///
    /// # Arguments
    ///
    /// * `config` - Executor, event and prerequisite settings
    /// * `planner` - Produces plan text
    /// * `invoker` - Runs tools
    pub fn new(config: RuntimeConfig, planner: Arc<dyn Planner>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            config,
            planner,
            answerer: Arc::new(SummaryAnswer),
            invoker,
            reflector: Arc::new(DefaultReflector),
            metrics: RunMetrics::new(),
        }
    }

    pub fn with_answer_generator(mut self, answerer: Arc<dyn AnswerGenerator>) -> Self {
        self.answerer = answerer;
        self
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the metrics accumulated across runs.
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Creates an event emitter sized from configuration.
    ///
    /// Subscribe to it before passing it to [`PlanRuntime::run_with`] to
    /// observe the run live.
    pub fn event_emitter(&self) -> EventEmitter {
        EventEmitter::new(self.config.events.capacity)
    }

    /// Runs one request with a fresh event stream.
    pub async fn run(&self, request: &str) -> RunOutcome {
        self.run_with(request, self.event_emitter(), None).await
    }

    /// Runs one request, emitting on `events` and honouring `cancellation`.
    pub async fn run_with(
        &self,
        request: &str,
        events: EventEmitter,
        cancellation: Option<CancellationTokenSource>,
    ) -> RunOutcome {
        events.emit(EventKind::Start, format!("processing: {}", request));
        info!(run_id = %events.run_id(), "request accepted");

        let graph = match self.prepare(request, &events).await {
            Ok(graph) => graph,
            Err(e) => return fatal(&events, e),
        };

        events.emit(EventKind::Phase, "execution");
        let mut executor = PlanExecutor::new(graph)
            .with_tool_invoker(Arc::clone(&self.invoker))
            .with_reflector(Arc::clone(&self.reflector))
            .with_timeout_config(self.config.timeout_config())
            .with_max_concurrency(self.config.executor.max_concurrency)
            .with_event_emitter(events.clone());
        if let Some(source) = cancellation {
            executor = executor.with_cancellation_source(source);
        }
        let report = executor.execute().await;
        self.metrics.record_report(&report);

        events.emit(EventKind::Phase, "answer");
        let mut answer = String::new();
        match self.answerer.answer(request, &report).await {
            Ok(chunks) => {
                for chunk in chunks {
                    events.emit(EventKind::Answer, chunk.clone());
                    answer.push_str(&chunk);
                }
            }
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                events.emit(EventKind::Error, format!("answer generation failed: {}", e));
            }
        }

        events.emit(
            EventKind::Done,
            format!("finished, answer length: {} characters", answer.chars().count()),
        );
        info!(
            completed = report.count(plan_core::TaskStatus::Completed),
            duration_ms = report.duration_ms(),
            "request finished"
        );

        RunOutcome {
            report: Some(report),
            answer,
            error: None,
            events: events.replay(),
        }
    }

    /// Plans, parses and analyzes; nothing runs if this fails.
    async fn prepare(&self, request: &str, events: &EventEmitter) -> anyhow::Result<PlanGraph> {
        events.emit(EventKind::Phase, "planning");
        let tools = self.invoker.descriptors();
        let text = self
            .planner
            .plan(request, &tools)
            .await
            .map_err(|e| anyhow::anyhow!("planning failed: {}", e))?;

        let plan = PlanDocument::from_generator_output(&text)
            .map_err(|e| anyhow::anyhow!("plan could not be parsed: {}", e))?;
        events.emit(EventKind::Info, format!("plan contains {} tasks", plan.len()));

        let graph = self
            .config
            .analyzer()
            .analyze(&plan)
            .map_err(|e| anyhow::anyhow!("plan rejected: {}", e))?;

        events.emit(EventKind::PlanReady, format!("{} tasks ready", graph.len()));
        for task in graph.tasks() {
            let content = json!({
                "task_id": task.id,
                "description": task.description,
                "tool": task.tool,
                "arguments": task.raw_arguments(),
                "depends_on": task.dependencies,
                "alias_of": task.alias_of,
                "synthesized": task.synthesized,
            });
            events.emit_for_task(EventKind::Task, &task.id, content.to_string());
        }
        Ok(graph)
    }
}

fn fatal(events: &EventEmitter, error: anyhow::Error) -> RunOutcome {
    let message = error.to_string();
    warn!(error = %message, "request failed before execution");
    events.emit(EventKind::Error, message.clone());
    events.emit(EventKind::Done, "finished with error");
    RunOutcome {
        report: None,
        answer: String::new(),
        error: Some(message),
        events: events.replay(),
    }
}
