//! PlanKit agent layer - dependency-aware execution of tool plans.
//!
//! A plan is a list of tool invocations whose arguments may refer to the
//! results of other tasks with `${task_id}` or `${task_id.field}`. This crate
//! analyzes such a plan into a dependency graph and executes it:
//!
//! - Analysis: infer dependencies, add prerequisite lookups, alias repeats
//! - Scheduling: run independent tasks concurrently, dependents in order
//! - Reflection: review each outcome and remediate at most once
//! - Events: stream lifecycle notifications to observers
//!
//! Plan parsing and reference syntax live in `plan_core`; the request
//! lifecycle, configuration and logging live in `plan_runtime`.

pub mod events;
pub mod workflow;

pub use events::{EventEmitter, EventKind, PlanEvent, DEFAULT_EVENT_CAPACITY};
pub use workflow::{
    CancellationTokenSource, DependencyAnalyzer, ExecutionReport, PlanExecutor, PlanGraph,
    PrerequisiteRule, Reflector, ResultStore, TaskReport, TimeoutConfig, ToolCall, ToolError,
    ToolInvoker, ToolRegistry,
};
