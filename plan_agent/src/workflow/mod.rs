//! Plan analysis and execution.
//!
//! The workflow module turns a [`PlanDocument`](plan_core::PlanDocument)
//! into results:
//!
//! - [`DependencyAnalyzer`] infers dependencies from `${task_id}`
//!   references, synthesizes prerequisite lookups and aliases equivalent
//!   tasks
//! - [`PlanGraph`] holds the tasks as a DAG; a cycle is a fatal error
//! - [`PlanExecutor`] runs the graph concurrently, writing each result once
//!   into a [`ResultStore`] and resolving later references against it
//! - [`Reflector`] reviews every outcome and may grant one remediation
//!
//! # Example
//!
//! ```ignore
//! use plan_agent::workflow::{DependencyAnalyzer, PlanExecutor};
//!
//! let plan = PlanDocument::from_generator_output(text)?;
//! let graph = DependencyAnalyzer::new().analyze(&plan)?;
//! let report = PlanExecutor::new(graph)
//!     .with_tool_invoker(Arc::new(registry))
//!     .execute()
//!     .await;
//! println!("{}", report.summary_text());
//! ```
//!
//! # Execution Model
//!
//! 1. Analyze and validate the plan (no task runs if this fails)
//! 2. Promote tasks whose dependencies all completed to `ready`
//! 3. Dispatch ready tasks in declaration order, bounded by concurrency
//! 4. Record results, skip dependents of failed tasks, repeat

pub mod analyzer;
pub mod cancellation;
pub mod dag;
pub mod executor;
pub mod reflection;
pub mod report;
pub mod resolver;
pub mod signature;
pub mod store;
pub mod task;
pub mod timeout;
pub mod tools;
pub mod validate;

pub use analyzer::{DependencyAnalyzer, PrerequisiteRule};
pub use cancellation::{CancellationToken, CancellationTokenSource};
pub use dag::PlanGraph;
pub use executor::{PlanExecutor, DEFAULT_MAX_CONCURRENCY};
pub use reflection::{
    DefaultReflector, Judge, JudgedReflector, ReflectionRejection, ReflectionReport, Reflector,
    TaskIntent, Verdict,
};
pub use report::{ExecutionReport, TaskReport};
pub use resolver::ReferenceResolver;
pub use signature::{signature, SignatureRegistry};
pub use store::{ResultStore, StoreError};
pub use task::{PlanTask, TaskError};
pub use timeout::{RunTimeout, TaskTimeout, TimeoutConfig, TimeoutError};
pub use tools::{FunctionTool, ToolCall, ToolDescriptor, ToolError, ToolInvoker, ToolRegistry};
pub use validate::{PlanValidator, ValidationReport};
