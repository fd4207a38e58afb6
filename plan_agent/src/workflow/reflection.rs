//! Post-invocation reflection with bounded remediation.
//!
//! After every tool invocation a [`Reflector`] classifies the outcome. A
//! task gets at most one remediation attempt:
//!
//! ```text
//! running -> completed                     (accepted)
//! running -> remediating -> completed      (retry produced output)
//! running -> remediating -> failed         (no output ever obtained)
//! running -> failed                        (abandoned, or failure accepted)
//! ```
//!
//! The reflector is consulted only for the first outcome; whatever the
//! remediation attempt yields is final.

use crate::workflow::task::TaskError;
use crate::workflow::tools::ToolError;
use async_trait::async_trait;
use plan_core::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Output judged unacceptable and not recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Output rejected by reflection: {reason}")]
pub struct ReflectionRejection {
    /// Why the output was rejected
    pub reason: String,
}

/// What the task was meant to do.
#[derive(Clone, Copy, Debug)]
pub struct TaskIntent<'a> {
    /// Task being reviewed
    pub task_id: &'a TaskId,
    /// Human-readable intent from the plan
    pub description: &'a str,
    /// Tool that was invoked
    pub tool: &'a str,
    /// Resolved arguments the tool was invoked with
    pub arguments: &'a Map<String, Value>,
}

/// Raw result of one invocation.
#[derive(Clone, Copy, Debug)]
pub enum Outcome<'a> {
    /// Tool returned a value
    Output(&'a Value),
    /// Tool raised an error
    Error(&'a ToolError),
}

/// Reflection decision for one outcome.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// Keep the output, or for an error, accept the failure as final
    Accept,
    /// Re-invoke once with adjusted arguments
    Reformulate {
        /// Replacement arguments
        arguments: Map<String, Value>,
        /// Why the first attempt was not good enough
        reason: String,
    },
    /// Re-invoke once with the same arguments
    Reject {
        /// Why the first attempt was not good enough
        reason: String,
    },
    /// Give up on the task immediately
    Abandon {
        /// Why the task cannot succeed
        reason: String,
    },
}

/// Classifies invocation outcomes.
#[async_trait]
pub trait Reflector: Send + Sync {
    /// Reviews the first outcome of a task.
    async fn review(&self, intent: &TaskIntent<'_>, outcome: Outcome<'_>) -> Verdict;
}

/// Accepts every output and retries transient tool errors once.
///
/// Missing tools, bad arguments and cancellation are never retried.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReflector;

#[async_trait]
impl Reflector for DefaultReflector {
    async fn review(&self, _intent: &TaskIntent<'_>, outcome: Outcome<'_>) -> Verdict {
        match outcome {
            Outcome::Output(_) => Verdict::Accept,
            Outcome::Error(error) => match error {
                ToolError::ExecutionFailed(_) | ToolError::Timeout(_) => Verdict::Reject {
                    reason: error.to_string(),
                },
                ToolError::ToolNotFound(_)
                | ToolError::InvalidArguments(_)
                | ToolError::Cancelled(_)
                | ToolError::AlreadyRegistered(_) => Verdict::Accept,
            },
        }
    }
}

/// Assessment returned by an external judgment collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    /// Whether the task intent was understood
    #[serde(default = "default_true")]
    pub understanding_correct: bool,
    /// Whether the tool fits the intent
    #[serde(default = "default_true")]
    pub tool_appropriate: bool,
    /// Whether the arguments were right
    #[serde(default = "default_true")]
    pub parameters_correct: bool,
    /// Free-text improvement suggestions
    #[serde(default)]
    pub suggestions: String,
    /// Whether the task should go on at all
    #[serde(default = "default_true")]
    pub proceed: bool,
    /// Corrected arguments, if the judge proposes any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_arguments: Option<Map<String, Value>>,
}

fn default_true() -> bool {
    true
}

impl Default for ReflectionReport {
    fn default() -> Self {
        Self {
            understanding_correct: true,
            tool_appropriate: true,
            parameters_correct: true,
            suggestions: String::new(),
            proceed: true,
            revised_arguments: None,
        }
    }
}

impl ReflectionReport {
    /// Maps the report to a verdict.
    pub fn verdict(&self) -> Verdict {
        let reason = |fallback: &str| {
            if self.suggestions.is_empty() {
                fallback.to_string()
            } else {
                self.suggestions.clone()
            }
        };

        if !self.proceed {
            return Verdict::Abandon {
                reason: reason("judge advised to stop"),
            };
        }
        if !self.parameters_correct {
            if let Some(arguments) = &self.revised_arguments {
                return Verdict::Reformulate {
                    arguments: arguments.clone(),
                    reason: reason("parameters judged incorrect"),
                };
            }
        }
        if !(self.understanding_correct && self.tool_appropriate && self.parameters_correct) {
            return Verdict::Reject {
                reason: reason("output judged unacceptable"),
            };
        }
        Verdict::Accept
    }
}

/// External judgment collaborator.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Judges one outcome of a task.
    async fn judge(&self, intent: &TaskIntent<'_>, outcome: Outcome<'_>) -> anyhow::Result<ReflectionReport>;
}

/// Reflector that delegates to a [`Judge`].
///
/// A judge failure counts as acceptance so reflection never blocks
/// progress on its own.
#[derive(Clone)]
pub struct JudgedReflector {
    judge: Arc<dyn Judge>,
}

impl JudgedReflector {
    /// Creates a reflector over the given judge.
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl Reflector for JudgedReflector {
    async fn review(&self, intent: &TaskIntent<'_>, outcome: Outcome<'_>) -> Verdict {
        match self.judge.judge(intent, outcome).await {
            Ok(report) => {
                let verdict = report.verdict();
                debug!(task_id = %intent.task_id, verdict = ?verdict, "reflection verdict");
                verdict
            }
            Err(e) => {
                warn!(task_id = %intent.task_id, error = %e, "judge failed, accepting outcome");
                Verdict::Accept
            }
        }
    }
}

/// Next action after an invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Task completes with this result
    Complete(Value),
    /// Invoke once more with these arguments
    Retry {
        /// Arguments for the remediation attempt
        arguments: Map<String, Value>,
        /// Why remediation was triggered
        reason: String,
    },
    /// Task fails
    Fail(TaskError),
}

/// One task's remediation state.
#[derive(Clone, Debug, Default)]
pub struct Remediation {
    remediating: bool,
    last_output: Option<Value>,
}

impl Remediation {
    /// Creates state for a fresh task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the single remediation attempt has been granted.
    pub fn is_remediating(&self) -> bool {
        self.remediating
    }

    /// Decides what happens after an invocation.
    ///
    /// # Arguments
    ///
    /// * `reflector` - Consulted on the first outcome only
    /// * `intent` - The task and the arguments just used
    /// * `outcome` - What the invocation returned
    pub async fn step(
        &mut self,
        reflector: &dyn Reflector,
        intent: &TaskIntent<'_>,
        outcome: Result<Value, ToolError>,
    ) -> Step {
        if self.remediating {
            return match outcome {
                Ok(value) => Step::Complete(value),
                Err(error) => match self.last_output.take() {
                    Some(previous) => Step::Complete(previous),
                    None => Step::Fail(TaskError::Tool(error)),
                },
            };
        }

        let verdict = match &outcome {
            Ok(value) => reflector.review(intent, Outcome::Output(value)).await,
            Err(error) => reflector.review(intent, Outcome::Error(error)).await,
        };

        match (verdict, outcome) {
            (Verdict::Accept, Ok(value)) => Step::Complete(value),
            (Verdict::Accept, Err(error)) => Step::Fail(TaskError::Tool(error)),
            (Verdict::Abandon { reason }, _) => {
                Step::Fail(TaskError::Rejected(ReflectionRejection { reason }))
            }
            (Verdict::Reformulate { arguments, reason }, outcome) => {
                self.begin(outcome);
                Step::Retry { arguments, reason }
            }
            (Verdict::Reject { reason }, outcome) => {
                self.begin(outcome);
                Step::Retry {
                    arguments: intent.arguments.clone(),
                    reason,
                }
            }
        }
    }

    fn begin(&mut self, outcome: Result<Value, ToolError>) {
        self.remediating = true;
        self.last_output = outcome.ok();
    }
}
