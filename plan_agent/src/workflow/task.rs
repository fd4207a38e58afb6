//! Analyzed plan tasks.
//!
//! A [`PlanTask`] is a [`TaskSpec`] after dependency analysis: arguments are
//! parsed into [`ArgValue`]s, the dependency set is complete and the task may
//! be marked as an alias of an equivalent task.

use crate::workflow::reflection::ReflectionRejection;
use crate::workflow::tools::ToolError;
use plan_core::value::{argument_references, arguments_to_json};
use plan_core::{Arguments, ReferenceError, TaskId, TaskSpec};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a task ended in `failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// An argument reference could not be resolved
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),

    /// The tool failed and remediation did not recover it
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Reflection judged the output unusable
    #[error(transparent)]
    Rejected(#[from] ReflectionRejection),

    /// The invocation task itself crashed
    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// A task ready to be placed in the plan graph.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanTask {
    /// Identifier unique within the plan
    pub id: TaskId,
    /// Human readable intent
    pub description: String,
    /// Tool to invoke
    pub tool: String,
    /// Arguments with parsed references
    pub arguments: Arguments,
    /// Dependencies as written in the plan
    pub declared: Vec<TaskId>,
    /// Complete dependency set (declared plus inferred)
    pub dependencies: BTreeSet<TaskId>,
    /// Equivalent task whose result this task copies
    pub alias_of: Option<TaskId>,
    /// True if the analyzer created this task
    pub synthesized: bool,
}

impl PlanTask {
    /// Builds a task from its specification, inferring dependencies from
    /// the references in its arguments.
    pub fn from_spec(spec: &TaskSpec) -> Self {
        let arguments = spec.parsed_arguments();
        let mut dependencies: BTreeSet<TaskId> = spec.depends_on.iter().cloned().collect();
        for reference in argument_references(&arguments) {
            dependencies.insert(reference.task_id.clone());
        }

        Self {
            id: spec.task_id.clone(),
            description: spec.description.clone(),
            tool: spec.tool.clone(),
            arguments,
            declared: spec.depends_on.clone(),
            dependencies,
            alias_of: None,
            synthesized: false,
        }
    }

    /// Returns the task ids referenced from the arguments.
    pub fn referenced_tasks(&self) -> BTreeSet<TaskId> {
        argument_references(&self.arguments)
            .into_iter()
            .map(|r| r.task_id.clone())
            .collect()
    }

    /// Returns the dependencies that were inferred rather than declared.
    pub fn inferred_dependencies(&self) -> Vec<TaskId> {
        self.dependencies
            .iter()
            .filter(|d| !self.declared.contains(d))
            .cloned()
            .collect()
    }

    /// Returns true if the task resolves by copying another task's result.
    pub fn is_alias(&self) -> bool {
        self.alias_of.is_some()
    }

    /// Returns the arguments as raw JSON with reference tokens intact.
    pub fn raw_arguments(&self) -> Value {
        arguments_to_json(&self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependencies_inferred_from_references() {
        let spec = TaskSpec::new("t3", "concat")
            .with_argument("a", json!("${t1}"))
            .with_argument("b", json!(["x", {"y": "${t2.name}"}]));
        let task = PlanTask::from_spec(&spec);

        assert_eq!(task.dependencies.len(), 2);
        assert!(task.dependencies.contains(&TaskId::new("t1")));
        assert!(task.dependencies.contains(&TaskId::new("t2")));
        assert_eq!(task.inferred_dependencies().len(), 2);
    }

    #[test]
    fn test_declared_and_inferred_are_unioned() {
        let spec = TaskSpec::new("t2", "multiply")
            .with_argument("a", json!("${t1}"))
            .depends_on("t1")
            .depends_on("t0");
        let task = PlanTask::from_spec(&spec);

        assert_eq!(task.dependencies.len(), 2);
        assert!(task.inferred_dependencies().is_empty());
        assert_eq!(task.referenced_tasks().len(), 1);
    }

    #[test]
    fn test_raw_arguments_keep_tokens() {
        let spec = TaskSpec::new("t2", "multiply").with_argument("a", json!("${t1}"));
        let task = PlanTask::from_spec(&spec);
        assert_eq!(task.raw_arguments(), json!({"a": "${t1}"}));
        assert!(!task.is_alias());
    }
}
