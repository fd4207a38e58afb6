//! Plan documents.
//!
//! A plan is an ordered list of task specifications produced by a plan
//! generator. It is usually JSON, often wrapped in a fenced code block
//! inside free text, and may also be written by hand as YAML.

use crate::error::{PlanValidationError, Result};
use crate::types::TaskId;
use crate::value::{arguments_from_map, Arguments};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// One step of a plan as written by the generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Identifier unique within the plan
    pub task_id: TaskId,
    /// Human readable intent of the step
    #[serde(default)]
    pub description: String,
    /// Name of the tool to invoke
    pub tool: String,
    /// Raw arguments, possibly holding reference tokens
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Explicitly declared prerequisites
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
}

impl TaskSpec {
    /// Creates a task specification with no arguments.
    pub fn new(task_id: impl Into<TaskId>, tool: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: String::new(),
            tool: tool.into(),
            arguments: Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds one raw argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Adds an explicit dependency.
    pub fn depends_on(mut self, task_id: impl Into<TaskId>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }

    /// Returns the arguments with reference tokens parsed.
    pub fn parsed_arguments(&self) -> Arguments {
        arguments_from_map(self.arguments.clone())
    }
}

/// An ordered list of task specifications.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Tasks in generator order
    pub tasks: Vec<TaskSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Wrapped(PlanDocument),
    Bare(Vec<TaskSpec>),
}

impl From<RawPlan> for PlanDocument {
    fn from(raw: RawPlan) -> Self {
        match raw {
            RawPlan::Wrapped(doc) => doc,
            RawPlan::Bare(tasks) => PlanDocument { tasks },
        }
    }
}

impl PlanDocument {
    /// Creates a plan from task specifications.
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self { tasks }
    }

    /// Parses a JSON plan: either `{"tasks": [...]}` or a bare array.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawPlan = serde_json::from_str(text)?;
        Ok(raw.into())
    }

    /// Parses a YAML plan with the same shape as the JSON form.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawPlan = serde_yaml::from_str(text)?;
        Ok(raw.into())
    }

    /// Extracts a JSON plan from free-form generator output.
    ///
    /// Looks for a ```` ```json ```` fence first, then any ```` ``` ````
    /// fence, and finally treats the whole text as JSON.
    pub fn from_generator_output(text: &str) -> Result<Self> {
        let body = extract_fenced(text, "```json")
            .or_else(|| extract_fenced(text, "```"))
            .unwrap_or(text)
            .trim();
        tracing::debug!(bytes = body.len(), "extracted plan body from generator output");

        Self::from_json_str(body).map_err(|e| {
            PlanValidationError::MalformedDocument(format!("generator output is not a plan: {}", e))
                .into()
        })
    }

    /// Loads a plan file, choosing YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Self::from_generator_output(&text),
        }
    }

    /// Returns the number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks up a task specification by id.
    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| &t.task_id == id)
    }
}

fn extract_fenced<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}
