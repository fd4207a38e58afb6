//! Error types for PlanKit.

use crate::types::TaskId;

/// Structural problem found in a plan before any task runs.
///
/// Every variant is fatal for the whole run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanValidationError {
    /// The plan has no tasks.
    #[error("Plan contains no tasks")]
    EmptyPlan,

    /// Two tasks share an identifier.
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    /// A declared dependency names a task that is not in the plan.
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// Task declaring the dependency
        task: TaskId,
        /// Missing dependency
        dependency: TaskId,
    },

    /// A reference expression names a task that is not in the plan.
    #[error("Task {task} references unknown task {target}")]
    UnknownReference {
        /// Task holding the reference
        task: TaskId,
        /// Missing reference target
        target: TaskId,
    },

    /// A task references or depends on itself.
    #[error("Task {0} depends on its own result")]
    SelfReference(TaskId),

    /// The inferred dependency relation is cyclic.
    #[error("Cycle detected in plan involving tasks: {0:?}")]
    CycleDetected(Vec<TaskId>),

    /// The plan document could not be understood.
    #[error("Malformed plan document: {0}")]
    MalformedDocument(String),
}

/// Failure to substitute a reference expression.
///
/// Fatal for the task holding the reference only.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The referenced task does not exist in the plan.
    #[error("Referenced task not found: {task_id}")]
    MissingTask {
        /// Referenced task
        task_id: TaskId,
        /// Requested field, if any
        field: Option<String>,
    },

    /// The referenced task exists but has no completed result.
    #[error("Referenced task {task_id} has not completed")]
    NotCompleted {
        /// Referenced task
        task_id: TaskId,
        /// Requested field, if any
        field: Option<String>,
    },

    /// The result is a mapping but lacks the requested field.
    #[error("Field '{field}' absent from result of task {task_id}")]
    FieldAbsent {
        /// Referenced task
        task_id: TaskId,
        /// Requested field
        field: String,
    },

    /// The result is not a mapping or list of mappings.
    #[error("Result of task {task_id} has no field '{field}' (not a mapping)")]
    WrongShape {
        /// Referenced task
        task_id: TaskId,
        /// Requested field
        field: String,
    },
}

impl ReferenceError {
    /// Returns the referenced task id.
    pub fn task_id(&self) -> &TaskId {
        match self {
            ReferenceError::MissingTask { task_id, .. }
            | ReferenceError::NotCompleted { task_id, .. }
            | ReferenceError::FieldAbsent { task_id, .. }
            | ReferenceError::WrongShape { task_id, .. } => task_id,
        }
    }

    /// Returns the requested field path, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ReferenceError::MissingTask { field, .. }
            | ReferenceError::NotCompleted { field, .. } => field.as_deref(),
            ReferenceError::FieldAbsent { field, .. }
            | ReferenceError::WrongShape { field, .. } => Some(field),
        }
    }
}

/// Main error type for PlanKit core operations.
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    /// Plan failed validation.
    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    /// Reference could not be resolved.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with PlanError.
pub type Result<T> = std::result::Result<T, PlanError>;
