//! PlanKit - Plan data model for tool-calling agents
//!
//! This crate holds the pieces of a plan that do not depend on a runtime:
//! task identifiers and statuses, the reference expression syntax used to
//! wire results between tasks, typed argument values and plan documents.
//!
//! # Quick Start
//!
//! ```rust
//! use plan_core::PlanDocument;
//!
//! let plan = PlanDocument::from_json_str(r#"{"tasks": [
//!     {"task_id": "t1", "tool": "add", "arguments": {"a": 3, "b": 5}},
//!     {"task_id": "t2", "tool": "multiply", "arguments": {"a": "${t1}", "b": 2}}
//! ]}"#).unwrap();
//!
//! assert_eq!(plan.len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Task identifiers and statuses
//! - [`error`]: Error taxonomy shared by every PlanKit crate
//! - [`reference`]: `${task_id}` / `${task_id.field}` syntax
//! - [`value`]: Argument values with parsed references
//! - [`plan`]: Plan documents and generator output extraction

pub mod error;
pub mod plan;
pub mod reference;
pub mod types;
pub mod value;

pub use error::{PlanError, PlanValidationError, ReferenceError, Result};
pub use plan::{PlanDocument, TaskSpec};
pub use reference::{Reference, Segment};
pub use types::{TaskId, TaskStatus};
pub use value::{ArgValue, Arguments};
