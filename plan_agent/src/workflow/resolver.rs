//! Reference resolution against the result store.
//!
//! Two rules apply and are kept apart:
//!
//! - an argument that is exactly one reference is replaced by the referenced
//!   value itself, keeping its JSON type
//! - a reference embedded in a larger string is interpolated; strings are
//!   inserted as-is and other values as compact JSON
//!
//! Lists and maps are resolved element by element. Values without any
//! reference pass through untouched.

use crate::workflow::store::ResultStore;
use plan_core::{ArgValue, Arguments, Reference, ReferenceError, Segment, TaskId};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Substitutes reference expressions with stored results.
///
/// # Example
///
/// ```ignore
/// let resolver = ReferenceResolver::new(store.clone(), graph.task_ids());
/// let resolved = resolver.resolve_arguments(&task.arguments)?;
/// ```
#[derive(Clone, Debug)]
pub struct ReferenceResolver {
    store: ResultStore,
    known: HashSet<TaskId>,
}

impl ReferenceResolver {
    /// Creates a resolver for a plan with the given task ids.
    pub fn new(store: ResultStore, known: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            store,
            known: known.into_iter().collect(),
        }
    }

    /// Resolves every argument of a task.
    pub fn resolve_arguments(&self, arguments: &Arguments) -> Result<Map<String, Value>, ReferenceError> {
        let mut resolved = Map::new();
        for (name, value) in arguments {
            resolved.insert(name.clone(), self.resolve_value(value)?);
        }
        Ok(resolved)
    }

    /// Resolves one argument value.
    pub fn resolve_value(&self, value: &ArgValue) -> Result<Value, ReferenceError> {
        match value {
            ArgValue::Literal(v) => Ok(v.clone()),
            ArgValue::Reference(r) => self.lookup(r),
            ArgValue::Template(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => text.push_str(t),
                        Segment::Ref(r) => text.push_str(&stringify(&self.lookup(r)?)),
                    }
                }
                Ok(Value::String(text))
            }
            ArgValue::List(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ArgValue::Map(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Looks up the value a single reference points at.
    pub fn lookup(&self, reference: &Reference) -> Result<Value, ReferenceError> {
        let Some(stored) = self.store.get(&reference.task_id) else {
            return Err(if self.known.contains(&reference.task_id) {
                ReferenceError::NotCompleted {
                    task_id: reference.task_id.clone(),
                    field: reference.field.clone(),
                }
            } else {
                ReferenceError::MissingTask {
                    task_id: reference.task_id.clone(),
                    field: reference.field.clone(),
                }
            });
        };

        match &reference.field {
            None => Ok(stored),
            Some(field) => extract_field(&reference.task_id, &decode_embedded_json(stored), field),
        }
    }
}

/// Parses a string result that holds a serialized JSON object or array.
fn decode_embedded_json(value: Value) -> Value {
    if let Value::String(text) = &value {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                return parsed;
            }
        }
    }
    value
}

fn extract_field(task_id: &TaskId, value: &Value, field: &str) -> Result<Value, ReferenceError> {
    let absent = || ReferenceError::FieldAbsent {
        task_id: task_id.clone(),
        field: field.to_string(),
    };
    let wrong_shape = || ReferenceError::WrongShape {
        task_id: task_id.clone(),
        field: field.to_string(),
    };

    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(field) {
                return Ok(found.clone());
            }
            // search-style results: {"results": [{...}, ...]}
            match map.get("results") {
                Some(Value::Array(items)) => match items.first() {
                    Some(Value::Object(first)) => first.get(field).cloned().ok_or_else(absent),
                    _ => Err(absent()),
                },
                _ => Err(absent()),
            }
        }
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) => first.get(field).cloned().ok_or_else(absent),
            Some(_) => Err(wrong_shape()),
            None => Err(absent()),
        },
        _ => Err(wrong_shape()),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
