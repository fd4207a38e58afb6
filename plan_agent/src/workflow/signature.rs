//! Argument signatures for task reuse.
//!
//! Two tasks are equivalent when they call the same tool with the same raw
//! arguments. The signature hashes a canonical JSON form of the arguments:
//! object keys sorted, integral floats folded into integers, and reference
//! tokens kept verbatim so tasks wired to different upstream tasks never
//! collide.

use plan_core::TaskId;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Computes the reuse signature of a tool call.
pub fn signature(tool: &str, raw_arguments: &Value) -> String {
    let canonical = canonicalize(raw_arguments);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{}:{:x}", tool, hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}

/// Registry of tool-call signatures seen during one plan run.
///
/// Scoped to a single analysis; never shared across runs.
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    entries: HashMap<String, TaskId>,
}

impl SignatureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task's call signature.
    ///
    /// # Returns
    ///
    /// - `Some(canonical)` if an equivalent task was registered earlier
    /// - `None` if this task is now the canonical owner of the signature
    pub fn register(&mut self, task_id: &TaskId, tool: &str, raw_arguments: &Value) -> Option<TaskId> {
        let key = signature(tool, raw_arguments);
        match self.entries.get(&key) {
            Some(existing) => Some(existing.clone()),
            None => {
                self.entries.insert(key, task_id.clone());
                None
            }
        }
    }

    /// Returns the number of distinct signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        assert_eq!(
            signature("add", &json!({"a": 3, "b": 5})),
            signature("add", &json!({"b": 5, "a": 3}))
        );
    }

    #[test]
    fn test_integral_float_matches_integer() {
        assert_eq!(
            signature("add", &json!({"a": 3.0})),
            signature("add", &json!({"a": 3}))
        );
        assert_ne!(
            signature("add", &json!({"a": 3.5})),
            signature("add", &json!({"a": 3}))
        );
    }

    #[test]
    fn test_tool_name_is_part_of_signature() {
        assert_ne!(
            signature("add", &json!({"a": 1})),
            signature("multiply", &json!({"a": 1}))
        );
    }

    #[test]
    fn test_references_kept_verbatim() {
        assert_ne!(
            signature("add", &json!({"a": "${t1}"})),
            signature("add", &json!({"a": "${t2}"}))
        );
    }

    #[test]
    fn test_registry_returns_canonical_owner() {
        let mut registry = SignatureRegistry::new();
        let args = json!({"value": "差评率"});
        assert_eq!(registry.register(&TaskId::new("t1"), "search_metrics", &args), None);
        assert_eq!(
            registry.register(&TaskId::new("t4"), "search_metrics", &args),
            Some(TaskId::new("t1"))
        );
        assert_eq!(registry.len(), 1);
    }
}
