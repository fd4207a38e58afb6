//! Argument values with parsed reference expressions.
//!
//! Plan arguments arrive as arbitrary JSON. [`ArgValue`] keeps that shape
//! but lifts every string holding a reference token into a structured
//! form so the analyzer and resolver never re-scan raw text.

use crate::reference::{self, Reference, Segment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Named arguments of a task invocation.
pub type Arguments = BTreeMap<String, ArgValue>;

/// A task argument value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ArgValue {
    /// Plain JSON with no reference anywhere inside
    Literal(Value),
    /// A string that is exactly one reference token
    Reference(Reference),
    /// A string with one or more embedded reference tokens
    Template(Vec<Segment>),
    /// Array with at least one reference inside
    List(Vec<ArgValue>),
    /// Object with at least one reference inside
    Map(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Builds an argument value from raw JSON.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => {
                if let Some(r) = Reference::parse_whole(&text) {
                    ArgValue::Reference(r)
                } else if let Some(segments) = reference::split_segments(&text) {
                    ArgValue::Template(segments)
                } else {
                    ArgValue::Literal(Value::String(text))
                }
            }
            Value::Array(items) => {
                let items: Vec<ArgValue> = items.into_iter().map(ArgValue::from_json).collect();
                if items.iter().all(ArgValue::is_literal) {
                    ArgValue::Literal(Value::Array(
                        items.into_iter().map(ArgValue::into_json).collect(),
                    ))
                } else {
                    ArgValue::List(items)
                }
            }
            Value::Object(map) => {
                let entries: BTreeMap<String, ArgValue> = map
                    .into_iter()
                    .map(|(k, v)| (k, ArgValue::from_json(v)))
                    .collect();
                if entries.values().all(ArgValue::is_literal) {
                    ArgValue::Literal(Value::Object(
                        entries.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
                    ))
                } else {
                    ArgValue::Map(entries)
                }
            }
            other => ArgValue::Literal(other),
        }
    }

    /// Returns true if no reference appears anywhere inside.
    pub fn is_literal(&self) -> bool {
        matches!(self, ArgValue::Literal(_))
    }

    /// Collects every reference inside this value, depth first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            ArgValue::Literal(_) => {}
            ArgValue::Reference(r) => out.push(r),
            ArgValue::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            ArgValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            ArgValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
        }
    }

    /// Renders the value back to JSON, keeping reference tokens as text.
    pub fn to_json(&self) -> Value {
        self.clone().into_json()
    }

    /// Consumes the value and renders it back to JSON.
    pub fn into_json(self) -> Value {
        match self {
            ArgValue::Literal(v) => v,
            ArgValue::Reference(r) => Value::String(r.to_string()),
            ArgValue::Template(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => text.push_str(&t),
                        Segment::Ref(r) => text.push_str(&r.to_string()),
                    }
                }
                Value::String(text)
            }
            ArgValue::List(items) => {
                Value::Array(items.into_iter().map(ArgValue::into_json).collect())
            }
            ArgValue::Map(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        ArgValue::from_json(value)
    }
}

impl From<ArgValue> for Value {
    fn from(value: ArgValue) -> Self {
        value.into_json()
    }
}

/// Converts a JSON object into typed arguments.
pub fn arguments_from_map(map: Map<String, Value>) -> Arguments {
    map.into_iter()
        .map(|(k, v)| (k, ArgValue::from_json(v)))
        .collect()
}

/// Renders typed arguments back to a JSON object.
pub fn arguments_to_json(args: &Arguments) -> Value {
    Value::Object(
        args.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<Map<String, Value>>(),
    )
}

/// Collects every reference in a set of arguments.
pub fn argument_references(args: &Arguments) -> Vec<&Reference> {
    args.values().flat_map(ArgValue::references).collect()
}
