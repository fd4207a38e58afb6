//! Reference expression syntax.
//!
//! Task arguments wire the output of earlier tasks into later ones with
//! two token forms:
//!
//! - `${task_id}` refers to the whole stored result
//! - `${task_id.field}` refers to one field of the stored result
//!
//! Tokens may make up a whole argument string or be embedded in a larger
//! string. Text that looks like `${...}` but does not match the grammar is
//! left alone.

use crate::types::TaskId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^\s.{}$]+)(?:\.([^\s.{}$]+))?\}").expect("reference pattern is valid")
    })
}

/// A parsed `${task_id}` or `${task_id.field}` token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Task whose result is referenced
    pub task_id: TaskId,
    /// Single-level field of the result, if any
    pub field: Option<String>,
}

impl Reference {
    /// Creates a whole-result reference.
    pub fn whole(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            field: None,
        }
    }

    /// Creates a field-level reference.
    pub fn field(task_id: impl Into<TaskId>, field: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            field: Some(field.into()),
        }
    }

    /// Parses a string that consists of exactly one reference token.
    ///
    /// Returns `None` if the string holds anything besides the token.
    pub fn parse_whole(text: &str) -> Option<Self> {
        let caps = pattern().captures(text)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != text.len() {
            return None;
        }
        Some(Self::from_captures(&caps))
    }

    fn from_captures(caps: &regex::Captures<'_>) -> Self {
        Self {
            task_id: TaskId::new(&caps[1]),
            field: caps.get(2).map(|m| m.as_str().to_string()),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "${{{}.{}}}", self.task_id, field),
            None => write!(f, "${{{}}}", self.task_id),
        }
    }
}

/// One piece of a string with embedded references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Literal text copied through unchanged
    Text(String),
    /// Reference replaced by the stringified referenced value
    Ref(Reference),
}

/// Returns every reference token in the text, in order of appearance.
pub fn scan(text: &str) -> Vec<Reference> {
    pattern()
        .captures_iter(text)
        .map(|caps| Reference::from_captures(&caps))
        .collect()
}

/// Splits the text into literal and reference segments.
///
/// Returns `None` when the text holds no reference at all.
pub fn split_segments(text: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in pattern().captures_iter(text) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        if token.start() > last {
            segments.push(Segment::Text(text[last..token.start()].to_string()));
        }
        segments.push(Segment::Ref(Reference::from_captures(&caps)));
        last = token.end();
    }

    if segments.is_empty() {
        return None;
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    Some(segments)
}
