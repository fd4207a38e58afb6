//! Common test utilities for plan execution tests.

use async_trait::async_trait;
use plan_agent::workflow::tools::{number_value, required_number, required_text};
use plan_agent::{ToolCall, ToolError, ToolInvoker};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Tool backend used by the integration tests.
///
/// Supports `add`, `multiply`, `concat`, `search_metrics`,
/// `query_metric`, `sleep`, `fail` and `flaky`. Every call is counted per
/// tool and the order of starts is recorded.
#[derive(Default)]
pub struct TestTools {
    calls: Mutex<HashMap<String, usize>>,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    flaky_failures: AtomicUsize,
}

impl TestTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `flaky` fail the given number of times before succeeding.
    pub fn with_flaky_failures(self, failures: usize) -> Self {
        self.flaky_failures.store(failures, Ordering::SeqCst);
        self
    }

    /// Returns how often a tool was invoked.
    pub fn calls(&self, tool: &str) -> usize {
        self.calls.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    /// Returns the task ids in the order their invocations started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Returns the highest number of simultaneous invocations seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let args = &call.arguments;
        match call.tool.as_str() {
            "add" => Ok(number_value(required_number(args, "a")? + required_number(args, "b")?)),
            "multiply" => Ok(number_value(required_number(args, "a")? * required_number(args, "b")?)),
            "concat" => Ok(json!(format!(
                "{}{}",
                required_text(args, "left")?,
                required_text(args, "right")?
            ))),
            "search_metrics" => {
                let query = required_text(args, "query")?;
                Ok(json!({
                    "results": [
                        {"metric_name": "negative_review_rate_034", "label": query, "score": 0.93},
                        {"metric_name": "negative_review_count_012", "label": query, "score": 0.41}
                    ]
                }))
            }
            "query_metric" => {
                let metric = required_text(args, "metric_name")?;
                Ok(json!({"metric_name": metric, "value": 0.034}))
            }
            "sleep" => {
                let ms = required_number(args, "ms")? as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            "fail" => Err(ToolError::ExecutionFailed("upstream unavailable".to_string())),
            "flaky" => {
                let remaining = self.flaky_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.flaky_failures.store(remaining - 1, Ordering::SeqCst);
                    Err(ToolError::ExecutionFailed("transient failure".to_string()))
                } else {
                    Ok(json!("recovered"))
                }
            }
            other => Err(ToolError::ToolNotFound(other.to_string())),
        }
    }
}

#[async_trait]
impl ToolInvoker for TestTools {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        *self.calls.lock().unwrap().entry(call.tool.clone()).or_insert(0) += 1;
        self.started.lock().unwrap().push(call.task_id.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.dispatch(call).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
