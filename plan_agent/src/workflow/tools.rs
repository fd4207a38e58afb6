//! Tool invocation seam.
//!
//! The executor never calls tools directly. It hands a [`ToolCall`] to a
//! [`ToolInvoker`], which may be an in-process [`ToolRegistry`], a remote
//! tool protocol client, or a scripted test double.
//!
//! # Example
//!
//! ```ignore
//! use plan_agent::workflow::tools::{FunctionTool, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(FunctionTool::sync("add", "Add two numbers", |args| {
//!     Ok(json!(required_number(args, "a")? + required_number(args, "b")?))
//! }))?;
//! ```

use async_trait::async_trait;
use plan_core::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A fully resolved request to run one tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    /// Task issuing the call
    pub task_id: TaskId,
    /// Tool name
    pub tool: String,
    /// Arguments with every reference substituted
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Creates a new tool call.
    pub fn new(task_id: impl Into<TaskId>, tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            task_id: task_id.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tool, Value::Object(self.arguments.clone()))
    }
}

/// Errors that can occur during tool operations.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// Tool not found in registry
    #[error("Tool not registered: {0}")]
    ToolNotFound(String),

    /// Tool ran and reported a failure
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool execution timed out
    #[error("Tool timed out: {0}")]
    Timeout(String),

    /// Invocation was cancelled before it finished
    #[error("Tool invocation cancelled: {0}")]
    Cancelled(String),

    /// Arguments did not match what the tool expects
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool already registered
    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),
}

/// Name and description of an available tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name used in plans
    pub name: String,
    /// Human-readable description for the planning collaborator
    pub description: String,
}

/// Anything that can run a tool call.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Runs the call and returns its structured result.
    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError>;

    /// Lists the tools this invoker can run.
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
type ToolHandler = Arc<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>;

/// An in-process tool backed by a closure.
#[derive(Clone)]
pub struct FunctionTool {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
}

impl FunctionTool {
    /// Creates a tool from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            descriptor: ToolDescriptor {
                name: name.into(),
                description: description.into(),
            },
            handler: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// Creates a tool from a synchronous closure.
    pub fn sync<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, description, move |args| {
            let f = Arc::clone(&f);
            async move { f(&args) }
        })
    }

    /// Returns the tool name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Returns the tool descriptor.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.descriptor.name)
            .finish()
    }
}

/// Registry of in-process tools.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, FunctionTool>,
}

impl ToolRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if registration succeeded
    /// - `Err(ToolError::AlreadyRegistered)` if a tool with the same name exists
    pub fn register(&mut self, tool: FunctionTool) -> Result<(), ToolError> {
        if self.tools.contains_key(tool.name()) {
            return Err(ToolError::AlreadyRegistered(tool.name().to_string()));
        }
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    /// Returns true if a tool with this name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.tool)
            .ok_or_else(|| ToolError::ToolNotFound(call.tool.clone()))?;
        tool.call(call.arguments.clone()).await
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor().clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// Reads a numeric argument, accepting numbers and numeric strings.
pub fn required_number(args: &Map<String, Value>, name: &str) -> Result<f64, ToolError> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ToolError::InvalidArguments(format!("{} is not a finite number", name))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ToolError::InvalidArguments(format!("{} is not a number: {}", name, s))),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "{} must be a number, got {}",
            name, other
        ))),
        None => Err(ToolError::InvalidArguments(format!("missing argument {}", name))),
    }
}

/// Reads an argument as text; non-string values use their JSON form.
pub fn required_text(args: &Map<String, Value>, name: &str) -> Result<String, ToolError> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(ToolError::InvalidArguments(format!("missing argument {}", name))),
    }
}

/// Converts a float result back to an integer JSON number when it is integral.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
