//! Tool trait

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// Arguments passed to a tool
pub type ToolArgs = Map<String, Value>;

/// Errors raised by tools
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under the name
    #[error("Tool not found: {name}")]
    NotFound {
        /// Requested name
        name: String,
    },

    /// The tool ran and reported failure
    #[error("Tool {tool} failed: {reason}")]
    Failed {
        /// Tool name
        tool: String,
        /// Failure description
        reason: String,
    },

    /// The arguments were rejected before running
    #[error("Invalid input for {tool}: {reason}")]
    InvalidInput {
        /// Tool name
        tool: String,
        /// What was wrong
        reason: String,
    },
}

impl ToolError {
    /// Convenience constructor for [`ToolError::Failed`]
    #[must_use]
    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// A named operation a task can invoke
///
/// Implementations must be cancellation safe: the runner drops the
/// invocation future when a timeout or workflow cancellation fires.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the tool is registered under
    fn name(&self) -> &str;

    /// Run the tool
    async fn invoke(&self, args: &ToolArgs) -> Result<Value, ToolError>;
}

/// Tool backed by a synchronous closure
pub struct FnTool<F> {
    name: String,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync,
{
    /// Wrap a closure as a tool
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        (self.func)(args)
    }
}

impl<F> fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_tool_invokes_closure() {
        let tool = FnTool::new("echo", |args: &ToolArgs| Ok(Value::Object(args.clone())));
        let mut args = ToolArgs::new();
        args.insert("path".to_string(), json!("/tmp/in.csv"));
        let out = tool.invoke(&args).await.unwrap();
        assert_eq!(out, json!({"path": "/tmp/in.csv"}));
        assert_eq!(tool.name(), "echo");
    }

    #[tokio::test]
    async fn test_fn_tool_propagates_failure() {
        let tool = FnTool::new("broken", |_: &ToolArgs| Err(ToolError::failed("broken", "disk full")));
        let err = tool.invoke(&ToolArgs::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool broken failed: disk full");
    }
}
