//! Tool registry keyed by name.

use crate::tool::{Tool, ToolError};
use indexmap::IndexMap;
use std::sync::Arc;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Tool already registered
    #[error("Tool already registered: {name}")]
    AlreadyRegistered {
        /// Conflicting name
        name: String,
    },
}

/// Registry of invocable tools
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name exists
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Register a tool, replacing any existing one of the same name
    #[must_use]
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    /// Get a tool by name
    ///
    /// # Errors
    ///
    /// Returns error if tool not found
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| ToolError::NotFound {
                name: name.to_string(),
            })
    }

    /// Check whether a tool is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, ToolArgs};
    use serde_json::Value;

    fn noop(name: &str) -> FnTool<impl Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync> {
        FnTool::new(name, |_: &ToolArgs| Ok(Value::Null))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(noop("read_file"))).unwrap();
        assert!(registry.contains("read_file"));
        assert!(registry.get("read_file").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ToolRegistry::new().with_tool(noop("read_file"));
        let err = registry.register(Arc::new(noop("read_file"))).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                name: "read_file".to_string()
            }
        );
    }

    #[test]
    fn test_get_missing() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.get("nope"), Err(ToolError::NotFound { .. })));
    }

    #[test]
    fn test_names_keep_order() {
        let registry = ToolRegistry::new().with_tool(noop("b")).with_tool(noop("a"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
