//! Sandbox routing.
//!
//! A task's [`SandboxConfig`] names the isolation boundary its tool call
//! runs in. `mock` and `simulation` are served by a [`SimulatedSandbox`]
//! and never reach the native registry. `container`, `vm` and `process`
//! need a registered [`SandboxExecutor`]; without one the call fails
//! instead of falling back to native execution.

use crate::registry::ToolRegistry;
use crate::tool::{ToolArgs, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Isolation boundary kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Canned responses, no side effects
    Mock,
    /// Simulated execution, no side effects
    Simulation,
    /// Container boundary
    Container,
    /// Virtual machine boundary
    Vm,
    /// Separate process boundary
    Process,
}

impl SandboxMode {
    /// Whether this boundary performs no real side effects
    #[must_use]
    pub const fn is_simulated(self) -> bool {
        matches!(self, Self::Mock | Self::Simulation)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Simulation => "simulation",
            Self::Container => "container",
            Self::Vm => "vm",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permissions granted inside a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPermissions {
    /// Tools callable inside the boundary (unset = any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Whether network access is granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<bool>,
}

/// Sandbox configuration for task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Enable the sandbox
    pub enabled: bool,
    /// Boundary kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SandboxMode>,
    /// Force simulated execution regardless of `mode`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_mode: Option<bool>,
    /// Granted permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<SandboxPermissions>,
}

impl SandboxConfig {
    /// An enabled sandbox of the given kind
    #[must_use]
    pub fn new(mode: SandboxMode) -> Self {
        Self {
            enabled: true,
            mode: Some(mode),
            simulation_mode: None,
            permissions: None,
        }
    }

    /// Shorthand for a simulation sandbox
    #[must_use]
    pub fn simulation() -> Self {
        Self::new(SandboxMode::Simulation)
    }

    /// Restrict the callable tools
    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.permissions.get_or_insert_with(SandboxPermissions::default).allowed_tools = Some(tools);
        self
    }

    /// Boundary the call runs in, or `None` for native execution
    ///
    /// An enabled sandbox without a kind runs simulated.
    #[must_use]
    pub fn effective_mode(&self) -> Option<SandboxMode> {
        if !self.enabled {
            return None;
        }
        if self.simulation_mode == Some(true) {
            return Some(SandboxMode::Simulation);
        }
        Some(self.mode.unwrap_or(SandboxMode::Simulation))
    }

    /// Whether `tool` may run inside this sandbox
    #[must_use]
    pub fn permits(&self, tool: &str) -> bool {
        self.permissions
            .as_ref()
            .and_then(|p| p.allowed_tools.as_ref())
            .is_none_or(|allowed| allowed.iter().any(|t| t == tool))
    }
}

/// Sandbox routing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The tool is outside the task's or sandbox's allowed set
    #[error("Tool {tool} is not permitted in {boundary}")]
    ToolNotPermitted {
        /// Tool name
        tool: String,
        /// Boundary that refused it
        boundary: String,
    },

    /// No executor registered for the requested boundary
    #[error("No executor available for {mode} sandbox")]
    BoundaryUnavailable {
        /// Requested boundary
        mode: SandboxMode,
    },

    /// The tool itself failed
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl SandboxError {
    /// Whether another attempt could succeed
    ///
    /// Any failure the tool itself reported is retried. Routing refusals and
    /// unknown tools fail the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Tool(ToolError::Failed { .. } | ToolError::InvalidInput { .. })
        )
    }
}

/// Executes tool calls inside an isolation boundary
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Boundary kind served
    fn mode(&self) -> SandboxMode;

    /// Run `tool` with `args` inside the boundary
    async fn execute(
        &self,
        tool: &str,
        args: &ToolArgs,
        config: &SandboxConfig,
    ) -> Result<Value, SandboxError>;
}

/// Side-effect-free executor for `mock` and `simulation` sandboxes
///
/// Tools registered here are simulated stand-ins; unknown tools get a
/// synthetic result describing the call.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSandbox {
    doubles: ToolRegistry,
}

impl SimulatedSandbox {
    /// Create a sandbox with no stand-ins
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sandbox backed by stand-in tools
    #[must_use]
    pub fn with_doubles(doubles: ToolRegistry) -> Self {
        Self { doubles }
    }

    /// Run a call without side effects
    ///
    /// # Errors
    ///
    /// Returns error if a stand-in tool fails
    pub async fn run(
        &self,
        mode: SandboxMode,
        tool: &str,
        args: &ToolArgs,
    ) -> Result<Value, SandboxError> {
        if let Ok(double) = self.doubles.get(tool) {
            return Ok(double.invoke(args).await?);
        }
        Ok(json!({
            "simulated": true,
            "mode": mode.as_str(),
            "tool": tool,
            "args": Value::Object(args.clone()),
        }))
    }
}

#[async_trait]
impl SandboxExecutor for SimulatedSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Simulation
    }

    async fn execute(
        &self,
        tool: &str,
        args: &ToolArgs,
        config: &SandboxConfig,
    ) -> Result<Value, SandboxError> {
        let mode = config.effective_mode().unwrap_or(SandboxMode::Simulation);
        self.run(mode, tool, args).await
    }
}

/// Routes tool calls to the native registry or an isolation boundary
#[derive(Clone, Default)]
pub struct SandboxRouter {
    native: Arc<ToolRegistry>,
    simulated: Arc<SimulatedSandbox>,
    boundaries: HashMap<SandboxMode, Arc<dyn SandboxExecutor>>,
}

impl SandboxRouter {
    /// Create a router over the native tool registry
    #[must_use]
    pub fn new(native: ToolRegistry) -> Self {
        Self {
            native: Arc::new(native),
            simulated: Arc::new(SimulatedSandbox::new()),
            boundaries: HashMap::new(),
        }
    }

    /// Use stand-in tools for simulated boundaries
    #[must_use]
    pub fn with_simulated(mut self, simulated: SimulatedSandbox) -> Self {
        self.simulated = Arc::new(simulated);
        self
    }

    /// Register an executor for a real boundary
    #[must_use]
    pub fn with_boundary(mut self, executor: Arc<dyn SandboxExecutor>) -> Self {
        self.boundaries.insert(executor.mode(), executor);
        self
    }

    /// Native registry
    #[must_use]
    pub fn native(&self) -> &ToolRegistry {
        &self.native
    }

    /// Invoke `tool`, honoring the task's allowed tools and sandbox
    ///
    /// # Errors
    ///
    /// Returns error if the tool is not permitted, the boundary has no
    /// executor, or the tool fails
    pub async fn invoke(
        &self,
        tool: &str,
        args: &ToolArgs,
        sandbox: Option<&SandboxConfig>,
        allowed_tools: Option<&[String]>,
    ) -> Result<Value, SandboxError> {
        if let Some(allowed) = allowed_tools {
            if !allowed.iter().any(|t| t == tool) {
                return Err(SandboxError::ToolNotPermitted {
                    tool: tool.to_string(),
                    boundary: "task".to_string(),
                });
            }
        }

        let Some(config) = sandbox.filter(|c| c.enabled) else {
            tracing::trace!(tool, "native tool call");
            let handle = self.native.get(tool)?;
            return Ok(handle.invoke(args).await?);
        };

        let mode = config.effective_mode().unwrap_or(SandboxMode::Simulation);
        if !config.permits(tool) {
            return Err(SandboxError::ToolNotPermitted {
                tool: tool.to_string(),
                boundary: format!("{mode} sandbox"),
            });
        }

        tracing::trace!(tool, %mode, "sandboxed tool call");
        if mode.is_simulated() {
            return self.simulated.run(mode, tool, args).await;
        }
        match self.boundaries.get(&mode) {
            Some(executor) => executor.execute(tool, args, config).await,
            None => Err(SandboxError::BoundaryUnavailable { mode }),
        }
    }
}

impl fmt::Debug for SandboxRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxRouter")
            .field("native", &self.native)
            .field("boundaries", &self.boundaries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FnTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
        ToolRegistry::new().with_tool(FnTool::new("delete_record", move |_: &ToolArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"deleted": true}))
        }))
    }

    struct FakeContainer;

    #[async_trait]
    impl SandboxExecutor for FakeContainer {
        fn mode(&self) -> SandboxMode {
            SandboxMode::Container
        }

        async fn execute(
            &self,
            tool: &str,
            _args: &ToolArgs,
            _config: &SandboxConfig,
        ) -> Result<Value, SandboxError> {
            Ok(json!({"container": tool}))
        }
    }

    #[tokio::test]
    async fn test_native_without_sandbox() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = SandboxRouter::new(counting_registry(Arc::clone(&calls)));
        let out = router.invoke("delete_record", &ToolArgs::new(), None, None).await.unwrap();
        assert_eq!(out, json!({"deleted": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_simulation_never_touches_native() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = SandboxRouter::new(counting_registry(Arc::clone(&calls)));
        for mode in [SandboxMode::Mock, SandboxMode::Simulation] {
            let out = router
                .invoke("delete_record", &ToolArgs::new(), Some(&SandboxConfig::new(mode)), None)
                .await
                .unwrap();
            assert_eq!(out["simulated"], json!(true));
            assert_eq!(out["mode"], json!(mode.as_str()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_simulation_mode_flag_overrides_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = SandboxRouter::new(counting_registry(Arc::clone(&calls)));
        let mut config = SandboxConfig::new(SandboxMode::Process);
        config.simulation_mode = Some(true);
        router.invoke("delete_record", &ToolArgs::new(), Some(&config), None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_boundary_fails_closed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = SandboxRouter::new(counting_registry(Arc::clone(&calls)));
        let err = router
            .invoke("delete_record", &ToolArgs::new(), Some(&SandboxConfig::new(SandboxMode::Vm)), None)
            .await
            .unwrap_err();
        assert_eq!(err, SandboxError::BoundaryUnavailable { mode: SandboxMode::Vm });
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tool_reported_failures_are_retryable() {
        let invalid = SandboxError::from(ToolError::InvalidInput {
            tool: "update_record".to_string(),
            reason: "missing id".to_string(),
        });
        assert!(invalid.is_retryable());
        assert!(SandboxError::from(ToolError::failed("update_record", "locked")).is_retryable());
        assert!(!SandboxError::from(ToolError::NotFound { name: "nope".to_string() }).is_retryable());
        let refused = SandboxError::ToolNotPermitted {
            tool: "delete_record".to_string(),
            boundary: "task".to_string(),
        };
        assert!(!refused.is_retryable());
    }

    #[tokio::test]
    async fn test_registered_boundary() {
        let router = SandboxRouter::new(ToolRegistry::new()).with_boundary(Arc::new(FakeContainer));
        let out = router
            .invoke("build", &ToolArgs::new(), Some(&SandboxConfig::new(SandboxMode::Container)), None)
            .await
            .unwrap();
        assert_eq!(out, json!({"container": "build"}));
    }

    #[tokio::test]
    async fn test_allowed_tools_enforced() {
        let router = SandboxRouter::new(ToolRegistry::new());
        let allowed = vec!["read_file".to_string()];
        let err = router
            .invoke("delete_record", &ToolArgs::new(), None, Some(allowed.as_slice()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ToolNotPermitted { .. }));

        let config = SandboxConfig::simulation().with_allowed_tools(allowed);
        let err = router
            .invoke("delete_record", &ToolArgs::new(), Some(&config), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ToolNotPermitted { .. }));
    }

    #[tokio::test]
    async fn test_disabled_sandbox_runs_native() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = SandboxRouter::new(counting_registry(Arc::clone(&calls)));
        let mut config = SandboxConfig::simulation();
        config.enabled = false;
        router.invoke("delete_record", &ToolArgs::new(), Some(&config), None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_simulated_doubles() {
        let doubles = ToolRegistry::new().with_tool(FnTool::new("read_file", |_: &ToolArgs| {
            Ok(json!({"rows": 3}))
        }));
        let router = SandboxRouter::new(ToolRegistry::new())
            .with_simulated(SimulatedSandbox::with_doubles(doubles));
        let out = router
            .invoke("read_file", &ToolArgs::new(), Some(&SandboxConfig::simulation()), None)
            .await
            .unwrap();
        assert_eq!(out, json!({"rows": 3}));
    }

    #[test]
    fn test_config_decodes_type_field() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"enabled": true, "type": "container"}"#).unwrap();
        assert_eq!(config.effective_mode(), Some(SandboxMode::Container));
    }
}
