//! Workflow specification records.
//!
//! These mirror the JSON workflow documents accepted over the transport
//! surface. Decoding never validates; run [`crate::SpecValidator`] or
//! [`crate::DependencyGraph::resolve`] before execution.

use crate::error::PlanError;
use aureus_core::{DataZone, Intent, Permission, RiskTier, TaskId, WorkflowId};
use aureus_tool::SandboxConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// Task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Performs a tool invocation
    Action,
    /// Chooses between branches
    Decision,
    /// Groups concurrently runnable work
    Parallel,
}

/// Retry policy for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds (>= 1)
    pub backoff_ms: u64,
    /// Growth factor between delays (>= 0, default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    /// Add random jitter to each delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

impl RetryConfig {
    /// Create a retry policy with a constant delay
    #[must_use]
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_ms,
            backoff_multiplier: None,
            jitter: None,
        }
    }

    /// Set the multiplier
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Base delay after failed attempt `attempt` (1-based), without jitter
    ///
    /// `backoff_ms * multiplier^(attempt-1)`, saturating.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.unwrap_or(1.0);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.backoff_ms as f64 * multiplier.powi(exponent);
        if millis.is_finite() && millis >= 0.0 {
            Duration::from_millis(millis.min(u64::MAX as f64) as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Whether jitter is enabled
    #[must_use]
    pub fn jitter_enabled(&self) -> bool {
        self.jitter.unwrap_or(false)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Tools to run when a task fails or times out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationHook {
    /// Tool to run after a final failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Tool to run after a timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<String>,
}

/// An explicit compensating tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    /// Tool to execute
    pub tool: String,
    /// Tool arguments
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// A task within a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task identifier
    pub id: TaskId,
    /// Human-readable name
    pub name: String,
    /// Task kind
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Tool inputs
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Deduplicates re-submission of the same logical task instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Declared risk tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    /// Compensation hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationHook>,
    /// Explicit compensation call, preferred over hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_action: Option<CompensationAction>,
    /// Tool to execute; tasks without one pass their inputs through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Permissions the acting principal must hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permissions: Option<Vec<Permission>>,
    /// Tools the task may use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Declared intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Data zone touched by the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Isolation boundary for execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_config: Option<SandboxConfig>,
}

impl TaskSpec {
    /// Create an action task invoking `tool`
    #[must_use]
    pub fn action(id: impl Into<TaskId>, tool: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            task_type: TaskType::Action,
            inputs: Map::new(),
            retry: None,
            idempotency_key: None,
            timeout_ms: None,
            risk_tier: None,
            compensation: None,
            compensation_action: None,
            tool_name: Some(tool.into()),
            required_permissions: None,
            allowed_tools: None,
            intent: None,
            data_zone: None,
            sandbox_config: None,
        }
    }

    /// Set an input value
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the risk tier
    #[must_use]
    pub fn with_risk_tier(mut self, tier: RiskTier) -> Self {
        self.risk_tier = Some(tier);
        self
    }

    /// Set the idempotency key
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the compensating call
    #[must_use]
    pub fn with_compensation_action(mut self, action: CompensationAction) -> Self {
        self.compensation_action = Some(action);
        self
    }

    /// Set the compensation hooks
    #[must_use]
    pub fn with_compensation(mut self, hook: CompensationHook) -> Self {
        self.compensation = Some(hook);
        self
    }

    /// Set required permissions
    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.required_permissions = Some(permissions);
        self
    }

    /// Set the sandbox
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox_config = Some(sandbox);
        self
    }

    /// Effective risk tier (low when undeclared)
    #[must_use]
    pub fn effective_risk_tier(&self) -> RiskTier {
        self.risk_tier.unwrap_or_default()
    }

    /// Effective retry policy (a single attempt when undeclared)
    #[must_use]
    pub fn effective_retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Per-attempt timeout, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A safety rule attached to a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRule {
    /// Rule type
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Rule description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Safety policy for workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Policy name
    pub name: String,
    /// Policy description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Safety rules
    #[serde(default)]
    pub rules: Vec<SafetyRule>,
    /// Abort not-yet-started tasks on the first irrecoverable failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
}

/// A complete workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Unique workflow identifier
    pub id: WorkflowId,
    /// Workflow name
    pub name: String,
    /// Workflow goal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Workflow constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    /// Success criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<Vec<String>>,
    /// Tasks in declaration order
    pub tasks: Vec<TaskSpec>,
    /// task id -> ids of the tasks it depends on
    #[serde(default)]
    pub dependencies: IndexMap<TaskId, Vec<TaskId>>,
    /// Safety policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_policy: Option<SafetyPolicy>,
}

impl WorkflowSpec {
    /// Create an empty workflow
    #[must_use]
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            goal: None,
            constraints: None,
            success_criteria: None,
            tasks: Vec::new(),
            dependencies: IndexMap::new(),
            safety_policy: None,
        }
    }

    /// Append a task
    #[must_use]
    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Declare that `task` depends on every id in `on`
    #[must_use]
    pub fn with_dependency(mut self, task: impl Into<TaskId>, on: &[&str]) -> Self {
        self.dependencies
            .entry(task.into())
            .or_default()
            .extend(on.iter().map(|id| TaskId::new(*id)));
        self
    }

    /// Set the safety policy
    #[must_use]
    pub fn with_safety_policy(mut self, policy: SafetyPolicy) -> Self {
        self.safety_policy = Some(policy);
        self
    }

    /// Whether an irrecoverable failure aborts the rest of the workflow
    #[must_use]
    pub fn fail_fast(&self) -> bool {
        self.safety_policy
            .as_ref()
            .and_then(|p| p.fail_fast)
            .unwrap_or(false)
    }

    /// Find a task by id
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Decode from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        serde_json::from_str(json).map_err(|e| PlanError::Decode(e.to_string()))
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlanError::Decode(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_sdk_document() {
        let doc = json!({
            "id": "example-workflow-001",
            "name": "Example Workflow",
            "goal": "Process data safely",
            "tasks": [{
                "id": "task1",
                "name": "Read Data",
                "type": "action",
                "tool_name": "read_file",
                "risk_tier": "LOW",
                "retry": {"max_attempts": 3, "backoff_ms": 100, "backoff_multiplier": 2.0}
            }],
            "dependencies": {"task1": []},
            "safety_policy": {"name": "strict", "rules": [], "fail_fast": true}
        });
        let spec = WorkflowSpec::from_json(&doc.to_string()).unwrap();
        assert_eq!(spec.tasks.len(), 1);
        assert_eq!(spec.tasks[0].task_type, TaskType::Action);
        assert_eq!(spec.tasks[0].effective_risk_tier(), RiskTier::Low);
        assert!(spec.fail_fast());
    }

    #[test]
    fn test_decode_rejects_missing_tasks() {
        let err = WorkflowSpec::from_json(r#"{"id": "w", "name": "n"}"#).unwrap_err();
        assert!(matches!(err, PlanError::Decode(_)));
    }

    #[test]
    fn test_delay_after_exponential() {
        let retry = RetryConfig::new(4, 100).with_multiplier(2.0);
        assert_eq!(retry.delay_after(1), Duration::from_millis(100));
        assert_eq!(retry.delay_after(2), Duration::from_millis(200));
        assert_eq!(retry.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_after_default_multiplier() {
        let retry = RetryConfig::new(3, 50);
        assert_eq!(retry.delay_after(1), Duration::from_millis(50));
        assert_eq!(retry.delay_after(3), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_after_zero_multiplier() {
        let retry = RetryConfig::new(3, 50).with_multiplier(0.0);
        assert_eq!(retry.delay_after(1), Duration::from_millis(50));
        assert_eq!(retry.delay_after(2), Duration::ZERO);
    }

    #[test]
    fn test_fail_fast_defaults_off() {
        let spec = WorkflowSpec::new("w", "n");
        assert!(!spec.fail_fast());
    }

    #[test]
    fn test_with_dependency_builder() {
        let spec = WorkflowSpec::new("w", "n")
            .with_task(TaskSpec::action("a", "t"))
            .with_task(TaskSpec::action("b", "t"))
            .with_dependency("b", &["a"]);
        assert_eq!(spec.dependencies[&TaskId::new("b")], vec![TaskId::new("a")]);
        assert!(spec.task(&TaskId::new("a")).is_some());
    }
}
