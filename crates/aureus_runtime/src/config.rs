//! Engine configuration.

use aureus_core::Permission;
use aureus_policy::{GuardConfig, Principal};
use aureus_tool::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workflow engine configuration
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Goal guard settings
    pub guard: GuardConfig,
    /// Principal used when the caller supplies none
    pub principal: Principal,
    /// Workflow deadline in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Sandbox for tasks that declare none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sandbox: Option<SandboxConfig>,
    /// Overrides the workflow's `fail_fast` setting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    /// Largest workflow accepted
    pub max_tasks: usize,
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            guard: GuardConfig::default(),
            principal: Principal::agent("aureus-engine").with_permission(Permission::new("*", "*")),
            deadline_ms: None,
            default_sandbox: None,
            fail_fast: None,
            max_tasks: 10_000,
        }
    }

    /// Set the guard configuration
    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// Set the default principal
    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Set the workflow deadline
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Route tasks without a sandbox through `sandbox`
    #[must_use]
    pub fn with_default_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.default_sandbox = Some(sandbox);
        self
    }

    /// Force `fail_fast` on or off
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    /// Set the task limit
    #[must_use]
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Workflow deadline, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
