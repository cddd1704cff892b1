//! Task and workflow results.

use crate::error::ErrorKind;
use crate::telemetry::Metrics;
use aureus_core::{RunId, TaskId, WorkflowId};
use aureus_crv::{GateResult, RecoveryResult};
use aureus_policy::GuardDecision;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Terminal status of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task ran and its commit was accepted
    Success,
    /// The task ran and did not recover
    Failed,
    /// The task never ran
    Skipped,
}

/// A compensating call made after a task's final failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    /// Tool invoked
    pub tool: String,
    /// Whether the compensating call succeeded
    pub success: bool,
    /// Failure of the compensating call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    /// Task identifier
    pub task_id: TaskId,
    /// success, failed or skipped
    pub status: TaskStatus,
    /// Accepted output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent on the task
    pub duration_ms: f64,
    /// Tool invocations made, alternate-tool runs included
    #[serde(default)]
    pub attempts: u32,
    /// Failure or skip classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Why the task was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Recovery strategies applied to blocked commits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<RecoveryResult>,
    /// Compensation run after the final failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationOutcome>,
    /// Whether the result came from the idempotency cache
    #[serde(default)]
    pub cached: bool,
    /// Last gate verdict on the task's commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_result: Option<GateResult>,
    /// Guard decision for the task's action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_decision: Option<GuardDecision>,
}

impl TaskExecutionResult {
    fn base(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            result: None,
            error: None,
            duration_ms: 0.0,
            attempts: 0,
            error_kind: None,
            skip_reason: None,
            recovery: Vec::new(),
            compensation: None,
            cached: false,
            gate_result: None,
            guard_decision: None,
        }
    }

    /// A task that produced `value`
    #[must_use]
    pub fn succeeded(task_id: TaskId, value: Value) -> Self {
        Self {
            result: Some(value),
            ..Self::base(task_id, TaskStatus::Success)
        }
    }

    /// A task that failed with `kind`
    #[must_use]
    pub fn failed(task_id: TaskId, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Self::base(task_id, TaskStatus::Failed)
        }
    }

    /// A task that never ran
    #[must_use]
    pub fn skipped(task_id: TaskId, kind: ErrorKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            error: Some(reason.clone()),
            error_kind: Some(kind),
            skip_reason: Some(reason),
            ..Self::base(task_id, TaskStatus::Skipped)
        }
    }

    /// Set the attempt count
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the duration
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_secs_f64() * 1000.0;
        self
    }

    /// Attach the guard decision
    #[must_use]
    pub fn with_guard_decision(mut self, decision: GuardDecision) -> Self {
        self.guard_decision = Some(decision);
        self
    }

    /// Attach the gate verdict
    #[must_use]
    pub fn with_gate_result(mut self, result: GateResult) -> Self {
        self.gate_result = Some(result);
        self
    }

    /// Record a recovery event
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryResult) -> Self {
        self.recovery.push(recovery);
        self
    }

    /// Whether the task succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Overall workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Every task succeeded
    Success,
    /// Some tasks were skipped or failed and the workflow tolerates it
    Partial,
    /// The workflow did not complete
    Failed,
}

/// Result of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    /// Workflow identifier
    pub workflow_id: WorkflowId,
    /// Run identifier
    pub run_id: RunId,
    /// success, partial or failed
    pub status: WorkflowStatus,
    /// Per-task results in task declaration order
    pub task_results: IndexMap<TaskId, TaskExecutionResult>,
    /// Workflow-level error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Workflow-level error classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Wall time of the run
    pub duration_ms: f64,
    /// Caller's correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Counters for the run
    pub metrics: Metrics,
}

impl WorkflowExecutionResult {
    /// Result of a task
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&TaskExecutionResult> {
        self.task_results.get(&TaskId::new(id))
    }

    /// Status of a task
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.task(id).map(|r| r.status)
    }

    /// Tasks with `status`, in declaration order
    #[must_use]
    pub fn tasks_with(&self, status: TaskStatus) -> Vec<&TaskId> {
        self.task_results
            .values()
            .filter(|r| r.status == status)
            .map(|r| &r.task_id)
            .collect()
    }
}
