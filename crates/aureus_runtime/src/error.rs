//! Execution errors and the failure taxonomy reported on results.

use aureus_crv::CrvError;
use aureus_plan::PlanError;
use aureus_policy::GuardError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a task or workflow did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The dependency mapping has a cycle
    CyclicDependency,
    /// A dependency names a task that does not exist
    UnknownTaskReference,
    /// The workflow or a gate binding failed validation
    InvalidWorkflow,
    /// Every attempt timed out on the last try
    TaskTimeout,
    /// The tool failed on the last attempt
    TaskExecutionFailure,
    /// The gate blocked the commit and recovery did not rescue it
    CrvBlocked,
    /// The guard rejected the action
    GuardRejected,
    /// No approval arrived before the token expired
    ApprovalExpired,
    /// An approval token was presented twice
    ApprovalTokenReused,
    /// A dependency did not succeed
    UpstreamSkipped,
    /// Aborted by `fail_fast` or cancellation
    Aborted,
    /// The workflow deadline elapsed
    Timeout,
}

impl ErrorKind {
    /// Kind for a guard error
    #[must_use]
    pub const fn from_guard(err: &GuardError) -> Self {
        match err {
            GuardError::ApprovalExpired { .. } => Self::ApprovalExpired,
            GuardError::ApprovalTokenReused { .. } => Self::ApprovalTokenReused,
            _ => Self::GuardRejected,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Errors that stop a workflow before or while it runs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The dependency graph could not be ordered
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The workflow document violates one or more invariants
    #[error("Invalid workflow: {}", join(.0))]
    Invalid(Vec<PlanError>),

    /// A gate binding names unknown validators or bad bounds
    #[error(transparent)]
    Gate(#[from] CrvError),

    /// The guard could not record a decision
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// The workflow ran past its deadline
    #[error("Workflow deadline of {}ms elapsed", .0.as_millis())]
    DeadlineElapsed(Duration),

    /// The caller cancelled the run
    #[error("Workflow cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Kind reported on the workflow result
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Plan(err) => plan_kind(err),
            Self::Invalid(errs) => errs.first().map_or(ErrorKind::InvalidWorkflow, plan_kind),
            Self::Gate(_) => ErrorKind::InvalidWorkflow,
            Self::Guard(err) => ErrorKind::from_guard(err),
            Self::DeadlineElapsed(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Aborted,
        }
    }
}

fn plan_kind(err: &PlanError) -> ErrorKind {
    match err {
        PlanError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
        PlanError::UnknownTaskReference { .. } => ErrorKind::UnknownTaskReference,
        _ => ErrorKind::InvalidWorkflow,
    }
}

fn join(errors: &[PlanError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
