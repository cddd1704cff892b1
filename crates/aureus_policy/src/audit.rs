//! Guard audit trail.

use crate::error::GuardError;
use crate::guard::GuardDecision;
use crate::principal::{Action, Principal};
use crate::state::GoalGuardState;
use aureus_core::{Clock, PrincipalId};
use aureus_log::{ChainError, EventLog, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A guard state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Source state
    pub from: GoalGuardState,
    /// Target state
    pub to: GoalGuardState,
}

/// One audited guard step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the step happened
    pub timestamp: DateTime<Utc>,
    /// Acting principal
    pub principal: Principal,
    /// Attempted action
    pub action: Action,
    /// Decision at this step
    pub decision: GuardDecision,
    /// State change, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_transition: Option<StateTransition>,
    /// Approval token involved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
}

impl AuditEntry {
    /// Whether this entry moved the guard into `state`
    #[must_use]
    pub fn entered(&self, state: GoalGuardState) -> bool {
        self.state_transition.is_some_and(|t| t.to == state)
    }
}

/// Append-only, hash-chained audit log shared by every guard instance
///
/// The guard reads it to detect repeated denials but never rewrites it.
#[derive(Debug, Clone)]
pub struct AuditLog {
    log: EventLog<AuditEntry>,
}

impl AuditLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: EventLog::new(),
        }
    }

    /// Create an empty log on `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: EventLog::with_clock(clock),
        }
    }

    /// Append an entry
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be encoded
    pub fn append(&self, entry: AuditEntry) -> Result<Record<AuditEntry>, GuardError> {
        Ok(self.log.append(entry)?)
    }

    /// Number of prior rejections of `action_name` for `principal`
    #[must_use]
    pub fn rejections_for(&self, principal: &PrincipalId, action_name: &str) -> usize {
        self.log.count_matching(|entry| {
            &entry.principal.id == principal
                && entry.action.name == action_name
                && entry.entered(GoalGuardState::Rejected)
        })
    }

    /// Every entry in append order
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.log.read(|records| records.iter().map(|r| r.payload.clone()).collect())
    }

    /// Every sealed record in append order
    #[must_use]
    pub fn records(&self) -> Vec<Record<AuditEntry>> {
        self.log.records()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Verify the hash chain
    ///
    /// # Errors
    ///
    /// Returns the first broken link
    pub fn verify(&self) -> Result<(), ChainError> {
        self.log.verify()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
