//! Guard errors.

use crate::state::GoalGuardState;

/// Errors raised by the goal guard and its token store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// No token with this value was ever issued
    #[error("Unknown approval token: {token}")]
    UnknownToken {
        /// Presented token
        token: String,
    },

    /// The token was already consumed
    #[error("Approval token already used: {token}")]
    ApprovalTokenReused {
        /// Presented token
        token: String,
    },

    /// The token expired before it was presented
    #[error("Approval token expired: {token}")]
    ApprovalExpired {
        /// Presented token
        token: String,
    },

    /// The token was issued for a different action or principal
    #[error("Approval token {token} was issued for {expected}, not {actual}")]
    TokenMismatch {
        /// Presented token
        token: String,
        /// Action and principal it was issued for
        expected: String,
        /// Action and principal it was presented with
        actual: String,
    },

    /// The state machine does not allow this move
    #[error("Invalid guard transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: GoalGuardState,
        /// Requested state
        to: GoalGuardState,
    },

    /// The audit log refused an entry
    #[error("Audit append failed: {0}")]
    Audit(String),
}

impl From<aureus_core::CoreError> for GuardError {
    fn from(err: aureus_core::CoreError) -> Self {
        Self::Audit(err.to_string())
    }
}
