//! Goal guard state machine.
//!
//! ```text
//! idle -> evaluating -> approved | rejected | pending_human
//! pending_human -> approved | rejected
//! ```
//!
//! `approved` and `rejected` are terminal. A new evaluation starts a fresh
//! machine at `idle`.

use crate::error::GuardError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Guard state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalGuardState {
    /// Nothing evaluated yet
    Idle,
    /// Checks in progress
    Evaluating,
    /// The action may proceed
    Approved,
    /// The action must not proceed
    Rejected,
    /// Waiting for a human to present the approval token
    PendingHuman,
}

impl GoalGuardState {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::PendingHuman => "pending_human",
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Whether `self -> to` is a legal move
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Evaluating)
                | (Self::Evaluating, Self::Approved | Self::Rejected | Self::PendingHuman)
                | (Self::PendingHuman, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for GoalGuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluation's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardFsm {
    state: GoalGuardState,
}

impl GuardFsm {
    /// A fresh machine at `idle`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: GoalGuardState::Idle,
        }
    }

    /// Resume a machine parked in `state`
    #[must_use]
    pub const fn resume(state: GoalGuardState) -> Self {
        Self { state }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> GoalGuardState {
        self.state
    }

    /// Move to `to`, returning the previous state
    ///
    /// # Errors
    ///
    /// Returns error if the move is not legal
    pub fn transition(&mut self, to: GoalGuardState) -> Result<GoalGuardState, GuardError> {
        let from = self.state;
        if !from.can_transition(to) {
            return Err(GuardError::InvalidTransition { from, to });
        }
        self.state = to;
        Ok(from)
    }
}

impl Default for GuardFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GoalGuardState::*;

    #[test]
    fn test_legal_paths() {
        let mut fsm = GuardFsm::new();
        assert_eq!(fsm.transition(Evaluating).unwrap(), Idle);
        assert_eq!(fsm.transition(PendingHuman).unwrap(), Evaluating);
        assert_eq!(fsm.transition(Approved).unwrap(), PendingHuman);
        assert!(fsm.state().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [Approved, Rejected] {
            let mut fsm = GuardFsm::resume(terminal);
            for to in [Idle, Evaluating, Approved, Rejected, PendingHuman] {
                assert!(fsm.transition(to).is_err());
            }
        }
    }

    #[test]
    fn test_cannot_skip_evaluating() {
        let mut fsm = GuardFsm::new();
        assert_eq!(
            fsm.transition(Approved).unwrap_err(),
            GuardError::InvalidTransition { from: Idle, to: Approved }
        );
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&PendingHuman).unwrap(), "\"pending_human\"");
    }
}
