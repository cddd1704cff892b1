//! Aureus Policy Guard
//!
//! Every action a workflow attempts is evaluated by the goal guard: a
//! small state machine that approves, rejects, or parks the action until a
//! human approves it with a single-use token. Every transition is appended
//! to a hash-chained audit log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod guard;
pub mod hub;
pub mod principal;
pub mod state;
pub mod token;

pub use audit::{AuditEntry, AuditLog, StateTransition};
pub use classifier::{DeclaredTierClassifier, RiskAssessment, RiskClassifier, ScoreTableClassifier};
pub use config::{DenyRule, GuardConfig};
pub use error::GuardError;
pub use guard::{GoalGuard, GuardDecision, GuardEvaluation, PendingApproval};
pub use hub::{ApprovalEvent, ApprovalHub, HumanResponse};
pub use principal::{Action, Principal, PrincipalKind};
pub use state::{GoalGuardState, GuardFsm};
pub use token::{ApprovalToken, TokenStore};
