//! Aureus Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! All types are serializable with serde so specs, decisions, and results
//! can cross the transport boundary as structured records.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod permission;
pub mod risk;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::Digest;
pub use id::{ActionId, CommitId, PrincipalId, RunId, TaskId, WorkflowId};
pub use permission::{Permission, PermissionSet};
pub use risk::{DataZone, Intent, RiskTier};
pub use time::{Clock, ManualClock, SystemClock};
