//! Aureus Circuit Reasoning Validation
//!
//! Every state-changing commit passes through a gate: an ordered list of
//! named validators plus a block/allow policy. A blocked commit is never
//! applied; the gate hands back the recovery strategy configured for it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod error;
pub mod gate;
pub mod recovery;
pub mod validator;

pub use commit::Commit;
pub use error::CrvError;
pub use gate::{CrvStatus, Gate, GateBindings, GateConfig, GateResult, GateVerdict};
pub use recovery::{RecoveryResult, RecoveryStrategy};
pub use validator::{
    FailureTaxonomy, FnValidator, NumericBound, RequiredFields, ValidationResult, Validator,
    ValidatorRegistry,
};
