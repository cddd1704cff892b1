//! Aureus Audit Log
//!
//! Append-only, hash-chained records. Appends are linearized through a
//! single writer; readers get snapshots and never mutate history.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod log;
pub mod record;

pub use chain::{ChainError, ChainVerifier};
pub use log::EventLog;
pub use record::Record;
