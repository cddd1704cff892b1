//! Aureus Planner
//!
//! Workflow specifications and the dependency graph resolver that turns a
//! task set into an ordered sequence of ready sets.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod error;
pub mod spec;
pub mod validate;

pub use dag::{DependencyGraph, ExecutionPlan};
pub use error::PlanError;
pub use spec::{
    CompensationAction, CompensationHook, RetryConfig, SafetyPolicy, SafetyRule, TaskSpec,
    TaskType, WorkflowSpec,
};
pub use validate::SpecValidator;
