//! Aureus Runtime
//!
//! The task runner (timeouts, retry with backoff, compensation,
//! idempotency, sandbox routing) and the workflow engine that drives ready
//! sets through the goal guard, the runner and the CRV gate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod result;
pub mod runner;
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::{ExecutionContext, WorkflowEngine, WorkflowExecutionRequest};
pub use error::{ErrorKind, ExecutionError};
pub use result::{
    CompensationOutcome, TaskExecutionResult, TaskStatus, WorkflowExecutionResult, WorkflowStatus,
};
pub use runner::{IdempotencyCache, TaskRunner};
pub use telemetry::{
    ChannelSink, Emission, Metric, Metrics, NullSink, Span, TelemetryEvent, TelemetryEventType,
    TelemetrySink, TracingSink,
};
