//! Aureus Tool System
//!
//! Tools are named async operations over JSON arguments. Every invocation
//! is routed through the isolation boundary its task names; simulated
//! boundaries never reach a native tool.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod sandbox;
pub mod tool;

pub use registry::{RegistryError, ToolRegistry};
pub use sandbox::{
    SandboxConfig, SandboxError, SandboxExecutor, SandboxMode, SandboxPermissions, SandboxRouter,
    SimulatedSandbox,
};
pub use tool::{FnTool, Tool, ToolArgs, ToolError};
