//! Planner errors.

use aureus_core::TaskId;

/// Errors raised while validating or ordering a workflow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The dependency mapping contains a cycle (including self-loops)
    #[error("Cyclic dependency among tasks: {}", join(.tasks))]
    CyclicDependency {
        /// Tasks left unordered when the cycle was detected
        tasks: Vec<TaskId>,
    },

    /// An edge references a task id that is not in the workflow
    #[error("Task {task} references unknown task {reference}")]
    UnknownTaskReference {
        /// Task whose dependency list (or mapping key) is bad
        task: TaskId,
        /// The missing id
        reference: TaskId,
    },

    /// Two tasks share an id
    #[error("Duplicate task id: {task}")]
    DuplicateTask {
        /// The repeated id
        task: TaskId,
    },

    /// A task field violates its bounds
    #[error("Invalid task {task}: {field} {reason}")]
    InvalidTask {
        /// Offending task
        task: TaskId,
        /// Field name
        field: String,
        /// Constraint that failed
        reason: String,
    },

    /// The workflow exceeds the configured task limit
    #[error("Workflow has {count} tasks, limit is {max}")]
    TooManyTasks {
        /// Tasks declared
        count: usize,
        /// Configured limit
        max: usize,
    },

    /// The workflow document could not be decoded
    #[error("Invalid workflow document: {0}")]
    Decode(String),
}

impl PlanError {
    /// Whether this error prevents any ordering at all
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. } | Self::UnknownTaskReference { .. } | Self::DuplicateTask { .. }
        )
    }
}

fn join(tasks: &[TaskId]) -> String {
    tasks.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}
