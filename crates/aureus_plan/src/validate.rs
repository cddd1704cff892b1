//! Workflow validation.
//!
//! Collects every invariant violation in a workflow instead of stopping at
//! the first one, so a caller can report them together.

use crate::dag::DependencyGraph;
use crate::error::PlanError;
use crate::spec::{TaskSpec, WorkflowSpec};
use std::collections::HashSet;

/// Validator for workflow specifications
#[derive(Debug, Clone)]
pub struct SpecValidator {
    /// Maximum allowed tasks (0 = no limit)
    pub max_tasks: usize,
}

impl SpecValidator {
    /// Create a validator with no task limit
    #[must_use]
    pub fn new() -> Self {
        Self { max_tasks: 0 }
    }

    /// Set the task limit
    #[must_use]
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Validate a workflow
    ///
    /// # Errors
    ///
    /// Returns every violation found
    pub fn validate(&self, spec: &WorkflowSpec) -> Result<(), Vec<PlanError>> {
        let mut errors = Vec::new();

        if self.max_tasks > 0 && spec.tasks.len() > self.max_tasks {
            errors.push(PlanError::TooManyTasks {
                count: spec.tasks.len(),
                max: self.max_tasks,
            });
        }

        let mut seen = HashSet::new();
        for task in &spec.tasks {
            if !seen.insert(&task.id) {
                errors.push(PlanError::DuplicateTask {
                    task: task.id.clone(),
                });
            }
            check_task(task, &mut errors);
        }

        for (task, on) in &spec.dependencies {
            if !seen.contains(task) {
                errors.push(PlanError::UnknownTaskReference {
                    task: task.clone(),
                    reference: task.clone(),
                });
            }
            for dep in on.iter().filter(|dep| !seen.contains(dep)) {
                errors.push(PlanError::UnknownTaskReference {
                    task: task.clone(),
                    reference: dep.clone(),
                });
            }
        }

        // Cycles only mean something once the edge set is well formed
        if !errors.iter().any(PlanError::is_structural) {
            if let Err(e) = DependencyGraph::build(spec).and_then(|graph| graph.order()) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(workflow = %spec.id, errors = errors.len(), "workflow failed validation");
            Err(errors)
        }
    }
}

impl Default for SpecValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_task(task: &TaskSpec, errors: &mut Vec<PlanError>) {
    let mut invalid = |field: &str, reason: &str| {
        errors.push(PlanError::InvalidTask {
            task: task.id.clone(),
            field: field.to_string(),
            reason: reason.to_string(),
        });
    };

    if task.id.is_blank() {
        invalid("id", "must not be blank");
    }
    if task.timeout_ms == Some(0) {
        invalid("timeout_ms", "must be greater than 0");
    }
    if let Some(retry) = &task.retry {
        if retry.max_attempts == 0 {
            invalid("retry.max_attempts", "must be at least 1");
        }
        if retry.backoff_ms == 0 {
            invalid("retry.backoff_ms", "must be at least 1");
        }
        if let Some(multiplier) = retry.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 0.0 {
                invalid("retry.backoff_multiplier", "must be a non-negative number");
            }
        }
    }
    if let Some(tool) = &task.tool_name {
        if tool.trim().is_empty() {
            invalid("tool_name", "must not be blank");
        }
    }
    if let Some(action) = &task.compensation_action {
        if action.tool.trim().is_empty() {
            invalid("compensation_action.tool", "must not be blank");
        }
    }
}
