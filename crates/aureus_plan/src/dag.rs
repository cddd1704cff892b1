//! Dependency graph resolution.
//!
//! The graph is built from a workflow's task list and its dependency
//! mapping, then ordered with Kahn's algorithm into ready sets. Every
//! task in a ready set has all of its dependencies in earlier sets, and
//! ties inside a set follow task declaration order.

use crate::error::PlanError;
use crate::spec::WorkflowSpec;
use aureus_core::TaskId;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Dependency edges over a fixed set of tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// task -> tasks it depends on, in declaration order
    dependencies: IndexMap<TaskId, IndexSet<TaskId>>,
    /// task -> tasks that depend on it
    dependents: IndexMap<TaskId, IndexSet<TaskId>>,
}

impl DependencyGraph {
    /// Build the graph for a workflow
    ///
    /// # Errors
    ///
    /// Returns error on duplicate ids or references to unknown tasks
    pub fn build(spec: &WorkflowSpec) -> Result<Self, PlanError> {
        let ids: Vec<TaskId> = spec.tasks.iter().map(|t| t.id.clone()).collect();
        Self::from_parts(&ids, &spec.dependencies)
    }

    /// Build a graph from task ids and a `task -> dependencies` mapping
    ///
    /// # Errors
    ///
    /// Returns error on duplicate ids or references to unknown tasks
    pub fn from_parts(
        tasks: &[TaskId],
        mapping: &IndexMap<TaskId, Vec<TaskId>>,
    ) -> Result<Self, PlanError> {
        let mut dependencies: IndexMap<TaskId, IndexSet<TaskId>> = IndexMap::new();
        let mut dependents: IndexMap<TaskId, IndexSet<TaskId>> = IndexMap::new();

        for id in tasks {
            if dependencies.insert(id.clone(), IndexSet::new()).is_some() {
                return Err(PlanError::DuplicateTask { task: id.clone() });
            }
            dependents.insert(id.clone(), IndexSet::new());
        }

        for (task, on) in mapping {
            if !dependencies.contains_key(task) {
                return Err(PlanError::UnknownTaskReference {
                    task: task.clone(),
                    reference: task.clone(),
                });
            }
            for dep in on {
                if !dependencies.contains_key(dep) {
                    return Err(PlanError::UnknownTaskReference {
                        task: task.clone(),
                        reference: dep.clone(),
                    });
                }
                if let Some(set) = dependencies.get_mut(task) {
                    set.insert(dep.clone());
                }
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(task.clone());
                }
            }
        }

        Ok(Self {
            dependencies,
            dependents,
        })
    }

    /// Build and order a workflow in one step
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found
    pub fn resolve(spec: &WorkflowSpec) -> Result<ExecutionPlan, PlanError> {
        Self::build(spec)?.order()
    }

    /// Order the graph into ready sets
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::CyclicDependency`] listing the tasks that could
    /// not be ordered
    pub fn order(&self) -> Result<ExecutionPlan, PlanError> {
        let mut in_degree: IndexMap<&TaskId, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();

        let mut current: Vec<&TaskId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ready_sets = Vec::new();
        let mut placed = 0usize;

        while !current.is_empty() {
            placed += current.len();
            let mut released: IndexSet<&TaskId> = IndexSet::new();
            for id in &current {
                for dependent in self.dependents.get(*id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            released.insert(dependent);
                        }
                    }
                }
            }
            ready_sets.push(current.iter().map(|id| (*id).clone()).collect::<Vec<_>>());

            // Restore declaration order within the next set
            current = self
                .dependencies
                .keys()
                .filter(|id| released.contains(id))
                .collect();
        }

        if placed < self.dependencies.len() {
            let stuck: Vec<TaskId> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.clone())
                .collect();
            tracing::debug!(tasks = stuck.len(), "dependency cycle detected");
            return Err(PlanError::CyclicDependency { tasks: stuck });
        }

        Ok(ExecutionPlan {
            ready_sets,
            dependencies: self
                .dependencies
                .iter()
                .map(|(id, deps)| (id.clone(), deps.iter().cloned().collect()))
                .collect(),
            dependents: self
                .dependents
                .iter()
                .map(|(id, deps)| (id.clone(), deps.iter().cloned().collect()))
                .collect(),
        })
    }

    /// Number of tasks
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.dependencies.len()
    }
}

/// Ready-set ordering produced by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Ready sets in execution order
    pub ready_sets: Vec<Vec<TaskId>>,
    /// task -> direct dependencies
    pub dependencies: IndexMap<TaskId, Vec<TaskId>>,
    /// task -> direct dependents
    pub dependents: IndexMap<TaskId, Vec<TaskId>>,
}

impl ExecutionPlan {
    /// Number of tasks in the plan
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Index of the ready set holding `task`
    #[must_use]
    pub fn level_of(&self, task: &TaskId) -> Option<usize> {
        self.ready_sets.iter().position(|set| set.contains(task))
    }

    /// Direct dependents of `task`
    #[must_use]
    pub fn dependents_of(&self, task: &TaskId) -> &[TaskId] {
        self.dependents.get(task).map_or(&[][..], Vec::as_slice)
    }

    /// Every task reachable through dependent edges from `task`
    ///
    /// Returned in declaration order, excluding `task` itself.
    #[must_use]
    pub fn transitive_dependents(&self, task: &TaskId) -> Vec<TaskId> {
        let mut seen: IndexSet<&TaskId> = IndexSet::new();
        let mut stack: Vec<&TaskId> = self.dependents_of(task).iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents_of(next));
            }
        }
        self.dependencies
            .keys()
            .filter(|id| seen.contains(id))
            .cloned()
            .collect()
    }

    /// Tasks in execution order
    pub fn iter(&self) -> impl Iterator<Item = &TaskId> {
        self.ready_sets.iter().flatten()
    }
}
