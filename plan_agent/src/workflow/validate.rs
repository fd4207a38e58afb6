//! Plan validation before execution.
//!
//! Every problem found here is fatal for the whole run and is reported
//! before any task is invoked.

use crate::workflow::dag::PlanGraph;
use crate::workflow::task::PlanTask;
use petgraph::algo::is_cyclic_directed;
use plan_core::{PlanValidationError, TaskId};
use std::collections::HashSet;

/// Validation report for plan structure.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    is_valid: bool,
    duplicates: Vec<TaskId>,
    /// (task, missing dependency)
    unknown_dependencies: Vec<(TaskId, TaskId)>,
    /// (task, missing reference target)
    unknown_references: Vec<(TaskId, TaskId)>,
    self_references: Vec<TaskId>,
    cycles: Vec<Vec<TaskId>>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    /// Returns whether the plan is valid.
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Returns duplicated task ids.
    pub fn duplicates(&self) -> &[TaskId] {
        &self.duplicates
    }

    /// Returns (task, dependency) pairs naming unknown tasks.
    pub fn unknown_dependencies(&self) -> &[(TaskId, TaskId)] {
        &self.unknown_dependencies
    }

    /// Returns (task, target) pairs for references to unknown tasks.
    pub fn unknown_references(&self) -> &[(TaskId, TaskId)] {
        &self.unknown_references
    }

    /// Returns tasks that depend on themselves.
    pub fn self_references(&self) -> &[TaskId] {
        &self.self_references
    }

    /// Returns the cycles detected.
    pub fn cycles(&self) -> &[Vec<TaskId>] {
        &self.cycles
    }

    fn mark_invalid(&mut self) {
        self.is_valid = false;
    }

    fn add_duplicate(&mut self, id: TaskId) {
        self.mark_invalid();
        self.duplicates.push(id);
    }

    fn add_unknown_dependency(&mut self, task: TaskId, dep: TaskId) {
        self.mark_invalid();
        self.unknown_dependencies.push((task, dep));
    }

    fn add_unknown_reference(&mut self, task: TaskId, target: TaskId) {
        self.mark_invalid();
        self.unknown_references.push((task, target));
    }

    fn add_self_reference(&mut self, task: TaskId) {
        self.mark_invalid();
        self.self_references.push(task);
    }

    fn add_cycle(&mut self, cycle: Vec<TaskId>) {
        self.mark_invalid();
        self.cycles.push(cycle);
    }

    /// Converts the report into the first fatal error it holds.
    pub fn into_result(self) -> Result<(), PlanValidationError> {
        if let Some(id) = self.duplicates.into_iter().next() {
            return Err(PlanValidationError::DuplicateTaskId(id));
        }
        if let Some(id) = self.self_references.into_iter().next() {
            return Err(PlanValidationError::SelfReference(id));
        }
        if let Some((task, target)) = self.unknown_references.into_iter().next() {
            return Err(PlanValidationError::UnknownReference { task, target });
        }
        if let Some((task, dependency)) = self.unknown_dependencies.into_iter().next() {
            return Err(PlanValidationError::UnknownDependency { task, dependency });
        }
        if let Some(cycle) = self.cycles.into_iter().next() {
            return Err(PlanValidationError::CycleDetected(cycle));
        }
        Ok(())
    }
}

/// Structural checks over analyzed tasks and the plan graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanValidator;

impl PlanValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Checks ids, dependency targets and reference targets.
    ///
    /// # Returns
    ///
    /// - `Err(PlanValidationError::EmptyPlan)` for an empty task list
    /// - `Ok(ValidationReport)` otherwise, which may still be invalid
    pub fn validate_tasks(&self, tasks: &[PlanTask]) -> Result<ValidationReport, PlanValidationError> {
        if tasks.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }

        let mut report = ValidationReport::new();
        let mut seen: HashSet<&TaskId> = HashSet::new();
        for task in tasks {
            if !seen.insert(&task.id) {
                report.add_duplicate(task.id.clone());
            }
        }

        for task in tasks {
            let referenced = task.referenced_tasks();
            if task.dependencies.contains(&task.id) {
                report.add_self_reference(task.id.clone());
            }
            for target in &referenced {
                if !seen.contains(target) {
                    report.add_unknown_reference(task.id.clone(), target.clone());
                }
            }
            for dep in &task.declared {
                if !seen.contains(dep) && !referenced.contains(dep) {
                    report.add_unknown_dependency(task.id.clone(), dep.clone());
                }
            }
        }

        Ok(report)
    }

    /// Checks the wired graph for cycles.
    pub fn validate_graph(&self, graph: &PlanGraph) -> Result<ValidationReport, PlanValidationError> {
        if graph.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }

        let mut report = ValidationReport::new();
        if is_cyclic_directed(&graph.graph) {
            let sccs = petgraph::algo::tarjan_scc(&graph.graph);
            for scc in sccs {
                if scc.len() > 1 {
                    let cycle: Vec<TaskId> = scc
                        .iter()
                        .filter_map(|&idx| graph.graph.node_weight(idx))
                        .map(|task| task.id.clone())
                        .collect();
                    report.add_cycle(cycle);
                }
            }
            if report.cycles().is_empty() {
                report.add_cycle(graph.cycle_members());
            }
        }
        Ok(report)
    }
}
