//! Plan graph built on petgraph.
//!
//! Nodes are analyzed [`PlanTask`]s, edges run from a prerequisite to the
//! task that depends on it. Declaration order is kept alongside the graph
//! so scheduling ties break the way the plan was written.

use crate::workflow::task::PlanTask;
use petgraph::algo::toposort as petgraph_toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use plan_core::{PlanValidationError, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Directed acyclic graph of the tasks in one plan.
///
/// # Example
///
/// ```ignore
/// let graph = PlanGraph::from_tasks(tasks)?;
/// let order = graph.execution_order()?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct PlanGraph {
    /// Directed graph of tasks with dependency edges
    pub(in crate::workflow) graph: DiGraph<PlanTask, ()>,
    /// Map from TaskId to graph node index
    pub(in crate::workflow) task_map: HashMap<TaskId, NodeIndex>,
    /// Task ids in declaration order
    order: Vec<TaskId>,
}

impl PlanGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from analyzed tasks and wires every dependency.
    ///
    /// The graph is not checked for cycles here; run
    /// [`PlanValidator`](crate::workflow::validate::PlanValidator) on it.
    ///
    /// # Returns
    ///
    /// - `Ok(PlanGraph)` with all edges in place
    /// - `Err(PlanValidationError::DuplicateTaskId)` if two tasks share an id
    /// - `Err(PlanValidationError::UnknownDependency)` if a dependency is missing
    pub fn from_tasks(tasks: Vec<PlanTask>) -> Result<Self, PlanValidationError> {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }

        let edges: Vec<(TaskId, TaskId)> = graph
            .graph
            .node_weights()
            .flat_map(|task| {
                task.dependencies
                    .iter()
                    .map(move |dep| (dep.clone(), task.id.clone()))
            })
            .collect();

        for (from, to) in edges {
            graph.add_dependency(&from, &to)?;
        }

        Ok(graph)
    }

    /// Adds a task as an isolated node.
    pub fn add_task(&mut self, task: PlanTask) -> Result<NodeIndex, PlanValidationError> {
        if self.task_map.contains_key(&task.id) {
            return Err(PlanValidationError::DuplicateTaskId(task.id));
        }
        let id = task.id.clone();
        let idx = self.graph.add_node(task);
        self.task_map.insert(id.clone(), idx);
        self.order.push(id);
        Ok(idx)
    }

    /// Adds an edge meaning `to` depends on `from`.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<(), PlanValidationError> {
        let to_idx = *self
            .task_map
            .get(to)
            .ok_or_else(|| PlanValidationError::MalformedDocument(format!("unknown task {}", to)))?;
        let from_idx = *self
            .task_map
            .get(from)
            .ok_or_else(|| PlanValidationError::UnknownDependency {
                task: to.clone(),
                dependency: from.clone(),
            })?;

        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Returns tasks in topological order.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<TaskId>)` with every prerequisite before its dependents
    /// - `Err(PlanValidationError::CycleDetected)` if the graph has a cycle
    pub fn execution_order(&self) -> Result<Vec<TaskId>, PlanValidationError> {
        let sorted = petgraph_toposort(&self.graph, None)
            .map_err(|_| PlanValidationError::CycleDetected(self.cycle_members()))?;

        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx))
            .map(|task| task.id.clone())
            .collect())
    }

    /// Returns all tasks that sit on a cycle.
    pub(in crate::workflow) fn cycle_members(&self) -> Vec<TaskId> {
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&idx| self.graph.find_edge(idx, idx).is_some())
            })
            .flat_map(|scc| {
                scc.into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx))
                    .map(|task| task.id.clone())
            })
            .collect()
    }

    /// Returns the task with the given id.
    pub fn task(&self, id: &TaskId) -> Option<&PlanTask> {
        self.task_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Returns tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &PlanTask> + '_ {
        self.order.iter().filter_map(move |id| self.task(id))
    }

    /// Returns task ids in declaration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.order.clone()
    }

    /// Returns the number of tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Checks if a task id exists in the graph.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_map.contains_key(id)
    }

    /// Returns the direct prerequisites of a task.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the tasks that directly depend on a task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.task_map.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n))
            .map(|task| task.id.clone())
            .collect()
    }

    /// Returns every task that depends on `id` directly or transitively.
    pub fn transitive_dependents(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut found = HashSet::new();
        let Some(&start) = self.task_map.get(id) else {
            return found;
        };

        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(next) {
                    if let Some(task) = self.graph.node_weight(next) {
                        found.insert(task.id.clone());
                    }
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// Returns true if `ancestor` must finish before `id` can start.
    pub fn depends_on(&self, id: &TaskId, ancestor: &TaskId) -> bool {
        self.transitive_dependents(ancestor).contains(id)
    }
}
