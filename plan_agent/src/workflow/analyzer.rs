//! Dependency analysis.
//!
//! Turns a raw [`PlanDocument`] into a validated [`PlanGraph`]:
//!
//! 1. every task's dependency set is its declared `depends_on` plus every
//!    task referenced from its arguments
//! 2. structural problems (duplicates, unknown targets, self references)
//!    are rejected
//! 3. configured prerequisite rules synthesize missing lookup tasks
//! 4. tasks equivalent to one earlier in dependency order become aliases of it
//! 5. the wired graph is checked for cycles

use crate::workflow::dag::PlanGraph;
use crate::workflow::signature::SignatureRegistry;
use crate::workflow::task::PlanTask;
use crate::workflow::validate::PlanValidator;
use plan_core::{ArgValue, PlanDocument, PlanValidationError, Reference, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Placeholder replaced by the literal argument in lookup arguments.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// A tool whose argument must first be resolved by a lookup tool.
///
/// When a task calls `tool` with a literal `argument` and none of its
/// dependencies calls `lookup_tool`, the analyzer inserts a lookup task and
/// rewires the argument to `${<lookup>.<extract_field>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrerequisiteRule {
    /// Tool that needs the prerequisite
    pub tool: String,
    /// Argument of `tool` holding the human-readable value
    pub argument: String,
    /// Tool that resolves the value
    pub lookup_tool: String,
    /// Arguments for the lookup; `"{value}"` is replaced by the literal
    #[serde(default)]
    pub lookup_arguments: Map<String, Value>,
    /// Field of the lookup result that replaces the literal
    pub extract_field: String,
}

impl PrerequisiteRule {
    /// Creates a rule with no extra lookup arguments.
    pub fn new(
        tool: impl Into<String>,
        argument: impl Into<String>,
        lookup_tool: impl Into<String>,
        extract_field: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            argument: argument.into(),
            lookup_tool: lookup_tool.into(),
            lookup_arguments: Map::new(),
            extract_field: extract_field.into(),
        }
    }

    /// Adds one lookup argument.
    pub fn with_lookup_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.lookup_arguments.insert(name.into(), value);
        self
    }

    fn lookup_arguments_for(&self, literal: &Value) -> Map<String, Value> {
        self.lookup_arguments
            .iter()
            .map(|(k, v)| (k.clone(), substitute_placeholder(v, literal)))
            .collect()
    }
}

fn substitute_placeholder(template: &Value, literal: &Value) -> Value {
    match template {
        Value::String(s) if s == VALUE_PLACEHOLDER => literal.clone(),
        Value::String(s) if s.contains(VALUE_PLACEHOLDER) => {
            let text = match literal {
                Value::String(l) => l.clone(),
                other => other.to_string(),
            };
            Value::String(s.replace(VALUE_PLACEHOLDER, &text))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_placeholder(item, literal))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_placeholder(v, literal)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Derives complete dependency sets and builds the plan graph.
///
/// # Example
///
/// ```ignore
/// let analyzer = DependencyAnalyzer::new()
///     .with_rule(PrerequisiteRule::new(
///         "query_sales_summary_detail", "metric_name", "search_metrics", "metric_name",
///     ));
/// let graph = analyzer.analyze(&plan)?;
/// ```
#[derive(Clone, Debug)]
pub struct DependencyAnalyzer {
    rules: Vec<PrerequisiteRule>,
    reuse_enabled: bool,
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyAnalyzer {
    /// Creates an analyzer with reuse on and no prerequisite rules.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            reuse_enabled: true,
        }
    }

    /// Adds a prerequisite rule.
    pub fn with_rule(mut self, rule: PrerequisiteRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replaces the prerequisite rules.
    pub fn with_rules(mut self, rules: Vec<PrerequisiteRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Enables or disables alias detection.
    pub fn with_reuse(mut self, enabled: bool) -> Self {
        self.reuse_enabled = enabled;
        self
    }

    /// Analyzes a plan document into a validated graph.
    ///
    /// # Returns
    ///
    /// - `Ok(PlanGraph)` - acyclic graph with complete dependency sets
    /// - `Err(PlanValidationError)` - the plan cannot be executed at all
    pub fn analyze(&self, plan: &PlanDocument) -> Result<PlanGraph, PlanValidationError> {
        let mut tasks: Vec<PlanTask> = plan.tasks.iter().map(PlanTask::from_spec).collect();
        let validator = PlanValidator::new();
        validator.validate_tasks(&tasks)?.into_result()?;

        for task in &tasks {
            let inferred = task.inferred_dependencies();
            if !inferred.is_empty() {
                debug!(task_id = %task.id, inferred = ?inferred, "inferred dependencies from references");
            }
        }

        self.synthesize_prerequisites(&mut tasks);
        if self.reuse_enabled {
            mark_aliases(&mut tasks);
        }

        let graph = PlanGraph::from_tasks(tasks)?;
        validator.validate_graph(&graph)?.into_result()?;

        info!(
            tasks = graph.len(),
            synthesized = graph.tasks().filter(|t| t.synthesized).count(),
            aliases = graph.tasks().filter(|t| t.is_alias()).count(),
            "plan analyzed"
        );
        Ok(graph)
    }

    fn synthesize_prerequisites(&self, tasks: &mut Vec<PlanTask>) {
        if self.rules.is_empty() {
            return;
        }

        let mut ids: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let tools: HashMap<TaskId, String> =
            tasks.iter().map(|t| (t.id.clone(), t.tool.clone())).collect();
        let mut out = Vec::with_capacity(tasks.len());

        for mut task in tasks.drain(..) {
            for rule in self.rules.iter().filter(|r| r.tool == task.tool) {
                let Some(ArgValue::Literal(literal)) = task.arguments.get(&rule.argument) else {
                    continue;
                };
                let satisfied = task
                    .dependencies
                    .iter()
                    .any(|dep| tools.get(dep).map(String::as_str) == Some(rule.lookup_tool.as_str()));
                if satisfied {
                    continue;
                }

                let synth_id = unique_id(&ids, &format!("{}__{}", task.id, rule.lookup_tool));
                ids.insert(synth_id.clone());

                let arguments = rule.lookup_arguments_for(literal);
                let prerequisite = PlanTask {
                    id: synth_id.clone(),
                    description: format!("resolve {} for {}", rule.argument, task.id),
                    tool: rule.lookup_tool.clone(),
                    arguments: plan_core::value::arguments_from_map(arguments),
                    declared: Vec::new(),
                    dependencies: BTreeSet::new(),
                    alias_of: None,
                    synthesized: true,
                };

                info!(
                    task_id = %task.id,
                    prerequisite = %synth_id,
                    lookup_tool = %rule.lookup_tool,
                    "synthesized prerequisite task"
                );
                task.arguments.insert(
                    rule.argument.clone(),
                    ArgValue::Reference(Reference::field(synth_id.clone(), rule.extract_field.clone())),
                );
                task.dependencies.insert(synth_id);
                out.push(prerequisite);
            }
            out.push(task);
        }

        *tasks = out;
    }
}

fn unique_id(taken: &HashSet<TaskId>, base: &str) -> TaskId {
    let candidate = TaskId::new(base);
    if !taken.contains(&candidate) {
        return candidate;
    }
    let mut n = 2;
    loop {
        let candidate = TaskId::new(format!("{}_{}", base, n));
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Registers signatures in dependency order so that a canonical task never
/// depends, even transitively, on its alias.
fn mark_aliases(tasks: &mut [PlanTask]) {
    let mut registry = SignatureRegistry::new();
    for index in dependency_order(tasks) {
        let task = &mut tasks[index];
        if let Some(canonical) = registry.register(&task.id, &task.tool, &task.raw_arguments()) {
            debug!(task_id = %task.id, canonical = %canonical, "task reuses an equivalent task");
            task.dependencies.insert(canonical.clone());
            task.alias_of = Some(canonical);
        }
    }
}

/// Task indices in topological order, ties broken by declaration order.
///
/// Tasks caught in a cycle are appended in declaration order; the graph
/// check rejects the plan afterwards.
fn dependency_order(tasks: &[PlanTask]) -> Vec<usize> {
    let position: HashMap<&TaskId, usize> = tasks.iter().enumerate().map(|(i, t)| (&t.id, i)).collect();
    let mut waiting: Vec<usize> = tasks
        .iter()
        .map(|t| t.dependencies.iter().filter(|d| position.contains_key(d)).count())
        .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (index, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&d) = position.get(dep) {
                dependents[d].push(index);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..tasks.len()).filter(|&i| waiting[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &next in &dependents[index] {
            waiting[next] -= 1;
            if waiting[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < tasks.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..tasks.len()).filter(|i| !placed.contains(i)));
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_core::TaskSpec;
    use serde_json::json;

    fn plan(tasks: Vec<TaskSpec>) -> PlanDocument {
        PlanDocument::new(tasks)
    }

    fn metric_rule() -> PrerequisiteRule {
        PrerequisiteRule::new(
            "query_sales_summary_detail",
            "metric_name",
            "search_metrics",
            "metric_name",
        )
        .with_lookup_argument("value", json!("{value}"))
        .with_lookup_argument("column_name", json!("metric_name_cn"))
        .with_lookup_argument("n_results", json!(1))
    }

    #[test]
    fn test_infers_dependency_from_field_reference() {
        let graph = DependencyAnalyzer::new()
            .analyze(&plan(vec![
                TaskSpec::new("t1", "search_metrics").with_argument("value", json!("差评率")),
                TaskSpec::new("t2", "query_sales_summary_detail")
                    .with_argument("metric_name", json!("${t1.metric_name}")),
            ]))
            .unwrap();

        assert_eq!(graph.dependencies(&TaskId::new("t2")), vec![TaskId::new("t1")]);
    }

    #[test]
    fn test_cycle_rejected() {
        let result = DependencyAnalyzer::new().analyze(&plan(vec![
            TaskSpec::new("t1", "add").with_argument("a", json!("${t2}")),
            TaskSpec::new("t2", "add").with_argument("a", json!("${t1}")),
        ]));
        assert!(matches!(result, Err(PlanValidationError::CycleDetected(_))));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let result = DependencyAnalyzer::new().analyze(&PlanDocument::default());
        assert!(matches!(result, Err(PlanValidationError::EmptyPlan)));
    }

    #[test]
    fn test_canonical_task_precedes_alias_in_dependency_order() {
        let graph = DependencyAnalyzer::new()
            .analyze(&plan(vec![
                TaskSpec::new("t1", "add")
                    .with_argument("a", json!(1))
                    .with_argument("b", json!(2))
                    .depends_on("t3"),
                TaskSpec::new("t3", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
            ]))
            .unwrap();

        assert_eq!(graph.task(&TaskId::new("t1")).unwrap().alias_of, Some(TaskId::new("t3")));
        assert_eq!(graph.task(&TaskId::new("t3")).unwrap().alias_of, None);
    }

    #[test]
    fn test_equivalent_tasks_become_aliases() {
        let graph = DependencyAnalyzer::new()
            .analyze(&plan(vec![
                TaskSpec::new("t1", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
                TaskSpec::new("t2", "add").with_argument("b", json!(5)).with_argument("a", json!(3.0)),
                TaskSpec::new("t3", "add").with_argument("a", json!(4)).with_argument("b", json!(5)),
            ]))
            .unwrap();

        let t2 = graph.task(&TaskId::new("t2")).unwrap();
        assert_eq!(t2.alias_of, Some(TaskId::new("t1")));
        assert!(t2.dependencies.contains(&TaskId::new("t1")));
        assert!(!graph.task(&TaskId::new("t3")).unwrap().is_alias());
    }

    #[test]
    fn test_reuse_can_be_disabled() {
        let graph = DependencyAnalyzer::new()
            .with_reuse(false)
            .analyze(&plan(vec![
                TaskSpec::new("t1", "add").with_argument("a", json!(1)),
                TaskSpec::new("t2", "add").with_argument("a", json!(1)),
            ]))
            .unwrap();
        assert!(graph.tasks().all(|t| !t.is_alias()));
    }

    #[test]
    fn test_prerequisite_synthesized() {
        let graph = DependencyAnalyzer::new()
            .with_rule(metric_rule())
            .analyze(&plan(vec![TaskSpec::new("t1", "query_sales_summary_detail")
                .with_argument("metric_name", json!("差评率"))]))
            .unwrap();

        assert_eq!(graph.len(), 2);
        let synth_id = TaskId::new("t1__search_metrics");
        let synth = graph.task(&synth_id).unwrap();
        assert!(synth.synthesized);
        assert_eq!(
            synth.raw_arguments(),
            json!({"column_name": "metric_name_cn", "n_results": 1, "value": "差评率"})
        );

        let task = graph.task(&TaskId::new("t1")).unwrap();
        assert_eq!(task.raw_arguments()["metric_name"], json!("${t1__search_metrics.metric_name}"));
        assert_eq!(graph.dependencies(&TaskId::new("t1")), vec![synth_id]);

        let ids: Vec<&str> = graph.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1__search_metrics", "t1"]);
    }

    #[test]
    fn test_prerequisite_not_added_when_satisfied() {
        let graph = DependencyAnalyzer::new()
            .with_rule(metric_rule())
            .analyze(&plan(vec![
                TaskSpec::new("t1", "search_metrics").with_argument("value", json!("差评率")),
                TaskSpec::new("t2", "query_sales_summary_detail")
                    .with_argument("metric_name", json!("${t1.metric_name}")),
                TaskSpec::new("t3", "query_sales_summary_detail")
                    .with_argument("metric_name", json!("negative_review_rate_034"))
                    .depends_on("t1"),
            ]))
            .unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_synthesized_lookups_are_deduplicated() {
        let graph = DependencyAnalyzer::new()
            .with_rule(metric_rule())
            .analyze(&plan(vec![
                TaskSpec::new("a", "query_sales_summary_detail")
                    .with_argument("metric_name", json!("GMV"))
                    .with_argument("month", json!(1)),
                TaskSpec::new("b", "query_sales_summary_detail")
                    .with_argument("metric_name", json!("GMV"))
                    .with_argument("month", json!(2)),
            ]))
            .unwrap();

        let second = graph.task(&TaskId::new("b__search_metrics")).unwrap();
        assert_eq!(second.alias_of, Some(TaskId::new("a__search_metrics")));
    }

    #[test]
    fn test_placeholder_interpolated_inside_string() {
        let rule = PrerequisiteRule::new("q", "m", "lookup", "id")
            .with_lookup_argument("query", json!("name = {value}"));
        let args = rule.lookup_arguments_for(&json!("gmv"));
        assert_eq!(args["query"], json!("name = gmv"));
    }
}
