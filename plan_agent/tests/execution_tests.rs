//! Integration tests for plan analysis and execution.
//!
//! These tests drive whole plans through the analyzer and the executor
//! against the tool backend in `common`.

mod common;

use common::TestTools;
use plan_agent::workflow::{RunTimeout, TaskTimeout};
use plan_agent::{
    DependencyAnalyzer, EventEmitter, EventKind, ExecutionReport, PlanExecutor, PrerequisiteRule,
    TimeoutConfig,
};
use plan_core::{PlanDocument, PlanValidationError, TaskId, TaskSpec, TaskStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Helper Functions
// =============================================================================

async fn run(plan: PlanDocument, tools: Arc<TestTools>) -> ExecutionReport {
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();
    PlanExecutor::new(graph).with_tool_invoker(tools).execute().await
}

fn sleep_task(id: &str, ms: u64) -> TaskSpec {
    TaskSpec::new(id, "sleep").with_argument("ms", json!(ms))
}

// =============================================================================
// Reference Resolution
// =============================================================================

#[tokio::test]
async fn test_arithmetic_chain_from_generator_output() {
    let output = r#"Here is the plan:
```json
{"tasks": [
  {"task_id": "t1", "description": "add", "tool": "add", "arguments": {"a": 3, "b": 5}},
  {"task_id": "t2", "description": "double", "tool": "multiply",
   "arguments": {"a": "${t1}", "b": 2}, "depends_on": ["t1"]}
]}
```"#;
    let plan = PlanDocument::from_generator_output(output).unwrap();
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert!(report.is_success());
    assert_eq!(report.result_of("t1"), Some(&json!(8)));
    assert_eq!(report.result_of("t2"), Some(&json!(16)));
    assert_eq!(tools.calls("add"), 1);
    assert_eq!(tools.calls("multiply"), 1);
}

#[tokio::test]
async fn test_field_reference_infers_dependency() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "search_metrics").with_argument("query", json!("差评率")),
        TaskSpec::new("t2", "query_metric").with_argument("metric_name", json!("${t1.metric_name}")),
    ]);

    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();
    assert_eq!(graph.dependencies(&TaskId::new("t2")), vec![TaskId::new("t1")]);

    let report = PlanExecutor::new(graph)
        .with_tool_invoker(Arc::new(TestTools::new()))
        .execute()
        .await;

    let t2 = report.task(&TaskId::new("t2")).unwrap();
    assert_eq!(t2.status, TaskStatus::Completed);
    assert_eq!(
        t2.resolved_arguments,
        Some(json!({"metric_name": "negative_review_rate_034"}))
    );
}

#[tokio::test]
async fn test_template_reference_interpolates_text() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("sum", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
        TaskSpec::new("label", "concat")
            .with_argument("left", json!("total: "))
            .with_argument("right", json!("${sum} units")),
    ]);

    let report = run(plan, Arc::new(TestTools::new())).await;
    assert_eq!(report.result_of("label"), Some(&json!("total: 8 units")));
}

#[tokio::test]
async fn test_missing_field_fails_only_that_task() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "search_metrics").with_argument("query", json!("refunds")),
        TaskSpec::new("t2", "query_metric").with_argument("metric_name", json!("${t1.unit}")),
        TaskSpec::new("t3", "add").with_argument("a", json!(1)).with_argument("b", json!(1)),
    ]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Completed));
    assert_eq!(report.status_of("t3"), Some(TaskStatus::Completed));
    let t2 = report.task(&TaskId::new("t2")).unwrap();
    assert_eq!(t2.status, TaskStatus::Failed);
    assert!(t2.error.as_deref().unwrap().contains("unit"));
    assert_eq!(tools.calls("query_metric"), 0);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_cycle_rejected_before_execution() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "add").with_argument("a", json!("${t2}")),
        TaskSpec::new("t2", "add").with_argument("a", json!("${t1}")),
    ]);

    let err = DependencyAnalyzer::new().analyze(&plan).unwrap_err();
    match err {
        PlanValidationError::CycleDetected(members) => {
            assert!(members.contains(&TaskId::new("t1")));
            assert!(members.contains(&TaskId::new("t2")));
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reference_to_unknown_task_rejected() {
    let plan = PlanDocument::new(vec![TaskSpec::new("t1", "add").with_argument("a", json!("${t9}"))]);

    let err = DependencyAnalyzer::new().analyze(&plan).unwrap_err();
    assert!(matches!(err, PlanValidationError::UnknownReference { .. }));
}

// =============================================================================
// Reuse and Prerequisites
// =============================================================================

#[tokio::test]
async fn test_equivalent_tasks_invoke_once() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "search_metrics").with_argument("query", json!("差评率")),
        TaskSpec::new("t2", "search_metrics").with_argument("query", json!("差评率")),
    ]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert_eq!(tools.calls("search_metrics"), 1);
    assert_eq!(report.result_of("t1"), report.result_of("t2"));
    assert_eq!(
        report.task(&TaskId::new("t2")).unwrap().alias_of,
        Some(TaskId::new("t1"))
    );
}

#[tokio::test]
async fn test_dependent_of_alias_runs() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
        TaskSpec::new("t2", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
        TaskSpec::new("t3", "multiply")
            .with_argument("a", json!("${t2}"))
            .with_argument("b", json!(10)),
    ]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert!(report.is_success());
    assert_eq!(report.status_of("t3"), Some(TaskStatus::Completed));
    assert_eq!(report.result_of("t3"), Some(&json!(30)));
    assert_eq!(tools.calls("add"), 1);
}

#[tokio::test]
async fn test_equivalent_task_declared_after_its_dependent() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "add")
            .with_argument("a", json!(1))
            .with_argument("b", json!(2))
            .depends_on("t3"),
        TaskSpec::new("t3", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
    ]);
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();
    assert_eq!(graph.task(&TaskId::new("t1")).unwrap().alias_of, Some(TaskId::new("t3")));

    let tools = Arc::new(TestTools::new());
    let report = PlanExecutor::new(graph).with_tool_invoker(tools.clone()).execute().await;

    assert!(report.is_success());
    assert_eq!(report.result_of("t1"), Some(&json!(3)));
    assert_eq!(tools.calls("add"), 1);
}

#[tokio::test]
async fn test_whole_reference_to_text_result_stays_text() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "concat")
            .with_argument("left", json!("[1,"))
            .with_argument("right", json!("2]")),
        TaskSpec::new("t2", "concat")
            .with_argument("left", json!("${t1}"))
            .with_argument("right", json!("")),
    ]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools).await;

    assert_eq!(report.result_of("t1"), Some(&json!("[1,2]")));
    let t2 = report.task(&TaskId::new("t2")).unwrap();
    assert_eq!(t2.resolved_arguments, Some(json!({"left": "[1,2]", "right": ""})));
}

#[tokio::test]
async fn test_prerequisite_lookup_synthesized() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "query_metric").with_argument("metric_name", json!("差评率")),
    ]);
    let analyzer = DependencyAnalyzer::new().with_rule(
        PrerequisiteRule::new("query_metric", "metric_name", "search_metrics", "metric_name")
            .with_lookup_argument("query", json!("{value}")),
    );
    let graph = analyzer.analyze(&plan).unwrap();
    assert_eq!(graph.len(), 2);

    let tools = Arc::new(TestTools::new());
    let report = PlanExecutor::new(graph).with_tool_invoker(tools.clone()).execute().await;

    assert!(report.is_success());
    assert_eq!(tools.started(), vec!["t1__search_metrics", "t1"]);
    assert!(report.tasks[0].synthesized);
    assert_eq!(
        report.result_of("t1"),
        Some(&json!({"metric_name": "negative_review_rate_034", "value": 0.034}))
    );
}

// =============================================================================
// Failures and Remediation
// =============================================================================

#[tokio::test]
async fn test_failure_skips_downstream_and_spares_siblings() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("fetch", "fail"),
        TaskSpec::new("double", "multiply")
            .with_argument("a", json!("${fetch}"))
            .with_argument("b", json!(2)),
        TaskSpec::new("label", "concat")
            .with_argument("left", json!("${double}"))
            .with_argument("right", json!("!")),
        TaskSpec::new("independent", "add").with_argument("a", json!(1)).with_argument("b", json!(2)),
    ]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert_eq!(report.status_of("fetch"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("double"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("label"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("independent"), Some(TaskStatus::Completed));
    assert_eq!(tools.calls("multiply"), 0);
    // execution failures get exactly one remediation attempt
    assert_eq!(tools.calls("fail"), 2);
    assert!(report.all_terminal());
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let plan = PlanDocument::new(vec![TaskSpec::new("t1", "flaky")]);
    let tools = Arc::new(TestTools::new().with_flaky_failures(1));

    let report = run(plan, tools.clone()).await;

    let t1 = report.task(&TaskId::new("t1")).unwrap();
    assert_eq!(t1.status, TaskStatus::Completed);
    assert_eq!(t1.result, Some(json!("recovered")));
    assert_eq!(t1.attempts, 2);
}

#[tokio::test]
async fn test_unknown_tool_not_retried() {
    let plan = PlanDocument::new(vec![TaskSpec::new("t1", "teleport")]);
    let tools = Arc::new(TestTools::new());

    let report = run(plan, tools.clone()).await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    assert_eq!(tools.calls("teleport"), 1);
}

// =============================================================================
// Concurrency, Timeouts and Cancellation
// =============================================================================

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let plan = PlanDocument::new(vec![sleep_task("a", 150), sleep_task("b", 151), sleep_task("c", 152)]);
    let tools = Arc::new(TestTools::new());
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();

    let start = Instant::now();
    let report = PlanExecutor::new(graph)
        .with_tool_invoker(tools.clone())
        .with_max_concurrency(3)
        .execute()
        .await;

    assert!(report.is_success());
    assert_eq!(tools.peak_concurrency(), 3);
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_single_slot_runs_in_declaration_order() {
    let plan = PlanDocument::new(vec![sleep_task("c", 10), sleep_task("a", 10), sleep_task("b", 10)]);
    let tools = Arc::new(TestTools::new());
    let graph = DependencyAnalyzer::new().with_reuse(false).analyze(&plan).unwrap();

    PlanExecutor::new(graph)
        .with_tool_invoker(tools.clone())
        .with_max_concurrency(1)
        .execute()
        .await;

    assert_eq!(tools.peak_concurrency(), 1);
    assert_eq!(tools.started(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_task_timeout_does_not_block_siblings() {
    let plan = PlanDocument::new(vec![
        sleep_task("slow", 5_000),
        TaskSpec::new("fast", "add").with_argument("a", json!(1)).with_argument("b", json!(1)),
    ]);
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();

    let report = PlanExecutor::new(graph)
        .with_tool_invoker(Arc::new(TestTools::new()))
        .with_timeout_config(TimeoutConfig::no_timeouts().with_task_timeout(TaskTimeout::from_millis(50)))
        .execute()
        .await;

    assert_eq!(report.status_of("fast"), Some(TaskStatus::Completed));
    assert_eq!(report.status_of("slow"), Some(TaskStatus::Failed));
    assert!(!report.timed_out);
}

#[tokio::test]
async fn test_run_timeout_skips_unstarted_work() {
    let plan = PlanDocument::new(vec![
        sleep_task("t1", 5_000),
        TaskSpec::new("t2", "add").with_argument("a", json!("${t1}")).with_argument("b", json!(1)),
    ]);
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();

    let report = PlanExecutor::new(graph)
        .with_tool_invoker(Arc::new(TestTools::new()))
        .with_timeout_config(TimeoutConfig::no_timeouts().with_run_timeout(RunTimeout::from_millis(50)))
        .execute()
        .await;

    assert!(report.timed_out);
    assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("t2"), Some(TaskStatus::Skipped));
    assert!(report.all_terminal());
}

#[tokio::test]
async fn test_cancellation_returns_partial_report() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
        sleep_task("t2", 5_000),
        TaskSpec::new("t3", "multiply")
            .with_argument("a", json!("${t2}"))
            .with_argument("b", json!(2)),
    ]);
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();
    let source = plan_agent::CancellationTokenSource::new();
    let executor = PlanExecutor::new(graph)
        .with_tool_invoker(Arc::new(TestTools::new()))
        .with_cancellation_source(source.clone());

    let canceller = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        source.cancel();
    };
    let (report, _) = tokio::join!(executor.execute(), canceller);

    assert!(report.cancelled);
    assert_eq!(report.result_of("t1"), Some(&json!(8)));
    assert_eq!(report.status_of("t3"), Some(TaskStatus::Skipped));
    assert!(report.all_terminal());
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_events_respect_dependency_order() {
    let plan = PlanDocument::new(vec![
        TaskSpec::new("t1", "add").with_argument("a", json!(3)).with_argument("b", json!(5)),
        TaskSpec::new("t2", "multiply")
            .with_argument("a", json!("${t1}"))
            .with_argument("b", json!(2)),
    ]);
    let graph = DependencyAnalyzer::new().analyze(&plan).unwrap();
    let events = EventEmitter::default();
    let mut rx = events.subscribe();

    PlanExecutor::new(graph)
        .with_tool_invoker(Arc::new(TestTools::new()))
        .with_event_emitter(events.clone())
        .execute()
        .await;

    let lifecycle: Vec<(EventKind, String)> = events
        .replay()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::Executing | EventKind::Complete))
        .map(|e| (e.kind, e.task_id.map(|id| id.to_string()).unwrap_or_default()))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            (EventKind::Executing, "t1".to_string()),
            (EventKind::Complete, "t1".to_string()),
            (EventKind::Executing, "t2".to_string()),
            (EventKind::Complete, "t2".to_string()),
        ]
    );

    let first = rx.recv().await.unwrap();
    assert_eq!(first.seq, 0);
}
