//! PlanKit CLI entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plan_agent::workflow::tools::{number_value, required_number, required_text};
use plan_agent::workflow::FunctionTool;
use plan_agent::{CancellationTokenSource, EventKind, ToolRegistry};
use plan_core::PlanDocument;
use plan_runtime::config::{ConfigLoader, RuntimeConfig};
use plan_runtime::{PlanRuntime, StaticPlanner};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "plankit", version, about = "Run dependency-aware tool plans")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true, env = "PLANKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a plan file against the built-in tools
    Run {
        /// Plan file (.json, .yaml or .yml)
        plan: PathBuf,
        /// Print every lifecycle event
        #[arg(long)]
        events: bool,
    },
    /// Analyze a plan file without running it
    Check {
        /// Plan file (.json, .yaml or .yml)
        plan: PathBuf,
    },
    /// List the built-in tools
    Tools,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load(cli.config.as_deref())?;
    plan_runtime::logging::init(&config.logging)?;

    match cli.command {
        Commands::Run { plan, events } => run_plan(config, plan, events, cli.json).await,
        Commands::Check { plan } => check_plan(&config, plan, cli.json),
        Commands::Tools => list_tools(cli.json),
    }
}

async fn run_plan(config: RuntimeConfig, path: PathBuf, show_events: bool, as_json: bool) -> Result<()> {
    let plan = PlanDocument::from_path(&path)
        .with_context(|| format!("Failed to read plan from {}", path.display()))?;
    let planner = StaticPlanner::from_document(&plan)?;
    let runtime = PlanRuntime::new(config, Arc::new(planner), Arc::new(demo_tools()?));

    let source = CancellationTokenSource::new();
    let on_interrupt = source.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let request = path.display().to_string();
    let outcome = runtime
        .run_with(&request, runtime.event_emitter(), Some(source))
        .await;

    if as_json {
        let events: Vec<_> = outcome.events.iter().map(|e| e.to_wire()).collect();
        let output = json!({
            "report": outcome.report,
            "answer": outcome.answer,
            "error": outcome.error,
            "events": events,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if show_events {
            for event in &outcome.events {
                println!("[{}] {}", event.kind, event.content);
            }
        } else {
            for event in outcome.events.iter().filter(|e| e.kind == EventKind::Answer) {
                print!("{}", event.content);
            }
        }
        let summary = runtime.metrics().summary();
        println!(
            "invocations: {}, reused: {}, remediated: {}, completed: {}, failed: {}, skipped: {}",
            summary.tool_invocations,
            summary.reuse_hits,
            summary.remediations,
            summary.completed,
            summary.failed,
            summary.skipped
        );
    }

    match outcome.error {
        Some(error) => anyhow::bail!(error),
        None => Ok(()),
    }
}

fn check_plan(config: &RuntimeConfig, path: PathBuf, as_json: bool) -> Result<()> {
    let plan = PlanDocument::from_path(&path)
        .with_context(|| format!("Failed to read plan from {}", path.display()))?;
    let graph = config.analyzer().analyze(&plan)?;
    let order = graph.execution_order()?;

    if as_json {
        let tasks: Vec<_> = graph
            .tasks()
            .map(|t| {
                json!({
                    "task_id": t.id,
                    "tool": t.tool,
                    "depends_on": t.dependencies,
                    "alias_of": t.alias_of,
                    "synthesized": t.synthesized,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({"order": order, "tasks": tasks}))?);
    } else {
        for id in order {
            let Some(task) = graph.task(&id) else { continue };
            let deps: Vec<String> = task.dependencies.iter().map(|d| d.to_string()).collect();
            let mut line = format!("{} [{}]", task.id, task.tool);
            if !deps.is_empty() {
                line.push_str(&format!(" after {}", deps.join(", ")));
            }
            if let Some(canonical) = &task.alias_of {
                line.push_str(&format!(" (reuses {})", canonical));
            }
            if task.synthesized {
                line.push_str(" (synthesized)");
            }
            println!("{}", line);
        }
    }
    Ok(())
}

fn list_tools(as_json: bool) -> Result<()> {
    use plan_agent::ToolInvoker;

    let descriptors = demo_tools()?.descriptors();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else {
        for tool in descriptors {
            println!("{:<10} {}", tool.name, tool.description);
        }
    }
    Ok(())
}

fn demo_tools() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(FunctionTool::sync("add", "Add numbers a and b", |args| {
        Ok(number_value(required_number(args, "a")? + required_number(args, "b")?))
    }))?;
    registry.register(FunctionTool::sync("multiply", "Multiply numbers a and b", |args| {
        Ok(number_value(required_number(args, "a")? * required_number(args, "b")?))
    }))?;
    registry.register(FunctionTool::sync("concat", "Join texts left and right", |args| {
        Ok(json!(format!("{}{}", required_text(args, "left")?, required_text(args, "right")?)))
    }))?;
    Ok(registry)
}
