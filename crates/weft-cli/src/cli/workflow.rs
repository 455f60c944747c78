//! Workflow subcommands: validate, plan, and run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use weft_core::WorkflowEngine;
use weft_core::workflow::dag::{build_execution_plan, find_cycle};
use weft_core::workflow::definition::load_workflow_file;
use weft_types::config::EngineConfig;
use weft_types::event::EngineEvent;
use weft_types::execution::{ExecutionStatus, TaskStatus, WorkflowExecution};
use weft_types::workflow::WorkflowDefinition;

use super::Output;
use super::builtins::{self, EchoAgent, EchoTool};

fn load(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).with_context(|| format!("Failed to load workflow {}", file.display()))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, output: Output) -> Result<()> {
    let def = load(file)?;

    let mut warnings = Vec::new();
    if let Some(task_id) = find_cycle(&def.tasks) {
        warnings.push(format!(
            "dependency cycle through task '{task_id}': runs will fail as unschedulable"
        ));
    }

    if output.json {
        let out = json!({
            "name": def.name,
            "version": def.version,
            "tasks": def.tasks.len(),
            "valid": true,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if output.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(&def.name).cyan()
    );
    println!("  Version: {}", def.version);
    println!("  Tasks: {}", def.tasks.len());
    println!("  Variables: {}", def.variables.len());
    for warning in &warnings {
        println!("  {} {warning}", style("!").yellow().bold());
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub fn plan(file: &Path, output: Output) -> Result<()> {
    let def = load(file)?;
    let waves = build_execution_plan(&def.tasks)
        .map_err(|e| anyhow!("Cannot plan workflow '{}': {e}", def.name))?;

    if output.json {
        let out: Vec<_> = waves
            .iter()
            .enumerate()
            .map(|(i, wave)| {
                json!({
                    "wave": i + 1,
                    "tasks": wave
                        .iter()
                        .map(|t| json!({"id": t.id, "type": t.task_type}))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if output.quiet {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Task"),
            Cell::new("Type"),
            Cell::new("Depends on"),
            Cell::new("Conditional"),
        ]);

    for (i, wave) in waves.iter().enumerate() {
        for task in wave {
            let deps = if task.depends_on.is_empty() {
                "-".to_string()
            } else {
                task.depends_on.join(", ")
            };
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(task.display_name()),
                Cell::new(task.task_type),
                Cell::new(deps),
                Cell::new(if task.condition.is_some() { "yes" } else { "-" }),
            ]);
        }
    }

    println!();
    println!(
        "  Workflow '{}': {} task(s) in {} wave(s), at most {} at once",
        style(&def.name).cyan(),
        def.tasks.len(),
        waves.len(),
        def.parallelism()
    );
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    file: &Path,
    vars: &[String],
    execution_id: Option<String>,
    config: EngineConfig,
    output: Output,
) -> Result<()> {
    let variables = vars
        .iter()
        .map(|raw| parse_var(raw))
        .collect::<Result<HashMap<_, _>>>()?;

    let engine = WorkflowEngine::builder()
        .agent_invoker(Arc::new(EchoAgent))
        .tool_invoker(Arc::new(EchoTool))
        .config(config)
        .build();
    builtins::register(&engine);

    let def = engine
        .register_workflow_file(file)
        .with_context(|| format!("Failed to load workflow {}", file.display()))?;

    let progress = (!output.json && !output.quiet).then(|| spawn_progress(engine.subscribe()));

    let id = engine.execute_workflow(&def.name, variables, execution_id)?;
    tracing::info!(execution_id = id.as_str(), workflow = def.name.as_str(), "running workflow");

    let execution = tokio::select! {
        result = engine.wait_for_execution(&id) => result?,
        _ = tokio::signal::ctrl_c() => {
            if engine.cancel_execution(&id).await {
                eprintln!("  {} Cancelling; waiting for running tasks", style("!").yellow().bold());
            }
            engine.wait_for_execution(&id).await?
        }
    };

    engine.shutdown().await;
    drop(engine);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else if !output.quiet {
        print_execution(&def, &execution);
    }

    if execution.status != ExecutionStatus::Success {
        bail!(
            "Execution {} finished with status {}{}",
            execution.execution_id,
            execution.status,
            execution
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Parse `KEY=VALUE`. The value is taken as JSON when it parses, else as a string.
fn parse_var(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --var '{raw}': expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --var '{raw}': empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Print task lifecycle events to stderr until the engine's bus closes.
fn spawn_progress(mut events: broadcast::Receiver<EngineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                EngineEvent::TaskStarted { task_id, attempt, .. } if attempt > 1 => {
                    eprintln!("  {} {task_id} (attempt {attempt})", style(">").cyan());
                }
                EngineEvent::TaskStarted { task_id, .. } => {
                    eprintln!("  {} {task_id}", style(">").cyan());
                }
                EngineEvent::TaskRetrying {
                    task_id, delay_ms, error, ..
                } => {
                    eprintln!(
                        "  {} {task_id} failed ({error}), retrying in {delay_ms}ms",
                        style("~").yellow()
                    );
                }
                EngineEvent::TaskSucceeded {
                    task_id, duration_ms, ..
                } => {
                    eprintln!("  {} {task_id} ({duration_ms}ms)", style("*").green());
                }
                EngineEvent::TaskFailed { task_id, error, .. } => {
                    eprintln!("  {} {task_id}: {error}", style("x").red().bold());
                }
                EngineEvent::TaskSkipped { task_id, reason, .. } => {
                    eprintln!("  {} {task_id} skipped: {reason}", style("-").dim());
                }
                EngineEvent::ExecutionStarted { .. } | EngineEvent::ExecutionFinished { .. } => {}
            }
        }
    })
}

fn status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Success => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Skipped => Color::Yellow,
        TaskStatus::Cancelled => Color::DarkGrey,
        TaskStatus::Pending | TaskStatus::Running => Color::Cyan,
    };
    Cell::new(status).fg(color)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn print_execution(def: &WorkflowDefinition, execution: &WorkflowExecution) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Result / Error"),
        ]);

    for task in &def.tasks {
        let Some(record) = execution.task_executions.get(&task.id) else {
            continue;
        };
        let detail = match (&record.error, &record.result) {
            (Some(error), _) => error.clone(),
            (None, Some(result)) => result.to_string(),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&task.id),
            status_cell(record.status),
            Cell::new(record.attempt),
            Cell::new(
                record
                    .duration
                    .map(|d| format!("{d:.3}s"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(truncate(&detail, 80)),
        ]);
    }

    let status = match execution.status {
        ExecutionStatus::Success => style(execution.status.as_str()).green().bold(),
        ExecutionStatus::Failed => style(execution.status.as_str()).red().bold(),
        _ => style(execution.status.as_str()).yellow().bold(),
    };

    println!();
    println!(
        "  Execution {} of '{}': {}",
        style(&execution.execution_id).dim(),
        style(&execution.workflow_name).cyan(),
        status
    );
    if let Some(duration) = execution.duration {
        println!("  Duration: {duration:.3}s");
    }
    if let Some(error) = &execution.error {
        println!("  Error: {error}");
    }
    println!("{table}");

    if !execution.variables.is_empty() {
        let mut names: Vec<&String> = execution.variables.keys().collect();
        names.sort();
        println!("  Variables:");
        for name in names {
            println!(
                "    {} = {}",
                style(name).cyan(),
                truncate(&execution.variables[name].to_string(), 80)
            );
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
