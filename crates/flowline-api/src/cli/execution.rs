//! CLI run and execution subcommands.
//!
//! Runs execute inside the CLI process, so `run` always stays up until the
//! execution finishes; `--wait` only changes what is shown meanwhile.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use flowline_core::workflow::execution::CancelOutcome;
use flowline_types::execution::{Execution, ExecutionFilter, ExecutionStatus, LogLevel, TriggerType};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use uuid::Uuid;

use super::{format_time, new_table, parse_input, print_json, short_id, status_cell};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions of this automation (id or name).
        #[arg(long)]
        automation: Option<String>,

        /// Filter by status.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one execution with its log.
    Show {
        /// Execution UUID.
        execution: String,
    },

    /// Cancel a pending or running execution.
    Cancel {
        /// Execution UUID.
        execution: String,
    },
}

pub async fn handle_execution_command(
    cmd: ExecutionCommand,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    match cmd {
        ExecutionCommand::List {
            automation,
            status,
            limit,
        } => handle_list(automation.as_deref(), status, limit, state, json).await,
        ExecutionCommand::Show { execution } => handle_show(&execution, state, json).await,
        ExecutionCommand::Cancel { execution } => {
            handle_cancel(&execution, state, actor, json).await
        }
    }
}

fn parse_execution_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Invalid execution ID: '{raw}'"))
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run_automation(
    state: &AppState,
    target: &str,
    input: Option<&str>,
    wait: bool,
    actor: &str,
    json: bool,
) -> Result<()> {
    let automation = state.engine.automations.resolve(target).await?;
    let input = parse_input(input)?;

    let handle = state
        .engine
        .automations
        .trigger(&automation.id, TriggerType::Manual, input, Some(actor))
        .await?;
    let execution_id = handle.execution_id;

    let spinner = if wait && !json {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Running {}...", automation.name));
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Some(spinner)
    } else {
        if !json {
            println!(
                "  {} Started execution {} of '{}'",
                style("*").green().bold(),
                execution_id,
                style(&automation.name).cyan()
            );
        }
        None
    };

    // Ctrl+C cancels the run and still waits for it to settle.
    let finished = handle.wait();
    tokio::pin!(finished);
    let execution = tokio::select! {
        result = &mut finished => result?,
        _ = tokio::signal::ctrl_c() => {
            state.engine.executions.cancel(&execution_id, Some(actor)).await?;
            finished.await?
        }
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    if json {
        print_json(&execution)?;
    } else if wait {
        display_execution(&execution);
    } else {
        println!(
            "  Execution {} finished: {}",
            short_id(&execution.id),
            execution.status
        );
    }

    if execution.status != ExecutionStatus::Success {
        anyhow::bail!("execution {} finished as {}", execution.id, execution.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List / show
// ---------------------------------------------------------------------------

async fn handle_list(
    automation: Option<&str>,
    status: Option<ExecutionStatus>,
    limit: u32,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let automation_id = match automation {
        Some(target) => Some(state.engine.automations.resolve(target).await?.id),
        None => None,
    };
    let filter = ExecutionFilter {
        automation_id,
        status,
        limit: Some(limit),
    };
    let executions = state.engine.executions.list(&filter).await?;

    if json {
        return print_json(&executions);
    }
    if executions.is_empty() {
        println!();
        println!("  No executions.");
        println!();
        return Ok(());
    }

    let mut table = new_table(vec![
        Cell::new("Execution").fg(Color::Cyan),
        Cell::new("Automation"),
        Cell::new("Status"),
        Cell::new("Trigger"),
        Cell::new("Created"),
        Cell::new("Duration"),
    ]);
    for e in &executions {
        table.add_row(vec![
            Cell::new(short_id(&e.id)),
            Cell::new(short_id(&e.automation_id)),
            status_cell(e.status),
            Cell::new(e.trigger_type),
            Cell::new(format_time(&e.created_at)),
            Cell::new(
                e.duration_ms
                    .map(|d| format!("{d}ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(raw_id: &str, state: &AppState, json: bool) -> Result<()> {
    let execution = state.engine.executions.get(&parse_execution_id(raw_id)?).await?;
    if json {
        return print_json(&execution);
    }
    display_execution(&execution);
    Ok(())
}

fn display_execution(execution: &Execution) {
    println!();
    println!(
        "  {} {}",
        style("Execution:").bold(),
        style(execution.id).cyan()
    );
    println!(
        "  Automation: {} (v{})",
        execution.automation_id, execution.automation_version
    );
    println!("  Status: {}", execution.status);
    println!("  Trigger: {}", execution.trigger_type);
    if let Some(by) = &execution.triggered_by {
        println!("  Triggered by: {by}");
    }
    println!("  Created: {}", format_time(&execution.created_at));
    if let Some(t) = execution.started_at {
        println!("  Started: {}", format_time(&t));
    }
    if let Some(t) = execution.completed_at {
        println!("  Completed: {}", format_time(&t));
    }
    if let Some(d) = execution.duration_ms {
        println!("  Duration: {d}ms");
    }
    if execution.retry_count > 0 {
        println!("  Retries: {}", execution.retry_count);
    }
    if let Some(err) = &execution.error_message {
        match &execution.error_step {
            Some(step) => println!("  Error: {} (at {})", style(err).red(), step),
            None => println!("  Error: {}", style(err).red()),
        }
    }

    if !execution.logs.is_empty() {
        println!();
        let mut table = new_table(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Level"),
            Cell::new("Node"),
            Cell::new("Message"),
        ]);
        for entry in &execution.logs {
            table.add_row(vec![
                Cell::new(entry.timestamp.format("%H:%M:%S%.3f").to_string()),
                level_cell(entry.level),
                Cell::new(entry.node_id.as_deref().unwrap_or("-")),
                Cell::new(&entry.message),
            ]);
        }
        println!("{table}");
    }
    println!();
}

fn level_cell(level: LogLevel) -> Cell {
    let cell = Cell::new(level.as_str());
    match level {
        LogLevel::Debug => cell.fg(Color::DarkGrey),
        LogLevel::Info => cell,
        LogLevel::Warn => cell.fg(Color::Yellow),
        LogLevel::Error => cell.fg(Color::Red),
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

async fn handle_cancel(raw_id: &str, state: &AppState, actor: &str, json: bool) -> Result<()> {
    let id = parse_execution_id(raw_id)?;
    let outcome = state.engine.executions.cancel(&id, Some(actor)).await?;

    let status = match &outcome {
        CancelOutcome::Cancelled(_) => "cancelled",
        CancelOutcome::Signalled(_) => "cancelling",
    };
    if json {
        return print_json(&json!({"execution_id": id, "status": status}));
    }
    println!();
    println!(
        "  {} Execution {} {}",
        style("*").green().bold(),
        style(short_id(&id)).cyan(),
        status
    );
    println!();
    Ok(())
}
