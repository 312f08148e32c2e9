//! CLI command definitions for the `flowline` binary.
//!
//! Uses clap derive macros. Resource commands follow a noun-verb pattern
//! (`flowline automation create`, `flowline schedule next`).

pub mod audit;
pub mod automation;
pub mod cleanup;
pub mod execution;
pub mod schedule;
pub mod serve;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use flowline_types::automation::Variables;
use flowline_types::execution::ExecutionStatus;
use serde::Serialize;

/// Run and schedule workflow automations.
#[derive(Parser)]
#[command(name = "flowline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit process logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Name recorded as the actor in the audit log.
    #[arg(long, global = true, env = "FLOWLINE_ACTOR", default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage automations (create, list, show, update, lifecycle, delete).
    #[command(alias = "auto")]
    Automation {
        #[command(subcommand)]
        action: automation::AutomationCommand,
    },

    /// Run an automation now.
    Run {
        /// Automation id or name.
        automation: String,

        /// JSON object merged over the automation's default variables.
        #[arg(long)]
        input: Option<String>,

        /// Show a spinner and print the finished execution.
        #[arg(long)]
        wait: bool,
    },

    /// Inspect and cancel executions.
    #[command(alias = "exec")]
    Execution {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Manage cron schedules.
    Schedule {
        #[command(subcommand)]
        action: schedule::ScheduleCommand,
    },

    /// Query the audit log.
    Audit {
        #[command(subcommand)]
        action: audit::AuditCommand,
    },

    /// Delete old executions and audit entries.
    Cleanup {
        /// Age in days; overrides both retention settings from config.toml.
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Run the schedule poller until Ctrl+C or SIGTERM.
    Serve {
        /// Seconds between poll ticks (overrides config.toml).
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a `--input` JSON argument into a variable map.
pub fn parse_input(raw: Option<&str>) -> Result<Variables> {
    match raw {
        None => Ok(Variables::new()),
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).context("Invalid JSON for --input")?;
            match value {
                serde_json::Value::Object(map) => Ok(map),
                _ => anyhow::bail!("--input must be a JSON object"),
            }
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn new_table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// First 8 characters of an id, for table columns.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn status_cell(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Pending => cell.fg(Color::Yellow),
        ExecutionStatus::Running => cell.fg(Color::Blue),
        ExecutionStatus::Success => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
        ExecutionStatus::Cancelled => cell.fg(Color::DarkYellow),
        ExecutionStatus::Timeout => cell.fg(Color::Magenta),
    }
}

pub fn format_time(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_input_object() {
        let vars = parse_input(Some(r#"{"order_id": 42}"#)).unwrap();
        assert_eq!(vars["order_id"], 42);
        assert!(parse_input(None).unwrap().is_empty());
    }

    #[test]
    fn test_parse_input_rejects_non_objects() {
        assert!(parse_input(Some("[1, 2]")).is_err());
        assert!(parse_input(Some("{not json")).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "flowline", "run", "nightly", "--input", "{}", "--wait", "--json", "--actor", "ops",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.actor, "ops");
        match cli.command {
            Commands::Run { automation, wait, .. } => {
                assert_eq!(automation, "nightly");
                assert!(wait);
            }
            _ => panic!("expected run"),
        }
    }
}
