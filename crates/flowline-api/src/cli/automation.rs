//! CLI automation management subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use dialoguer::Confirm;
use flowline_core::service::automation::AutomationError;
use flowline_core::workflow::definition::{
    AutomationDefinition, discover_definitions, load_definition_file, save_definition_file,
};
use flowline_types::automation::{Automation, AutomationStatus};
use serde_json::json;

use super::{format_time, new_table, print_json, short_id};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum AutomationCommand {
    /// Create a draft automation from a YAML or JSON definition file.
    Create {
        /// Path to the definition file.
        file: PathBuf,

        /// Activate it right away.
        #[arg(long)]
        activate: bool,
    },

    /// Create drafts from every definition file in a directory.
    Import {
        /// Directory holding .yaml/.yml/.json files.
        dir: PathBuf,
    },

    /// List automations.
    #[command(alias = "ls")]
    List {
        /// Filter by status (draft, active, paused, archived).
        #[arg(long)]
        status: Option<AutomationStatus>,
    },

    /// Show one automation.
    Show {
        /// Automation id or name.
        automation: String,
    },

    /// Replace an automation's definition (bumps its version).
    Update {
        /// Automation id or name.
        automation: String,

        /// Path to the new definition file.
        file: PathBuf,
    },

    /// Write an automation's definition to a file.
    Export {
        /// Automation id or name.
        automation: String,

        /// Output path; the extension picks YAML or JSON.
        file: PathBuf,
    },

    /// Allow runs and scheduled fires.
    Activate { automation: String },

    /// Stop new runs until re-activated.
    Pause { automation: String },

    /// Retire permanently.
    Archive { automation: String },

    /// Delete an automation and its schedules.
    #[command(alias = "rm")]
    Delete {
        automation: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_automation_command(
    cmd: AutomationCommand,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    match cmd {
        AutomationCommand::Create { file, activate } => {
            handle_create(&file, activate, state, actor, json).await
        }
        AutomationCommand::Import { dir } => handle_import(&dir, state, actor, json).await,
        AutomationCommand::List { status } => handle_list(status, state, json).await,
        AutomationCommand::Show { automation } => handle_show(&automation, state, json).await,
        AutomationCommand::Update { automation, file } => {
            handle_update(&automation, &file, state, actor, json).await
        }
        AutomationCommand::Export { automation, file } => {
            handle_export(&automation, &file, state, json).await
        }
        AutomationCommand::Activate { automation } => {
            handle_status(&automation, AutomationStatus::Active, state, actor, json).await
        }
        AutomationCommand::Pause { automation } => {
            handle_status(&automation, AutomationStatus::Paused, state, actor, json).await
        }
        AutomationCommand::Archive { automation } => {
            handle_status(&automation, AutomationStatus::Archived, state, actor, json).await
        }
        AutomationCommand::Delete { automation, force } => {
            handle_delete(&automation, force, state, actor, json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Create / import / update / export
// ---------------------------------------------------------------------------

async fn handle_create(
    file: &Path,
    activate: bool,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    let def = load_definition_file(file)
        .with_context(|| format!("Failed to load definition {}", file.display()))?;
    let automations = &state.engine.automations;

    let mut automation = automations.create(def, Some(actor)).await?;
    if activate {
        automation = automations.activate(&automation.id, Some(actor)).await?;
    }

    if json {
        return print_json(&automation);
    }
    println!();
    println!(
        "  {} Created automation '{}'",
        style("*").green().bold(),
        style(&automation.name).cyan()
    );
    println!("  ID: {}", automation.id);
    println!("  Nodes: {}", automation.workflow.nodes.len());
    println!("  Status: {}", automation.status);
    println!();
    Ok(())
}

async fn handle_import(dir: &Path, state: &AppState, actor: &str, json: bool) -> Result<()> {
    let found = discover_definitions(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut created = Vec::new();
    let mut skipped = Vec::new();
    for (path, def) in found {
        match state.engine.automations.create(def, Some(actor)).await {
            Ok(automation) => created.push(automation),
            Err(AutomationError::DuplicateName(name)) => {
                tracing::info!(path = %path.display(), name = name.as_str(), "already imported");
                skipped.push(name);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to import {}", path.display())),
        }
    }

    if json {
        return print_json(&json!({
            "created": created.iter().map(|a| json!({"id": a.id, "name": a.name})).collect::<Vec<_>>(),
            "skipped": skipped,
        }));
    }
    println!();
    for a in &created {
        println!("  {} {}", style("+").green().bold(), style(&a.name).cyan());
    }
    for name in &skipped {
        println!("  {} {} (name in use)", style("=").dim(), name);
    }
    println!();
    println!("  Imported {} automation(s), skipped {}.", created.len(), skipped.len());
    println!();
    Ok(())
}

async fn handle_update(
    target: &str,
    file: &Path,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    let automations = &state.engine.automations;
    let existing = automations.resolve(target).await?;
    let def = load_definition_file(file)
        .with_context(|| format!("Failed to load definition {}", file.display()))?;
    let updated = automations.update(&existing.id, def, Some(actor)).await?;

    if json {
        return print_json(&updated);
    }
    println!();
    println!(
        "  {} Updated '{}' to version {}",
        style("*").green().bold(),
        style(&updated.name).cyan(),
        updated.version
    );
    println!();
    Ok(())
}

async fn handle_export(target: &str, file: &Path, state: &AppState, json: bool) -> Result<()> {
    let automation = state.engine.automations.resolve(target).await?;
    save_definition_file(file, &to_definition(&automation))
        .with_context(|| format!("Failed to write {}", file.display()))?;

    if json {
        return print_json(&json!({"id": automation.id, "path": file.display().to_string()}));
    }
    println!();
    println!(
        "  {} Exported '{}' to {}",
        style("*").green().bold(),
        style(&automation.name).cyan(),
        file.display()
    );
    println!();
    Ok(())
}

fn to_definition(automation: &Automation) -> AutomationDefinition {
    AutomationDefinition {
        name: automation.name.clone(),
        description: automation.description.clone(),
        error_handling: automation.error_handling,
        retry_config: automation.retry_config.clone(),
        timeout_secs: automation.timeout_secs,
        workflow: automation.workflow.clone(),
    }
}

// ---------------------------------------------------------------------------
// List / show
// ---------------------------------------------------------------------------

async fn handle_list(status: Option<AutomationStatus>, state: &AppState, json: bool) -> Result<()> {
    let automations = state.engine.automations.list(status).await?;

    if json {
        return print_json(&automations);
    }
    if automations.is_empty() {
        println!();
        println!("  No automations.");
        println!(
            "  Create one with: {}",
            style("flowline automation create <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = new_table(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("ID"),
        Cell::new("Status"),
        Cell::new("Version"),
        Cell::new("Nodes"),
        Cell::new("Updated"),
    ]);
    for a in &automations {
        table.add_row(vec![
            Cell::new(&a.name),
            Cell::new(short_id(&a.id)),
            automation_status_cell(a.status),
            Cell::new(a.version),
            Cell::new(a.workflow.nodes.len()),
            Cell::new(format_time(&a.updated_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(target: &str, state: &AppState, json: bool) -> Result<()> {
    let automation = state.engine.automations.resolve(target).await?;
    if json {
        return print_json(&automation);
    }

    println!();
    println!("  {} {}", style("Automation:").bold(), style(&automation.name).cyan());
    println!("  ID: {}", automation.id);
    if let Some(desc) = &automation.description {
        println!("  Description: {desc}");
    }
    println!("  Status: {}", automation.status);
    println!("  Version: {}", automation.version);
    println!("  Error handling: {}", automation.error_handling);
    println!(
        "  Retries: {} ({:?}, base {}ms)",
        automation.retry_config.max_retries,
        automation.retry_config.backoff,
        automation.retry_config.base_delay_ms
    );
    if let Some(t) = automation.timeout_secs {
        println!("  Timeout: {t}s");
    }
    println!();

    let mut nodes = new_table(vec![
        Cell::new("Node").fg(Color::Cyan),
        Cell::new("Type"),
        Cell::new("On error"),
    ]);
    for node in &automation.workflow.nodes {
        nodes.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.node_type),
            Cell::new(automation.error_handling_for(node)),
        ]);
    }
    println!("{nodes}");

    if !automation.workflow.edges.is_empty() {
        println!();
        for edge in &automation.workflow.edges {
            match &edge.condition {
                Some(cond) => println!(
                    "  {} -> {}  {}",
                    edge.source,
                    edge.target,
                    style(format!("when {cond}")).dim()
                ),
                None => println!("  {} -> {}", edge.source, edge.target),
            }
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle / delete
// ---------------------------------------------------------------------------

async fn handle_status(
    target: &str,
    to: AutomationStatus,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    let automations = &state.engine.automations;
    let automation = automations.resolve(target).await?;
    let updated = match to {
        AutomationStatus::Active => automations.activate(&automation.id, Some(actor)).await?,
        AutomationStatus::Paused => automations.pause(&automation.id, Some(actor)).await?,
        AutomationStatus::Archived => automations.archive(&automation.id, Some(actor)).await?,
        AutomationStatus::Draft => anyhow::bail!("automations cannot be moved back to draft"),
    };

    if json {
        return print_json(&json!({"id": updated.id, "name": updated.name, "status": updated.status}));
    }
    println!();
    println!(
        "  {} '{}' is now {}",
        style("*").green().bold(),
        style(&updated.name).cyan(),
        updated.status
    );
    println!();
    Ok(())
}

async fn handle_delete(
    target: &str,
    force: bool,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    let automation = state.engine.automations.resolve(target).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete automation '{}' and its schedules?",
                style(&automation.name).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state
        .engine
        .automations
        .delete(&automation.id, Some(actor))
        .await?;

    if json {
        return print_json(&json!({"deleted": true, "id": automation.id}));
    }
    println!(
        "  {} Automation '{}' deleted.",
        style("*").red().bold(),
        automation.name
    );
    Ok(())
}

fn automation_status_cell(status: AutomationStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        AutomationStatus::Draft => cell.fg(Color::Yellow),
        AutomationStatus::Active => cell.fg(Color::Green),
        AutomationStatus::Paused => cell.fg(Color::DarkYellow),
        AutomationStatus::Archived => cell.fg(Color::DarkGrey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowline_types::automation::{ErrorHandling, RetryConfig, WorkflowDefinition};
    use uuid::Uuid;

    #[test]
    fn test_to_definition_keeps_authored_fields() {
        let now = Utc::now();
        let automation = Automation {
            id: Uuid::now_v7(),
            name: "nightly".to_string(),
            description: Some("report".to_string()),
            workflow: WorkflowDefinition::default(),
            error_handling: ErrorHandling::Continue,
            retry_config: RetryConfig::default(),
            timeout_secs: Some(60),
            status: AutomationStatus::Active,
            version: 4,
            created_at: now,
            updated_at: now,
        };
        let def = to_definition(&automation);
        assert_eq!(def.name, "nightly");
        assert_eq!(def.error_handling, ErrorHandling::Continue);
        assert_eq!(def.timeout_secs, Some(60));
    }
}
