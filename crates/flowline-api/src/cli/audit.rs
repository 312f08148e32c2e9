//! CLI audit log queries.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color};
use flowline_types::audit::{AuditAction, AuditFilter, EntityType};
use uuid::Uuid;

use super::{format_time, new_table, print_json};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum AuditCommand {
    /// List audit entries, newest first.
    #[command(alias = "ls")]
    List {
        /// Only entries about this automation (id or name).
        #[arg(long)]
        automation: Option<String>,

        /// Only entries about this execution.
        #[arg(long)]
        execution: Option<Uuid>,

        /// Entity kind: automation, execution, schedule or system.
        #[arg(long)]
        entity_type: Option<EntityType>,

        /// Action name, e.g. automation_created or execution_cancelled.
        #[arg(long)]
        action: Option<AuditAction>,

        /// Maximum number of entries to display.
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

pub async fn handle_audit_command(cmd: AuditCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        AuditCommand::List {
            automation,
            execution,
            entity_type,
            action,
            limit,
        } => {
            // Deleted automations can only be matched by raw id.
            let automation_id = match automation {
                Some(target) => match target.parse::<Uuid>() {
                    Ok(id) => Some(id),
                    Err(_) => Some(state.engine.automations.resolve(&target).await?.id),
                },
                None => None,
            };
            let filter = AuditFilter {
                automation_id,
                execution_id: execution,
                entity_type,
                action,
                limit: Some(limit),
            };
            let entries = state.engine.audit.list(&filter).await?;

            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!();
                println!("  No audit entries.");
                println!();
                return Ok(());
            }

            let mut table = new_table(vec![
                Cell::new("Time (UTC)").fg(Color::Cyan),
                Cell::new("Action"),
                Cell::new("Entity"),
                Cell::new("Actor"),
                Cell::new("Details"),
            ]);
            for entry in &entries {
                let details = if entry.details.is_null() {
                    String::new()
                } else {
                    entry.details.to_string()
                };
                table.add_row(vec![
                    Cell::new(format_time(&entry.timestamp)),
                    Cell::new(entry.action.as_str()),
                    Cell::new(format!("{}:{}", entry.entity_type.as_str(), entry.entity_id)),
                    Cell::new(&entry.actor),
                    Cell::new(details),
                ]);
            }
            println!();
            println!("{table}");
            println!();
            Ok(())
        }
    }
}
