//! CLI retention cleanup.

use anyhow::Result;
use chrono::{Duration, Utc};
use console::style;
use dialoguer::Confirm;

use super::print_json;
use crate::state::AppState;

/// Purge old terminal executions and audit entries.
///
/// With `--older-than-days` both kinds use that age; otherwise the
/// `[retention]` settings from `config.toml` apply.
pub async fn cleanup(
    state: &AppState,
    older_than_days: Option<u32>,
    force: bool,
    actor: &str,
    json: bool,
) -> Result<()> {
    let retention = &state.engine.config.retention;

    if !force && !json {
        let prompt = match older_than_days {
            Some(days) => format!("Delete executions and audit entries older than {days} days?"),
            None => format!(
                "Delete executions older than {} days and audit entries older than {} days?",
                retention.execution_max_age_days, retention.audit_max_age_days
            ),
        };
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let now = Utc::now();
    let report = match older_than_days {
        Some(days) => {
            state
                .engine
                .retention
                .purge(now - Duration::days(i64::from(days)), Some(actor))
                .await?
        }
        None => {
            state
                .engine
                .retention
                .purge_by_policy(retention, now, Some(actor))
                .await?
        }
    };

    if json {
        return print_json(&report);
    }
    println!();
    println!(
        "  {} Removed {} execution(s) and {} audit entr{}.",
        style("*").green().bold(),
        report.executions,
        report.audit_entries,
        if report.audit_entries == 1 { "y" } else { "ies" }
    );
    println!();
    Ok(())
}
