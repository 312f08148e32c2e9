//! CLI schedule subcommands.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use dialoguer::Confirm;
use flowline_core::workflow::cron::{normalize_schedule, upcoming_runs};
use flowline_core::workflow::scheduler::{NewSchedule, ScheduleUpdate};
use flowline_types::schedule::Schedule;
use serde_json::json;
use uuid::Uuid;

use super::{format_time, new_table, parse_input, print_json, short_id};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Attach a cron schedule to an automation.
    Create {
        /// Automation id or name.
        automation: String,

        /// Cron expression (5 or 6 fields) or "every 5 minutes", "daily", ...
        #[arg(long)]
        cron: String,

        /// IANA timezone the expression is evaluated in.
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Display name (defaults to the expression).
        #[arg(long)]
        name: Option<String>,

        /// JSON object passed as input to each run.
        #[arg(long)]
        input: Option<String>,

        /// Create the schedule disabled.
        #[arg(long)]
        disabled: bool,
    },

    /// List schedules, soonest first.
    #[command(alias = "ls")]
    List {
        /// Only schedules of this automation (id or name).
        #[arg(long)]
        automation: Option<String>,
    },

    /// Change a schedule's timing, name or input.
    Update {
        /// Schedule UUID.
        schedule: String,

        #[arg(long)]
        cron: Option<String>,

        #[arg(long)]
        timezone: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        input: Option<String>,
    },

    /// Resume firing (the next run is computed from now).
    Enable { schedule: String },

    /// Stop firing.
    Disable { schedule: String },

    /// Delete a schedule.
    #[command(alias = "rm")]
    Delete {
        schedule: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Preview upcoming fire times of a schedule or an expression.
    Next {
        /// Schedule UUID (omit to preview --cron instead).
        schedule: Option<String>,

        #[arg(long, conflicts_with = "schedule")]
        cron: Option<String>,

        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// How many occurrences to show.
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

pub async fn handle_schedule_command(
    cmd: ScheduleCommand,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    match cmd {
        ScheduleCommand::Create {
            automation,
            cron,
            timezone,
            name,
            input,
            disabled,
        } => {
            let automation = state.engine.automations.resolve(&automation).await?;
            let new = NewSchedule {
                automation_id: automation.id,
                name: name.unwrap_or_else(|| cron.clone()),
                cron_expression: cron,
                timezone,
                input: parse_input(input.as_deref())?,
                is_active: !disabled,
            };
            let schedule = state.engine.scheduler.create_schedule(new, Some(actor)).await?;
            report(&schedule, "Created", json)
        }
        ScheduleCommand::List { automation } => handle_list(automation.as_deref(), state, json).await,
        ScheduleCommand::Update {
            schedule,
            cron,
            timezone,
            name,
            input,
        } => {
            let update = ScheduleUpdate {
                name,
                cron_expression: cron,
                timezone,
                input: input.as_deref().map(|raw| parse_input(Some(raw))).transpose()?,
                is_active: None,
            };
            let schedule = state
                .engine
                .scheduler
                .update_schedule(&parse_schedule_id(&schedule)?, update, Some(actor))
                .await?;
            report(&schedule, "Updated", json)
        }
        ScheduleCommand::Enable { schedule } => {
            let schedule = state
                .engine
                .scheduler
                .set_active(&parse_schedule_id(&schedule)?, true, Some(actor))
                .await?;
            report(&schedule, "Enabled", json)
        }
        ScheduleCommand::Disable { schedule } => {
            let schedule = state
                .engine
                .scheduler
                .set_active(&parse_schedule_id(&schedule)?, false, Some(actor))
                .await?;
            report(&schedule, "Disabled", json)
        }
        ScheduleCommand::Delete { schedule, force } => {
            handle_delete(&schedule, force, state, actor, json).await
        }
        ScheduleCommand::Next {
            schedule,
            cron,
            timezone,
            count,
        } => handle_next(schedule.as_deref(), cron.as_deref(), &timezone, count, state, json).await,
    }
}

fn parse_schedule_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Invalid schedule ID: '{raw}'"))
}

fn report(schedule: &Schedule, verb: &str, json: bool) -> Result<()> {
    if json {
        return print_json(schedule);
    }
    println!();
    println!(
        "  {} {} schedule '{}'",
        style("*").green().bold(),
        verb,
        style(&schedule.name).cyan()
    );
    println!("  ID: {}", schedule.id);
    println!(
        "  Cron: {} ({})",
        schedule.cron_expression, schedule.timezone
    );
    if schedule.is_active {
        println!("  Next run: {}", format_time(&schedule.next_run_at));
    } else {
        println!("  Disabled");
    }
    println!();
    Ok(())
}

async fn handle_list(automation: Option<&str>, state: &AppState, json: bool) -> Result<()> {
    let automation_id = match automation {
        Some(target) => Some(state.engine.automations.resolve(target).await?.id),
        None => None,
    };
    let schedules = state
        .engine
        .scheduler
        .list_schedules(automation_id.as_ref())
        .await?;

    if json {
        return print_json(&schedules);
    }
    if schedules.is_empty() {
        println!();
        println!("  No schedules.");
        println!();
        return Ok(());
    }

    let mut table = new_table(vec![
        Cell::new("Schedule").fg(Color::Cyan),
        Cell::new("Name"),
        Cell::new("Automation"),
        Cell::new("Cron"),
        Cell::new("Timezone"),
        Cell::new("Next run (UTC)"),
        Cell::new("Runs"),
        Cell::new("Failures"),
    ]);
    for s in &schedules {
        let next = if s.is_active {
            Cell::new(format_time(&s.next_run_at))
        } else {
            Cell::new("disabled").fg(Color::DarkGrey)
        };
        let failures = if s.failure_count > 0 {
            Cell::new(s.failure_count).fg(Color::Red)
        } else {
            Cell::new(s.failure_count)
        };
        table.add_row(vec![
            Cell::new(short_id(&s.id)),
            Cell::new(&s.name),
            Cell::new(short_id(&s.automation_id)),
            Cell::new(&s.cron_expression),
            Cell::new(&s.timezone),
            next,
            Cell::new(s.run_count),
            failures,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_delete(
    raw_id: &str,
    force: bool,
    state: &AppState,
    actor: &str,
    json: bool,
) -> Result<()> {
    let id = parse_schedule_id(raw_id)?;
    let schedule = state.engine.scheduler.get_schedule(&id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete schedule '{}'?",
                style(&schedule.name).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.engine.scheduler.delete_schedule(&id, Some(actor)).await?;
    if json {
        return print_json(&json!({"deleted": true, "id": id}));
    }
    println!(
        "  {} Schedule '{}' deleted.",
        style("*").red().bold(),
        schedule.name
    );
    Ok(())
}

async fn handle_next(
    schedule: Option<&str>,
    cron: Option<&str>,
    timezone: &str,
    count: usize,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let (expr, tz) = match (schedule, cron) {
        (Some(raw), _) => {
            let s = state.engine.scheduler.get_schedule(&parse_schedule_id(raw)?).await?;
            (s.cron_expression, s.timezone)
        }
        (None, Some(expr)) => (expr.to_string(), timezone.to_string()),
        (None, None) => anyhow::bail!("pass a schedule ID or --cron"),
    };

    let runs = upcoming_runs(&expr, &tz, Utc::now(), count)?;
    let local_tz = flowline_core::workflow::cron::parse_timezone(&tz)?;

    if json {
        return print_json(&json!({
            "cron_expression": expr,
            "normalized": normalize_schedule(&expr)?,
            "timezone": tz,
            "runs": runs,
        }));
    }
    println!();
    println!(
        "  Next {} run(s) of {} in {}",
        runs.len(),
        style(&expr).cyan(),
        tz
    );
    println!();
    for run in &runs {
        println!(
            "  {}  {}",
            run.with_timezone(&local_tz).format("%Y-%m-%d %H:%M:%S %Z"),
            style(format!("({} UTC)", run.format("%H:%M"))).dim()
        );
    }
    println!();
    Ok(())
}
