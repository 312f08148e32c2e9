//! Flowline CLI entry point.
//!
//! Binary name: `flowline`
//!
//! Parses CLI arguments, initializes the database and engine, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowline", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let actor = cli.actor.as_str();
    let json = cli.json;

    match cli.command {
        Commands::Automation { action } => {
            cli::automation::handle_automation_command(action, &state, actor, json).await?;
        }

        Commands::Run {
            automation,
            input,
            wait,
        } => {
            cli::execution::run_automation(&state, &automation, input.as_deref(), wait, actor, json)
                .await?;
        }

        Commands::Execution { action } => {
            cli::execution::handle_execution_command(action, &state, actor, json).await?;
        }

        Commands::Schedule { action } => {
            cli::schedule::handle_schedule_command(action, &state, actor, json).await?;
        }

        Commands::Audit { action } => {
            cli::audit::handle_audit_command(action, &state, json).await?;
        }

        Commands::Cleanup {
            older_than_days,
            force,
        } => {
            cli::cleanup::cleanup(&state, older_than_days, force, actor, json).await?;
        }

        Commands::Serve { poll_interval } => {
            cli::serve::serve(&state, poll_interval, shutdown_signal()).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the `-v` flags.
fn init_tracing(cli: &Cli) {
    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,flowline_core=debug,flowline_infra=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
