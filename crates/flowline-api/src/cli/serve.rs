//! Foreground schedule poller.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Start the scheduler, block until `shutdown` resolves, then stop it.
pub async fn serve(
    state: &AppState,
    poll_interval: Option<u64>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let config = &state.engine.config.scheduler;
    if !config.enabled && poll_interval.is_none() {
        anyhow::bail!("the scheduler is disabled (set [scheduler] enabled = true)");
    }

    let secs = poll_interval.unwrap_or(config.poll_interval_secs).max(1);
    state
        .engine
        .scheduler
        .start(Duration::from_secs(secs))
        .await?;

    println!();
    println!(
        "  {} Polling schedules every {}s (data: {})",
        style("*").green().bold(),
        secs,
        state.data_dir.display()
    );
    println!("  Press Ctrl+C to stop.");
    println!();

    shutdown.await;

    tracing::info!("shutdown signal received");
    state.engine.scheduler.stop().await?;
    println!("  Scheduler stopped.");
    Ok(())
}
