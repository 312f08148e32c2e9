//! Application state wiring the engine to SQLite.
//!
//! The engine services are generic over the store; `AppState` pins them to
//! `SqliteStore` and the data directory resolved at startup.

use std::path::PathBuf;

use anyhow::Context;
use flowline_core::service::Engine;
use flowline_core::workflow::action::ActionRegistry;
use flowline_infra::config::{database_url, load_engine_config, resolve_data_dir};
use flowline_infra::sqlite::SqliteStore;

/// Engine pinned to the SQLite store.
pub type FlowlineEngine = Engine<SqliteStore>;

#[derive(Clone)]
pub struct AppState {
    pub engine: FlowlineEngine,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database and
    /// wire the engine with the built-in actions.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let store = SqliteStore::connect(&database_url(&data_dir))
            .await
            .context("Failed to open the flowline database")?;

        let engine = Engine::new(store, ActionRegistry::with_builtins(), config);
        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self { engine, data_dir })
    }
}
