//! Data directory and engine configuration loading.
//!
//! Reads `config.toml` from the data directory (`~/.flowline/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use flowline_types::config::EngineConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "FLOWLINE_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "flowline.db";

/// Resolve the data directory.
///
/// Priority:
/// 1. `FLOWLINE_DATA_DIR` environment variable
/// 2. `~/.flowline`
/// 3. `.flowline` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".flowline");
    }
    PathBuf::from(".flowline")
}

/// SQLite URL for the database file inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: warning, then the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.executor.default_timeout_secs, 3600);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[scheduler]
enabled = false
poll_interval_secs = 5

[executor]
default_timeout_secs = 120

[retention]
execution_max_age_days = 7
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.executor.default_timeout_secs, 120);
        assert_eq!(config.executor.max_retry_delay_ms, 60_000);
        assert_eq!(config.retention.execution_max_age_days, 7);
        assert_eq!(config.retention.audit_max_age_days, 90);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert!(config.scheduler.enabled);
        assert_eq!(config.retention.execution_max_age_days, 30);
    }

    #[test]
    fn database_url_points_into_data_dir() {
        let url = database_url(Path::new("/var/lib/flowline"));
        assert_eq!(url, "sqlite:///var/lib/flowline/flowline.db?mode=rwc");
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: This test is the only one touching FLOWLINE_DATA_DIR and restores it immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-flowline");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-flowline"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
