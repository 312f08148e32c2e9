//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default, so an empty or missing file yields a
//! working configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Flowline engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether `serve` starts the schedule poller.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between poll ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wall-clock budget for an execution whose automation sets none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Upper bound applied to every computed retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

/// `[retention]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_execution_max_age_days")]
    pub execution_max_age_days: u32,
    #[serde(default = "default_audit_max_age_days")]
    pub audit_max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            execution_max_age_days: default_execution_max_age_days(),
            audit_max_age_days: default_audit_max_age_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_execution_max_age_days() -> u32 {
    30
}

fn default_audit_max_age_days() -> u32 {
    90
}
