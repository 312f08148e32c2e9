//! Execution tracking types.
//!
//! An `Execution` is one concrete run of an automation. Its status follows
//! `Pending -> Running -> {Success, Failed, Cancelled, Timeout}`; a pending
//! execution may also be cancelled directly. Terminal states never change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::Variables;

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of an automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub automation_id: Uuid,
    /// Automation version the run was created against.
    pub automation_version: u32,
    pub trigger_type: TriggerType,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: Variables,
    /// Node outputs keyed by node id.
    #[serde(default)]
    pub output: Variables,
    /// Final variable snapshot (defaults overlaid by input and run mutations).
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Id of the node that caused a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_step: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Total retry attempts made across all nodes.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

impl Execution {
    /// Build a fresh pending execution.
    pub fn pending(
        automation_id: Uuid,
        automation_version: u32,
        trigger_type: TriggerType,
        input: Variables,
        triggered_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            automation_id,
            automation_version,
            trigger_type,
            status: ExecutionStatus::Pending,
            input,
            output: Variables::new(),
            variables: Variables::new(),
            logs: Vec::new(),
            error_message: None,
            error_step: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            triggered_by,
        }
    }

    /// Log entries attributed to a given node.
    pub fn logs_for_node<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a LogEntry> {
        self.logs
            .iter()
            .filter(move |l| l.node_id.as_deref() == Some(node_id))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Success) | (Running, Failed) | (Running, Cancelled) | (Running, Timeout) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// What caused an execution to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Webhook,
    Event,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Webhook => "webhook",
            TriggerType::Event => "event",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggerType::Manual),
            "scheduled" => Ok(TriggerType::Scheduled),
            "webhook" => Ok(TriggerType::Webhook),
            "event" => Ok(TriggerType::Event),
            other => Err(format!("invalid trigger type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// One line of an execution's own log, persisted with the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Queries and updates
// ---------------------------------------------------------------------------

/// Filter for listing executions. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub automation_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<u32>,
}

/// Fields written together with a status change.
///
/// Applied by the repository only when the stored status still equals the
/// expected one, so each change is a single compare-and-set.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub error_step: Option<String>,
    pub output: Option<Variables>,
    pub variables: Option<Variables>,
    pub retry_count: Option<u32>,
}

impl StatusChange {
    pub fn to(status: ExecutionStatus) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            error_step: None,
            output: None,
            variables: None,
            retry_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ExecutionStatus; 6] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
        ExecutionStatus::Timeout,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from} -> {to} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_pending_transitions() {
        let p = ExecutionStatus::Pending;
        assert!(p.can_transition_to(ExecutionStatus::Running));
        assert!(p.can_transition_to(ExecutionStatus::Cancelled));
        assert!(!p.can_transition_to(ExecutionStatus::Success));
        assert!(!p.can_transition_to(ExecutionStatus::Timeout));
        assert!(!p.can_transition_to(ExecutionStatus::Pending));
    }

    #[test]
    fn test_running_transitions() {
        let r = ExecutionStatus::Running;
        assert!(r.can_transition_to(ExecutionStatus::Success));
        assert!(r.can_transition_to(ExecutionStatus::Failed));
        assert!(r.can_transition_to(ExecutionStatus::Cancelled));
        assert!(r.can_transition_to(ExecutionStatus::Timeout));
        assert!(!r.can_transition_to(ExecutionStatus::Pending));
        assert!(!r.can_transition_to(ExecutionStatus::Running));
    }

    #[test]
    fn test_status_string_forms_match_serde() {
        for s in ALL {
            let via_serde = serde_json::to_value(s).unwrap();
            assert_eq!(via_serde, s.as_str());
            assert_eq!(s.as_str().parse::<ExecutionStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_pending_execution_defaults() {
        let exec = Execution::pending(
            Uuid::now_v7(),
            3,
            TriggerType::Manual,
            Variables::new(),
            Some("alice".to_string()),
        );
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.automation_version, 3);
        assert!(exec.started_at.is_none());
        assert!(exec.logs.is_empty());
    }

    #[test]
    fn test_logs_for_node() {
        let mut exec = Execution::pending(
            Uuid::now_v7(),
            1,
            TriggerType::Manual,
            Variables::new(),
            None,
        );
        exec.logs.push(LogEntry::new(LogLevel::Info, "node starting", Some("a")));
        exec.logs.push(LogEntry::new(LogLevel::Info, "node starting", Some("b")));
        exec.logs.push(LogEntry::new(LogLevel::Info, "execution started", None));

        assert_eq!(exec.logs_for_node("a").count(), 1);
        assert_eq!(exec.logs_for_node("c").count(), 0);
    }
}
