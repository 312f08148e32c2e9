//! Audit trail types.
//!
//! Audit entries are immutable records of state-changing events against an
//! automation, execution, or schedule. They are only ever appended, and only
//! removed by the retention purge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// The recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AutomationCreated,
    AutomationUpdated,
    AutomationActivated,
    AutomationPaused,
    AutomationArchived,
    AutomationDeleted,
    ExecutionCreated,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionCancelRequested,
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
    ScheduleFired,
    RetentionCleanup,
}

impl AuditAction {
    pub const ALL: [AuditAction; 15] = [
        AuditAction::AutomationCreated,
        AuditAction::AutomationUpdated,
        AuditAction::AutomationActivated,
        AuditAction::AutomationPaused,
        AuditAction::AutomationArchived,
        AuditAction::AutomationDeleted,
        AuditAction::ExecutionCreated,
        AuditAction::ExecutionStarted,
        AuditAction::ExecutionCompleted,
        AuditAction::ExecutionCancelRequested,
        AuditAction::ScheduleCreated,
        AuditAction::ScheduleUpdated,
        AuditAction::ScheduleDeleted,
        AuditAction::ScheduleFired,
        AuditAction::RetentionCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AutomationCreated => "automation_created",
            AuditAction::AutomationUpdated => "automation_updated",
            AuditAction::AutomationActivated => "automation_activated",
            AuditAction::AutomationPaused => "automation_paused",
            AuditAction::AutomationArchived => "automation_archived",
            AuditAction::AutomationDeleted => "automation_deleted",
            AuditAction::ExecutionCreated => "execution_created",
            AuditAction::ExecutionStarted => "execution_started",
            AuditAction::ExecutionCompleted => "execution_completed",
            AuditAction::ExecutionCancelRequested => "execution_cancel_requested",
            AuditAction::ScheduleCreated => "schedule_created",
            AuditAction::ScheduleUpdated => "schedule_updated",
            AuditAction::ScheduleDeleted => "schedule_deleted",
            AuditAction::ScheduleFired => "schedule_fired",
            AuditAction::RetentionCleanup => "retention_cleanup",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("invalid audit action: '{s}'"))
    }
}

/// Kind of entity an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Automation,
    Execution,
    Schedule,
    System,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Automation => "automation",
            EntityType::Execution => "execution",
            EntityType::Schedule => "schedule",
            EntityType::System => "system",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "automation" => Ok(EntityType::Automation),
            "execution" => Ok(EntityType::Execution),
            "schedule" => Ok(EntityType::Schedule),
            "system" => Ok(EntityType::System),
            other => Err(format!("invalid entity type: '{other}'")),
        }
    }
}

/// Filter for audit queries. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub automation_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub entity_type: Option<EntityType>,
    pub action: Option<AuditAction>,
    pub limit: Option<u32>,
}
