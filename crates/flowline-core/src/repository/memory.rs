//! In-process store backed by `DashMap`.
//!
//! Implements every repository port without I/O so the engine can be
//! embedded or tested without a database. Values are cloned on read and no
//! `DashMap` guard is ever held across an await point. Conditional writes
//! (status compare-and-set, schedule claim) run under the entry's shard lock,
//! which makes them atomic with respect to other callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowline_types::audit::{AuditFilter, AuditLogEntry};
use flowline_types::automation::{Automation, AutomationStatus};
use flowline_types::error::RepositoryError;
use flowline_types::execution::{
    Execution, ExecutionFilter, ExecutionStatus, LogEntry, StatusChange,
};
use flowline_types::schedule::Schedule;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::audit::AuditRepository;
use super::automation::AutomationRepository;
use super::execution::ExecutionRepository;
use super::schedule::ScheduleRepository;

/// Cloneable handle to shared in-memory tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    automations: Arc<DashMap<Uuid, Automation>>,
    executions: Arc<DashMap<Uuid, Execution>>,
    schedules: Arc<DashMap<Uuid, Schedule>>,
    audit: Arc<RwLock<Vec<AuditLogEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_change(execution: &mut Execution, change: &StatusChange) {
    execution.status = change.status;
    if let Some(t) = change.started_at {
        execution.started_at = Some(t);
    }
    if let Some(t) = change.completed_at {
        execution.completed_at = Some(t);
    }
    if let Some(d) = change.duration_ms {
        execution.duration_ms = Some(d);
    }
    if let Some(msg) = &change.error_message {
        execution.error_message = Some(msg.clone());
    }
    if let Some(step) = &change.error_step {
        execution.error_step = Some(step.clone());
    }
    if let Some(output) = &change.output {
        execution.output = output.clone();
    }
    if let Some(vars) = &change.variables {
        execution.variables = vars.clone();
    }
    if let Some(n) = change.retry_count {
        execution.retry_count = n;
    }
}

// ---------------------------------------------------------------------------
// AutomationRepository
// ---------------------------------------------------------------------------

impl AutomationRepository for InMemoryStore {
    async fn save_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        self.automations.insert(automation.id, automation.clone());
        Ok(())
    }

    async fn get_automation(&self, id: &Uuid) -> Result<Option<Automation>, RepositoryError> {
        Ok(self.automations.get(id).map(|a| a.value().clone()))
    }

    async fn list_automations(
        &self,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>, RepositoryError> {
        let mut out: Vec<Automation> = self
            .automations
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .map(|a| a.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_automation(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let existed = self.automations.remove(id).is_some();
        if existed {
            self.schedules.retain(|_, s| s.automation_id != *id);
        }
        Ok(existed)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository
// ---------------------------------------------------------------------------

impl ExecutionRepository for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        if self.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.get(id).map(|e| e.value().clone()))
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut out: Vec<Execution> = self
            .executions
            .iter()
            .filter(|e| filter.automation_id.is_none_or(|id| e.automation_id == id))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .map(|e| Execution {
                logs: Vec::new(),
                ..e.value().clone()
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn compare_and_set_status(
        &self,
        id: &Uuid,
        expected: ExecutionStatus,
        change: &StatusChange,
    ) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.executions.get_mut(id) else {
            return Err(RepositoryError::NotFound);
        };
        if entry.status != expected {
            return Ok(false);
        }
        apply_change(entry.value_mut(), change);
        Ok(true)
    }

    async fn append_log_if_running(
        &self,
        id: &Uuid,
        entry: &LogEntry,
    ) -> Result<bool, RepositoryError> {
        let Some(mut execution) = self.executions.get_mut(id) else {
            return Err(RepositoryError::NotFound);
        };
        if execution.status != ExecutionStatus::Running {
            return Ok(false);
        }
        execution.logs.push(entry.clone());
        Ok(true)
    }

    async fn purge_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let before = self.executions.len();
        self.executions.retain(|_, e| {
            !(e.status.is_terminal() && e.completed_at.is_some_and(|t| t < cutoff))
        });
        Ok((before - self.executions.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// ScheduleRepository
// ---------------------------------------------------------------------------

impl ScheduleRepository for InMemoryStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<(), RepositoryError> {
        if self.schedules.contains_key(&schedule.id) {
            return Err(RepositoryError::Conflict(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }
        if !self.automations.contains_key(&schedule.automation_id) {
            return Err(RepositoryError::Conflict(format!(
                "automation {} does not exist",
                schedule.automation_id
            )));
        }
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<Schedule>, RepositoryError> {
        Ok(self.schedules.get(id).map(|s| s.value().clone()))
    }

    async fn list_schedules(
        &self,
        automation_id: Option<&Uuid>,
    ) -> Result<Vec<Schedule>, RepositoryError> {
        let mut out: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|s| automation_id.is_none_or(|id| s.automation_id == *id))
            .map(|s| s.value().clone())
            .collect();
        out.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_schedule(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.schedules.remove(id).is_some())
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, RepositoryError> {
        let mut out: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|s| s.is_due(now))
            .map(|s| s.value().clone())
            .collect();
        out.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        Ok(out)
    }

    async fn claim_schedule(
        &self,
        id: &Uuid,
        expected_next_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut schedule) = self.schedules.get_mut(id) else {
            return Ok(false);
        };
        if !schedule.is_active || schedule.next_run_at != expected_next_run {
            return Ok(false);
        }
        schedule.next_run_at = next_run;
        schedule.last_run_at = Some(now);
        schedule.run_count += 1;
        schedule.updated_at = now;
        Ok(true)
    }

    async fn update_schedule_settings(
        &self,
        schedule: &Schedule,
        reschedule_from: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut stored) = self.schedules.get_mut(&schedule.id) else {
            return Err(RepositoryError::NotFound);
        };
        if let Some(expected) = reschedule_from {
            if stored.next_run_at != expected {
                return Ok(false);
            }
            stored.next_run_at = schedule.next_run_at;
        }
        stored.name = schedule.name.clone();
        stored.cron_expression = schedule.cron_expression.clone();
        stored.timezone = schedule.timezone.clone();
        stored.input = schedule.input.clone();
        stored.is_active = schedule.is_active;
        stored.updated_at = schedule.updated_at;
        Ok(true)
    }

    async fn record_schedule_failure(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let Some(mut schedule) = self.schedules.get_mut(id) else {
            return Err(RepositoryError::NotFound);
        };
        schedule.failure_count += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuditRepository
// ---------------------------------------------------------------------------

impl AuditRepository for InMemoryStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let entries = self.audit.read().await;
        let mut out: Vec<AuditLogEntry> = entries
            .iter()
            .filter(|e| filter.automation_id.is_none_or(|id| e.automation_id == Some(id)))
            .filter(|e| filter.execution_id.is_none_or(|id| e.execution_id == Some(id)))
            .filter(|e| filter.entity_type.is_none_or(|t| e.entity_type == t))
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut entries = self.audit.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
