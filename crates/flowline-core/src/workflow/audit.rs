//! Append-only audit sink for automation, execution and schedule events.
//!
//! `record` never fails the caller: a storage error is logged at warn level
//! and the operation that produced the event carries on. Entries that must
//! exist (an execution's completion) go through `record_required`, which
//! retries and hands the final error back.

use std::time::Duration;

use chrono::Utc;
use flowline_types::audit::{AuditAction, AuditFilter, AuditLogEntry, EntityType};
use flowline_types::error::RepositoryError;
use serde_json::Value;
use uuid::Uuid;

use crate::repository::audit::AuditRepository;

/// Actor recorded for events the engine produces on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Writes attempted by `record_required` before giving up.
const REQUIRED_ATTEMPTS: u32 = 3;

/// An audit event under construction.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: AuditAction,
    entity_type: EntityType,
    entity_id: String,
    automation_id: Option<Uuid>,
    execution_id: Option<Uuid>,
    details: Value,
    actor: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, entity_type: EntityType, entity_id: impl ToString) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            automation_id: None,
            execution_id: None,
            details: Value::Object(Default::default()),
            actor: None,
        }
    }

    pub fn automation(mut self, id: Uuid) -> Self {
        self.automation_id = Some(id);
        self
    }

    pub fn execution(mut self, id: Uuid) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    fn into_entry(self) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::now_v7(),
            execution_id: self.execution_id,
            automation_id: self.automation_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            details: self.details,
            actor: self.actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct AuditLogger<R: AuditRepository> {
    repo: R,
}

impl<R: AuditRepository> AuditLogger<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Append an entry. Returns it, or `None` if storage rejected the write.
    pub async fn record(&self, event: AuditEvent) -> Option<AuditLogEntry> {
        let entry = event.into_entry();
        match self.repo.append_audit(&entry).await {
            Ok(()) => {
                tracing::debug!(
                    action = entry.action.as_str(),
                    entity_type = entry.entity_type.as_str(),
                    entity_id = entry.entity_id.as_str(),
                    "audit entry recorded"
                );
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(
                    action = entry.action.as_str(),
                    entity_id = entry.entity_id.as_str(),
                    error = %e,
                    "failed to record audit entry"
                );
                None
            }
        }
    }

    /// Append an entry that has to be stored, retrying failed writes.
    ///
    /// Every attempt writes the same entry id, so a `Conflict` means an
    /// earlier attempt landed despite reporting an error.
    pub async fn record_required(&self, event: AuditEvent) -> Result<AuditLogEntry, RepositoryError> {
        let entry = event.into_entry();
        let mut attempt = 1;
        loop {
            match self.repo.append_audit(&entry).await {
                Ok(()) | Err(RepositoryError::Conflict(_)) => return Ok(entry),
                Err(e) if attempt >= REQUIRED_ATTEMPTS => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        action = entry.action.as_str(),
                        entity_id = entry.entity_id.as_str(),
                        attempt,
                        error = %e,
                        "audit write failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.repo.list_audit(filter).await
    }
}
