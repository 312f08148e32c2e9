//! Retention cleanup for finished executions and old audit entries.

use chrono::{DateTime, Duration, Utc};
use flowline_types::audit::{AuditAction, EntityType};
use flowline_types::config::RetentionConfig;
use flowline_types::error::RepositoryError;
use serde::Serialize;
use serde_json::json;

use crate::repository::Store;
use crate::workflow::audit::{AuditEvent, AuditLogger};

/// What one cleanup removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PurgeReport {
    pub executions: u64,
    pub audit_entries: u64,
}

#[derive(Clone)]
pub struct RetentionService<S: Store> {
    store: S,
    audit: AuditLogger<S>,
}

impl<S: Store> RetentionService<S> {
    pub fn new(store: S) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
        }
    }

    /// Delete terminal executions completed before `older_than` and audit
    /// entries recorded before it.
    pub async fn purge(
        &self,
        older_than: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<PurgeReport, RepositoryError> {
        self.purge_split(older_than, older_than, actor).await
    }

    /// Purge using the per-kind ages from `[retention]`.
    pub async fn purge_by_policy(
        &self,
        policy: &RetentionConfig,
        now: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<PurgeReport, RepositoryError> {
        let executions_before = now - Duration::days(i64::from(policy.execution_max_age_days));
        let audit_before = now - Duration::days(i64::from(policy.audit_max_age_days));
        self.purge_split(executions_before, audit_before, actor).await
    }

    async fn purge_split(
        &self,
        executions_before: DateTime<Utc>,
        audit_before: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<PurgeReport, RepositoryError> {
        let report = PurgeReport {
            executions: self.store.purge_executions_before(executions_before).await?,
            audit_entries: self.store.purge_audit_before(audit_before).await?,
        };

        tracing::info!(
            executions = report.executions,
            audit_entries = report.audit_entries,
            "retention cleanup finished"
        );
        // Recorded after the purge so the cleanup entry itself survives.
        self.audit
            .record(
                AuditEvent::new(AuditAction::RetentionCleanup, EntityType::System, "retention")
                    .details(json!({
                        "executions_before": executions_before.to_rfc3339(),
                        "audit_before": audit_before.to_rfc3339(),
                        "executions_deleted": report.executions,
                        "audit_entries_deleted": report.audit_entries,
                    }))
                    .actor(actor),
            )
            .await;

        Ok(report)
    }
}
