//! SQLite audit log repository.
//!
//! Insert-only from the engine's point of view; rows leave only through the
//! retention purge.

use chrono::{DateTime, Utc};
use flowline_core::repository::audit::AuditRepository;
use flowline_types::audit::{AuditFilter, AuditLogEntry};
use flowline_types::error::RepositoryError;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{
    SqliteStore, format_datetime, parse_datetime, parse_enum, parse_json, parse_optional_uuid,
    parse_uuid, query_error, to_json, write_error,
};

struct AuditRow {
    id: String,
    execution_id: Option<String>,
    automation_id: Option<String>,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
    actor: String,
    timestamp: String,
}

impl AuditRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            automation_id: row.try_get("automation_id")?,
            action: row.try_get("action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            details: row.try_get("details")?,
            actor: row.try_get("actor")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_entry(self) -> Result<AuditLogEntry, RepositoryError> {
        Ok(AuditLogEntry {
            id: parse_uuid(&self.id)?,
            execution_id: parse_optional_uuid(self.execution_id.as_deref())?,
            automation_id: parse_optional_uuid(self.automation_id.as_deref())?,
            action: parse_enum(&self.action)?,
            entity_type: parse_enum(&self.entity_type)?,
            entity_id: self.entity_id,
            details: parse_json(&self.details, "details")?,
            actor: self.actor,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

impl AuditRepository for SqliteStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO audit_log
               (id, execution_id, automation_id, action, entity_type, entity_id, details, actor, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.execution_id.map(|id| id.to_string()))
        .bind(entry.automation_id.map(|id| id.to_string()))
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(&entry.entity_id)
        .bind(to_json(&entry.details, "details")?)
        .bind(&entry.actor)
        .bind(format_datetime(&entry.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM audit_log
               WHERE (?1 IS NULL OR automation_id = ?1)
                 AND (?2 IS NULL OR execution_id = ?2)
                 AND (?3 IS NULL OR entity_type = ?3)
                 AND (?4 IS NULL OR action = ?4)
               ORDER BY timestamp DESC, id DESC
               LIMIT ?5"#,
        )
        .bind(filter.automation_id.map(|id| id.to_string()))
        .bind(filter.execution_id.map(|id| id.to_string()))
        .bind(filter.entity_type.map(|t| t.as_str()))
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.limit.map_or(-1, i64::from))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| AuditRow::from_row(row).map_err(query_error)?.into_entry())
            .collect()
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM audit_log WHERE timestamp < ?")
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(write_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use flowline_types::audit::{AuditAction, EntityType};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::sqlite::test_support::temp_store;

    fn entry(action: AuditAction, automation_id: Option<Uuid>, timestamp: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::now_v7(),
            execution_id: None,
            automation_id,
            action,
            entity_type: EntityType::Automation,
            entity_id: automation_id.map(|id| id.to_string()).unwrap_or_default(),
            details: json!({"version": 2}),
            actor: "cli".to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_append_and_filter_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let a = Uuid::now_v7();
        let now = Utc::now();

        store
            .append_audit(&entry(AuditAction::AutomationCreated, Some(a), now - Duration::seconds(2)))
            .await
            .unwrap();
        store
            .append_audit(&entry(AuditAction::AutomationUpdated, Some(a), now))
            .await
            .unwrap();
        store
            .append_audit(&entry(AuditAction::AutomationCreated, Some(Uuid::now_v7()), now))
            .await
            .unwrap();

        let for_a = store
            .list_audit(&AuditFilter {
                automation_id: Some(a),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].action, AuditAction::AutomationUpdated);
        assert_eq!(for_a[0].details["version"], 2);
        assert_eq!(for_a[0].actor, "cli");

        let created = store
            .list_audit(&AuditFilter {
                action: Some(AuditAction::AutomationCreated),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].timestamp, now);
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let now = Utc::now();
        store
            .append_audit(&entry(AuditAction::ScheduleFired, None, now - Duration::days(100)))
            .await
            .unwrap();
        store
            .append_audit(&entry(AuditAction::ScheduleFired, None, now))
            .await
            .unwrap();

        let purged = store.purge_audit_before(now - Duration::days(90)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.list_audit(&AuditFilter::default()).await.unwrap().len(), 1);
    }
}
