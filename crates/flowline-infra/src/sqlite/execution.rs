//! SQLite execution repository.
//!
//! Executions live in `executions`; their log lines in `execution_logs`,
//! ordered by an autoincrement sequence. Status changes and log appends are
//! single conditional statements on the writer connection.

use chrono::{DateTime, Utc};
use flowline_core::repository::execution::ExecutionRepository;
use flowline_types::error::RepositoryError;
use flowline_types::execution::{
    Execution, ExecutionFilter, ExecutionStatus, LogEntry, StatusChange,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{
    SqliteStore, format_datetime, parse_datetime, parse_enum, parse_json,
    parse_optional_datetime, parse_uuid, query_error, to_i64, to_json, to_u32, to_u64,
    write_error,
};

const TERMINAL_STATUSES: &str = "('success', 'failed', 'cancelled', 'timeout')";

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    automation_id: String,
    automation_version: i64,
    trigger_type: String,
    status: String,
    input: String,
    output: String,
    variables: String,
    error_message: Option<String>,
    error_step: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    retry_count: i64,
    triggered_by: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            automation_id: row.try_get("automation_id")?,
            automation_version: row.try_get("automation_version")?,
            trigger_type: row.try_get("trigger_type")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            variables: row.try_get("variables")?,
            error_message: row.try_get("error_message")?,
            error_step: row.try_get("error_step")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            retry_count: row.try_get("retry_count")?,
            triggered_by: row.try_get("triggered_by")?,
        })
    }

    fn into_execution(self, logs: Vec<LogEntry>) -> Result<Execution, RepositoryError> {
        Ok(Execution {
            id: parse_uuid(&self.id)?,
            automation_id: parse_uuid(&self.automation_id)?,
            automation_version: to_u32(self.automation_version, "automation_version")?,
            trigger_type: parse_enum(&self.trigger_type)?,
            status: parse_enum(&self.status)?,
            input: parse_json(&self.input, "input")?,
            output: parse_json(&self.output, "output")?,
            variables: parse_json(&self.variables, "variables")?,
            logs,
            error_message: self.error_message,
            error_step: self.error_step,
            created_at: parse_datetime(&self.created_at)?,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
            duration_ms: self
                .duration_ms
                .map(|d| to_u64(d, "duration_ms"))
                .transpose()?,
            retry_count: to_u32(self.retry_count, "retry_count")?,
            triggered_by: self.triggered_by,
        })
    }
}

struct LogRow {
    timestamp: String,
    level: String,
    message: String,
    node_id: Option<String>,
}

impl LogRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            timestamp: row.try_get("timestamp")?,
            level: row.try_get("level")?,
            message: row.try_get("message")?,
            node_id: row.try_get("node_id")?,
        })
    }

    fn into_entry(self) -> Result<LogEntry, RepositoryError> {
        Ok(LogEntry {
            timestamp: parse_datetime(&self.timestamp)?,
            level: parse_enum(&self.level)?,
            message: self.message,
            node_id: self.node_id,
        })
    }
}

impl SqliteStore {
    async fn execution_logs(&self, id: &str) -> Result<Vec<LogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT timestamp, level, message, node_id FROM execution_logs WHERE execution_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| LogRow::from_row(row).map_err(query_error)?.into_entry())
            .collect()
    }

    async fn execution_exists(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, automation_id, automation_version, trigger_type, status, input, output,
                variables, error_message, error_step, created_at, started_at, completed_at,
                duration_ms, retry_count, triggered_by)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.automation_id.to_string())
        .bind(i64::from(execution.automation_version))
        .bind(execution.trigger_type.as_str())
        .bind(execution.status.as_str())
        .bind(to_json(&execution.input, "input")?)
        .bind(to_json(&execution.output, "output")?)
        .bind(to_json(&execution.variables, "variables")?)
        .bind(&execution.error_message)
        .bind(&execution.error_step)
        .bind(format_datetime(&execution.created_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(to_i64))
        .bind(i64::from(execution.retry_count))
        .bind(&execution.triggered_by)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;

        for entry in &execution.logs {
            sqlx::query(
                "INSERT INTO execution_logs (execution_id, timestamp, level, message, node_id) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(execution.id.to_string())
            .bind(format_datetime(&entry.timestamp))
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(&entry.node_id)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let id = id.to_string();
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let row = ExecutionRow::from_row(&row).map_err(query_error)?;
        let logs = self.execution_logs(&id).await?;
        Ok(Some(row.into_execution(logs)?))
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        // LIMIT -1 means no limit in SQLite.
        let rows = sqlx::query(
            r#"SELECT * FROM executions
               WHERE (?1 IS NULL OR automation_id = ?1)
                 AND (?2 IS NULL OR status = ?2)
               ORDER BY created_at DESC, id DESC
               LIMIT ?3"#,
        )
        .bind(filter.automation_id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map_or(-1, i64::from))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                ExecutionRow::from_row(row)
                    .map_err(query_error)?
                    .into_execution(Vec::new())
            })
            .collect()
    }

    async fn compare_and_set_status(
        &self,
        id: &Uuid,
        expected: ExecutionStatus,
        change: &StatusChange,
    ) -> Result<bool, RepositoryError> {
        let output = change
            .output
            .as_ref()
            .map(|o| to_json(o, "output"))
            .transpose()?;
        let variables = change
            .variables
            .as_ref()
            .map(|v| to_json(v, "variables"))
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE executions SET
                 status = ?,
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at),
                 duration_ms = COALESCE(?, duration_ms),
                 error_message = COALESCE(?, error_message),
                 error_step = COALESCE(?, error_step),
                 output = COALESCE(?, output),
                 variables = COALESCE(?, variables),
                 retry_count = COALESCE(?, retry_count)
               WHERE id = ? AND status = ?"#,
        )
        .bind(change.status.as_str())
        .bind(change.started_at.as_ref().map(format_datetime))
        .bind(change.completed_at.as_ref().map(format_datetime))
        .bind(change.duration_ms.map(to_i64))
        .bind(&change.error_message)
        .bind(&change.error_step)
        .bind(output)
        .bind(variables)
        .bind(change.retry_count.map(i64::from))
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.execution_exists(id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn append_log_if_running(
        &self,
        id: &Uuid,
        entry: &LogEntry,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO execution_logs (execution_id, timestamp, level, message, node_id)
               SELECT ?1, ?2, ?3, ?4, ?5
               WHERE EXISTS (SELECT 1 FROM executions WHERE id = ?1 AND status = 'running')"#,
        )
        .bind(id.to_string())
        .bind(format_datetime(&entry.timestamp))
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.node_id)
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.execution_exists(id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn purge_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        // Log rows go with their execution through ON DELETE CASCADE.
        let result = sqlx::query(&format!(
            "DELETE FROM executions WHERE status IN {TERMINAL_STATUSES} AND completed_at IS NOT NULL AND completed_at < ?"
        ))
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use flowline_types::automation::Variables;
    use flowline_types::execution::{LogLevel, TriggerType};
    use serde_json::json;

    use super::*;
    use crate::sqlite::test_support::temp_store;

    fn pending(automation_id: Uuid) -> Execution {
        let mut input = Variables::new();
        input.insert("order_id".to_string(), json!(7));
        Execution::pending(
            automation_id,
            3,
            TriggerType::Scheduled,
            input,
            Some("scheduler".to_string()),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let exec = pending(Uuid::now_v7());
        store.create_execution(&exec).await.unwrap();

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert_eq!(loaded.automation_version, 3);
        assert_eq!(loaded.trigger_type, TriggerType::Scheduled);
        assert_eq!(loaded.input["order_id"], 7);
        assert_eq!(loaded.triggered_by.as_deref(), Some("scheduler"));
        assert!(loaded.logs.is_empty());

        let dup = store.create_execution(&exec).await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_compare_and_set_applies_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let exec = pending(Uuid::now_v7());
        store.create_execution(&exec).await.unwrap();

        let started = Utc::now();
        let mut change = StatusChange::to(ExecutionStatus::Running);
        change.started_at = Some(started);
        assert!(store
            .compare_and_set_status(&exec.id, ExecutionStatus::Pending, &change)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set_status(&exec.id, ExecutionStatus::Pending, &change)
            .await
            .unwrap());

        let mut done = StatusChange::to(ExecutionStatus::Failed);
        done.error_message = Some("boom".to_string());
        done.error_step = Some("b".to_string());
        done.duration_ms = Some(12);
        done.retry_count = Some(2);
        let mut output = Variables::new();
        output.insert("a".to_string(), json!({"ok": true}));
        done.output = Some(output);
        assert!(store
            .compare_and_set_status(&exec.id, ExecutionStatus::Running, &done)
            .await
            .unwrap());

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.started_at, Some(started));
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));
        assert_eq!(loaded.error_step.as_deref(), Some("b"));
        assert_eq!(loaded.duration_ms, Some(12));
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.output["a"]["ok"], true);
        assert_eq!(loaded.input["order_id"], 7);
    }

    #[tokio::test]
    async fn test_compare_and_set_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let result = store
            .compare_and_set_status(
                &Uuid::now_v7(),
                ExecutionStatus::Pending,
                &StatusChange::to(ExecutionStatus::Running),
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_logs_append_only_while_running_and_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let exec = pending(Uuid::now_v7());
        store.create_execution(&exec).await.unwrap();

        let early = LogEntry::new(LogLevel::Info, "too early", None);
        assert!(!store.append_log_if_running(&exec.id, &early).await.unwrap());

        store
            .compare_and_set_status(
                &exec.id,
                ExecutionStatus::Pending,
                &StatusChange::to(ExecutionStatus::Running),
            )
            .await
            .unwrap();
        for i in 0..3 {
            let entry = LogEntry::new(LogLevel::Info, format!("line {i}"), Some("a"));
            assert!(store.append_log_if_running(&exec.id, &entry).await.unwrap());
        }
        store
            .compare_and_set_status(
                &exec.id,
                ExecutionStatus::Running,
                &StatusChange::to(ExecutionStatus::Success),
            )
            .await
            .unwrap();
        let late = LogEntry::new(LogLevel::Warn, "too late", None);
        assert!(!store.append_log_if_running(&exec.id, &late).await.unwrap());

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        let messages: Vec<_> = loaded.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 0", "line 1", "line 2"]);
        assert_eq!(loaded.logs[0].node_id.as_deref(), Some("a"));

        let missing = store.append_log_if_running(&Uuid::now_v7(), &late).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_filters_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = Uuid::now_v7();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut exec = pending(automation_id);
            exec.created_at = Utc::now() + Duration::seconds(i);
            ids.push(exec.id);
            store.create_execution(&exec).await.unwrap();
        }
        store.create_execution(&pending(Uuid::now_v7())).await.unwrap();

        let filter = ExecutionFilter {
            automation_id: Some(automation_id),
            limit: Some(2),
            ..Default::default()
        };
        let listed = store.list_executions(&filter).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);

        let running = ExecutionFilter {
            status: Some(ExecutionStatus::Running),
            ..Default::default()
        };
        assert!(store.list_executions(&running).await.unwrap().is_empty());
        assert_eq!(store.list_executions(&ExecutionFilter::default()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_purge_removes_old_terminal_executions_with_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let now = Utc::now();

        let mut old = pending(Uuid::now_v7());
        old.status = ExecutionStatus::Success;
        old.completed_at = Some(now - Duration::days(40));
        old.logs.push(LogEntry::new(LogLevel::Info, "done", None));
        store.create_execution(&old).await.unwrap();

        let mut running = pending(Uuid::now_v7());
        running.status = ExecutionStatus::Running;
        store.create_execution(&running).await.unwrap();

        let mut recent = pending(Uuid::now_v7());
        recent.status = ExecutionStatus::Failed;
        recent.completed_at = Some(now);
        store.create_execution(&recent).await.unwrap();

        let purged = store
            .purge_executions_before(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_execution(&old.id).await.unwrap().is_none());
        assert!(store.get_execution(&running.id).await.unwrap().is_some());

        let (orphans,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM execution_logs")
            .fetch_one(&store.pool().reader)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
