//! SQLite automation repository.
//!
//! The workflow graph and retry configuration are stored as JSON blobs; the
//! fields used for filtering (name, status) are plain columns.

use flowline_core::repository::automation::AutomationRepository;
use flowline_types::automation::{Automation, AutomationStatus, ErrorHandling};
use flowline_types::error::RepositoryError;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{
    SqliteStore, format_datetime, parse_datetime, parse_enum, parse_json, parse_uuid,
    query_error, to_i64, to_json, to_u32, to_u64, write_error,
};

struct AutomationRow {
    id: String,
    name: String,
    description: Option<String>,
    workflow: String,
    error_handling: String,
    retry_config: String,
    timeout_secs: Option<i64>,
    status: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl AutomationRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            workflow: row.try_get("workflow")?,
            error_handling: row.try_get("error_handling")?,
            retry_config: row.try_get("retry_config")?,
            timeout_secs: row.try_get("timeout_secs")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_automation(self) -> Result<Automation, RepositoryError> {
        let error_handling: ErrorHandling =
            serde_json::from_value(serde_json::Value::String(self.error_handling.clone()))
                .map_err(|_| {
                    RepositoryError::Query(format!("invalid error_handling: {}", self.error_handling))
                })?;

        Ok(Automation {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            workflow: parse_json(&self.workflow, "workflow")?,
            error_handling,
            retry_config: parse_json(&self.retry_config, "retry_config")?,
            timeout_secs: self
                .timeout_secs
                .map(|t| to_u64(t, "timeout_secs"))
                .transpose()?,
            status: parse_enum(&self.status)?,
            version: to_u32(self.version, "version")?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn rows_into_automations(rows: &[SqliteRow]) -> Result<Vec<Automation>, RepositoryError> {
    rows.iter()
        .map(|row| {
            AutomationRow::from_row(row)
                .map_err(query_error)?
                .into_automation()
        })
        .collect()
}

impl AutomationRepository for SqliteStore {
    async fn save_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO automations
               (id, name, description, workflow, error_handling, retry_config,
                timeout_secs, status, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 workflow = excluded.workflow,
                 error_handling = excluded.error_handling,
                 retry_config = excluded.retry_config,
                 timeout_secs = excluded.timeout_secs,
                 status = excluded.status,
                 version = excluded.version,
                 updated_at = excluded.updated_at"#,
        )
        .bind(automation.id.to_string())
        .bind(&automation.name)
        .bind(&automation.description)
        .bind(to_json(&automation.workflow, "workflow")?)
        .bind(automation.error_handling.to_string())
        .bind(to_json(&automation.retry_config, "retry_config")?)
        .bind(automation.timeout_secs.map(to_i64))
        .bind(automation.status.as_str())
        .bind(i64::from(automation.version))
        .bind(format_datetime(&automation.created_at))
        .bind(format_datetime(&automation.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        Ok(())
    }

    async fn get_automation(&self, id: &Uuid) -> Result<Option<Automation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM automations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let row = AutomationRow::from_row(&row).map_err(query_error)?;
                Ok(Some(row.into_automation()?))
            }
            None => Ok(None),
        }
    }

    async fn list_automations(
        &self,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM automations WHERE (?1 IS NULL OR status = ?1) ORDER BY name ASC",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows_into_automations(&rows)
    }

    async fn delete_automation(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        // Schedules go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM automations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(write_error)?;

        Ok(result.rows_affected() > 0)
    }
}
