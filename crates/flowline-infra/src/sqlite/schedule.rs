//! SQLite schedule repository.

use chrono::{DateTime, Utc};
use flowline_core::repository::schedule::ScheduleRepository;
use flowline_types::error::RepositoryError;
use flowline_types::schedule::Schedule;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{
    SqliteStore, format_datetime, parse_datetime, parse_json, parse_optional_datetime,
    parse_uuid, query_error, to_i64, to_json, to_u64, write_error,
};

struct ScheduleRow {
    id: String,
    automation_id: String,
    name: String,
    cron_expression: String,
    timezone: String,
    is_active: bool,
    input: String,
    next_run_at: String,
    last_run_at: Option<String>,
    run_count: i64,
    failure_count: i64,
    created_at: String,
    updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            automation_id: row.try_get("automation_id")?,
            name: row.try_get("name")?,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            is_active: row.try_get("is_active")?,
            input: row.try_get("input")?,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            run_count: row.try_get("run_count")?,
            failure_count: row.try_get("failure_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_schedule(self) -> Result<Schedule, RepositoryError> {
        Ok(Schedule {
            id: parse_uuid(&self.id)?,
            automation_id: parse_uuid(&self.automation_id)?,
            name: self.name,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            is_active: self.is_active,
            input: parse_json(&self.input, "input")?,
            next_run_at: parse_datetime(&self.next_run_at)?,
            last_run_at: parse_optional_datetime(self.last_run_at.as_deref())?,
            run_count: to_u64(self.run_count, "run_count")?,
            failure_count: to_u64(self.failure_count, "failure_count")?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn rows_into_schedules(rows: &[SqliteRow]) -> Result<Vec<Schedule>, RepositoryError> {
    rows.iter()
        .map(|row| ScheduleRow::from_row(row).map_err(query_error)?.into_schedule())
        .collect()
}

impl ScheduleRepository for SqliteStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO schedules
               (id, automation_id, name, cron_expression, timezone, is_active, input,
                next_run_at, last_run_at, run_count, failure_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.automation_id.to_string())
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(to_json(&schedule.input, "input")?)
        .bind(format_datetime(&schedule.next_run_at))
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(to_i64(schedule.run_count))
        .bind(to_i64(schedule.failure_count))
        .bind(format_datetime(&schedule.created_at))
        .bind(format_datetime(&schedule.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        Ok(())
    }

    async fn update_schedule_settings(
        &self,
        schedule: &Schedule,
        reschedule_from: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE schedules SET
                 name = ?1,
                 cron_expression = ?2,
                 timezone = ?3,
                 input = ?4,
                 is_active = ?5,
                 updated_at = ?6,
                 next_run_at = CASE WHEN ?7 IS NULL THEN next_run_at ELSE ?8 END
               WHERE id = ?9 AND (?7 IS NULL OR next_run_at = ?7)"#,
        )
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(to_json(&schedule.input, "input")?)
        .bind(schedule.is_active)
        .bind(format_datetime(&schedule.updated_at))
        .bind(reschedule_from.as_ref().map(format_datetime))
        .bind(format_datetime(&schedule.next_run_at))
        .bind(schedule.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Nothing written: either the schedule is gone or a claim won.
        let exists = sqlx::query("SELECT 1 FROM schedules WHERE id = ?")
            .bind(schedule.id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_error)?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<Schedule>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(
                ScheduleRow::from_row(&row).map_err(query_error)?.into_schedule()?,
            )),
            None => Ok(None),
        }
    }

    async fn list_schedules(
        &self,
        automation_id: Option<&Uuid>,
    ) -> Result<Vec<Schedule>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM schedules
               WHERE (?1 IS NULL OR automation_id = ?1)
               ORDER BY next_run_at ASC, id ASC"#,
        )
        .bind(automation_id.map(|id| id.to_string()))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows_into_schedules(&rows)
    }

    async fn delete_schedule(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(write_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM schedules
               WHERE is_active = 1 AND next_run_at <= ?
               ORDER BY next_run_at ASC"#,
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows_into_schedules(&rows)
    }

    async fn claim_schedule(
        &self,
        id: &Uuid,
        expected_next_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE schedules SET
                 next_run_at = ?,
                 last_run_at = ?,
                 run_count = run_count + 1,
                 updated_at = ?
               WHERE id = ? AND next_run_at = ? AND is_active = 1"#,
        )
        .bind(format_datetime(&next_run))
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .bind(id.to_string())
        .bind(format_datetime(&expected_next_run))
        .execute(&self.pool.writer)
        .await
        .map_err(write_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_schedule_failure(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE schedules SET failure_count = failure_count + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(write_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use flowline_core::repository::automation::AutomationRepository;
    use flowline_types::automation::{
        Automation, AutomationStatus, ErrorHandling, RetryConfig, Variables, WorkflowDefinition,
    };

    use super::*;
    use crate::sqlite::test_support::temp_store;

    async fn seeded_automation(store: &SqliteStore) -> Uuid {
        let now = Utc::now();
        let automation = Automation {
            id: Uuid::now_v7(),
            name: format!("auto-{}", Uuid::now_v7()),
            description: None,
            workflow: WorkflowDefinition::default(),
            error_handling: ErrorHandling::Stop,
            retry_config: RetryConfig::default(),
            timeout_secs: None,
            status: AutomationStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        store.save_automation(&automation).await.unwrap();
        automation.id
    }

    fn schedule_for(automation_id: Uuid, next_run_at: DateTime<Utc>) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::now_v7(),
            automation_id,
            name: "every-minute".to_string(),
            cron_expression: "* * * * *".to_string(),
            timezone: "Europe/Berlin".to_string(),
            is_active: true,
            input: Variables::new(),
            next_run_at,
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_requires_existing_automation() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let result = store.insert_schedule(&schedule_for(Uuid::now_v7(), Utc::now())).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_due_listing_skips_future_and_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let now = Utc::now();

        let due = schedule_for(automation_id, now - Duration::minutes(1));
        let future = schedule_for(automation_id, now + Duration::minutes(5));
        let mut inactive = schedule_for(automation_id, now - Duration::minutes(2));
        inactive.is_active = false;
        for s in [&due, &future, &inactive] {
            store.insert_schedule(s).await.unwrap();
        }

        let listed = store.list_due_schedules(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
        assert_eq!(listed[0].timezone, "Europe/Berlin");

        assert_eq!(store.list_schedules(Some(&automation_id)).await.unwrap().len(), 3);
        assert!(store.list_schedules(Some(&Uuid::now_v7())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_succeeds_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let due = Utc::now() - Duration::minutes(1);
        let sched = schedule_for(automation_id, due);
        store.insert_schedule(&sched).await.unwrap();

        let now = Utc::now();
        let next = now + Duration::minutes(1);
        assert!(store.claim_schedule(&sched.id, due, next, now).await.unwrap());
        assert!(!store.claim_schedule(&sched.id, due, next, now).await.unwrap());

        let loaded = store.get_schedule(&sched.id).await.unwrap().unwrap();
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.next_run_at, next);
        assert_eq!(loaded.last_run_at, Some(now));
    }

    #[tokio::test]
    async fn test_settings_update_leaves_claim_fields_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let due = Utc::now() - Duration::minutes(1);
        let stale = schedule_for(automation_id, due);
        store.insert_schedule(&stale).await.unwrap();

        let now = Utc::now();
        let next = now + Duration::minutes(1);
        assert!(store.claim_schedule(&stale.id, due, next, now).await.unwrap());
        store.record_schedule_failure(&stale.id).await.unwrap();

        let mut renamed = stale.clone();
        renamed.name = "renamed".to_string();
        renamed.is_active = false;
        assert!(store.update_schedule_settings(&renamed, None).await.unwrap());
        assert!(!store.update_schedule_settings(&renamed, Some(due)).await.unwrap());

        let loaded = store.get_schedule(&stale.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert!(!loaded.is_active);
        assert_eq!(loaded.next_run_at, next);
        assert_eq!(loaded.last_run_at, Some(now));
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.failure_count, 1);
    }

    #[tokio::test]
    async fn test_settings_update_reschedules_when_unclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let due = Utc::now() - Duration::minutes(1);
        let mut sched = schedule_for(automation_id, due);
        store.insert_schedule(&sched).await.unwrap();

        sched.cron_expression = "0 * * * *".to_string();
        sched.next_run_at = Utc::now() + Duration::hours(1);
        assert!(store.update_schedule_settings(&sched, Some(due)).await.unwrap());

        let loaded = store.get_schedule(&sched.id).await.unwrap().unwrap();
        assert_eq!(loaded.cron_expression, "0 * * * *");
        assert_eq!(loaded.next_run_at, sched.next_run_at);

        assert!(matches!(
            store.insert_schedule(&sched).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            store
                .update_schedule_settings(&schedule_for(automation_id, due), None)
                .await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let due = Utc::now() - Duration::minutes(1);
        let sched = schedule_for(automation_id, due);
        store.insert_schedule(&sched).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = sched.id;
            handles.push(tokio::spawn(async move {
                let now = Utc::now();
                store
                    .claim_schedule(&id, due, now + Duration::minutes(1), now)
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_claim_rejects_disabled_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let due = Utc::now() - Duration::minutes(1);
        let mut sched = schedule_for(automation_id, due);
        sched.is_active = false;
        store.insert_schedule(&sched).await.unwrap();

        let now = Utc::now();
        assert!(!store.claim_schedule(&sched.id, due, now, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_count_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let automation_id = seeded_automation(&store).await;
        let sched = schedule_for(automation_id, Utc::now());
        store.insert_schedule(&sched).await.unwrap();

        store.record_schedule_failure(&sched.id).await.unwrap();
        store.record_schedule_failure(&sched.id).await.unwrap();
        assert_eq!(store.get_schedule(&sched.id).await.unwrap().unwrap().failure_count, 2);

        assert!(store.delete_schedule(&sched.id).await.unwrap());
        assert!(matches!(
            store.record_schedule_failure(&sched.id).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
