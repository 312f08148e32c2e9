//! Schedule repository trait definition.

use chrono::{DateTime, Utc};
use flowline_types::error::RepositoryError;
use flowline_types::schedule::Schedule;
use uuid::Uuid;

pub trait ScheduleRepository: Send + Sync {
    /// Insert a new schedule. `Conflict` if the ID exists or the automation
    /// does not.
    fn insert_schedule(
        &self,
        schedule: &Schedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Write the user-editable fields of `schedule`: name, expression,
    /// timezone, input, `is_active` and `updated_at`. Claim bookkeeping
    /// (`last_run_at`, `run_count`, `failure_count`) is never written.
    ///
    /// With `reschedule_from = Some(expected)`, `next_run_at` is also taken
    /// from `schedule`, and the whole write only applies while the stored
    /// `next_run_at` still equals `expected`. Returns `false` when a claim
    /// moved it first. `NotFound` if the schedule does not exist.
    fn update_schedule_settings(
        &self,
        schedule: &Schedule,
        reschedule_from: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_schedule(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Schedule>, RepositoryError>> + Send;

    fn list_schedules(
        &self,
        automation_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<Schedule>, RepositoryError>> + Send;

    fn delete_schedule(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Active schedules with `next_run_at <= now`, earliest first.
    fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Schedule>, RepositoryError>> + Send;

    /// Claim one due occurrence.
    ///
    /// Succeeds only if the stored `next_run_at` still equals
    /// `expected_next_run` and the schedule is active. In the same write it
    /// sets `next_run_at = next_run`, `last_run_at = now` and bumps
    /// `run_count`. Returns `false` if another poller already claimed it.
    fn claim_schedule(
        &self,
        id: &Uuid,
        expected_next_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Increment `failure_count`.
    fn record_schedule_failure(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
