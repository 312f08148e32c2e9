//! Schedule management and the process-wide poll loop.
//!
//! Provides:
//! - Schedule CRUD with cron/timezone validation at write time
//! - `tick`: claim due schedules and start their executions
//! - `start`/`stop`: a single repeating `tokio-cron-scheduler` job that ticks
//!
//! Firing is safe against overlapping ticks (or several processes sharing a
//! database): each due occurrence is reserved with a compare-and-set on
//! `next_run_at`, and only the winner creates an execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_types::audit::{AuditAction, EntityType};
use flowline_types::automation::Variables;
use flowline_types::error::RepositoryError;
use flowline_types::execution::{ExecutionStatus, TriggerType};
use flowline_types::schedule::Schedule;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::audit::{AuditEvent, AuditLogger};
use super::cron::{compute_next_run, count_occurrences, ScheduleValidationError};
use super::executor::Executor;
use crate::repository::Store;

/// Actor recorded on executions the scheduler creates.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Lost compare-and-sets tolerated before an update gives up.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Validation(#[from] ScheduleValidationError),

    #[error("schedule not found: {0}")]
    NotFound(Uuid),

    #[error("automation not found: {0}")]
    AutomationNotFound(Uuid),

    /// Failed to create or drive the poll job.
    #[error("scheduler error: {0}")]
    Job(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Fields for a new schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub automation_id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub input: Variables,
    pub is_active: bool,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub input: Option<Variables>,
    pub is_active: Option<bool>,
}

/// Outcome of one due schedule in a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// This tick won the claim and started an execution.
    Started { schedule_id: Uuid, execution_id: Uuid },
    /// Another tick claimed the occurrence first.
    AlreadyClaimed { schedule_id: Uuid },
    /// Claimed, but no execution could be started.
    Failed { schedule_id: Uuid, reason: String },
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Scheduler<S: Store> {
    store: S,
    executor: Executor<S>,
    audit: AuditLogger<S>,
    inner: Arc<RwLock<Option<JobScheduler>>>,
}

impl<S: Store> Scheduler<S> {
    pub fn new(executor: Executor<S>) -> Self {
        let store = executor.manager().store().clone();
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            executor,
            inner: Arc::new(RwLock::new(None)),
        }
    }

    // -- CRUD ---------------------------------------------------------------

    pub async fn create_schedule(
        &self,
        new: NewSchedule,
        actor: Option<&str>,
    ) -> Result<Schedule, ScheduleError> {
        let now = Utc::now();
        let next_run_at = compute_next_run(&new.cron_expression, &new.timezone, now)?;
        if self.store.get_automation(&new.automation_id).await?.is_none() {
            return Err(ScheduleError::AutomationNotFound(new.automation_id));
        }

        let schedule = Schedule {
            id: Uuid::now_v7(),
            automation_id: new.automation_id,
            name: new.name,
            cron_expression: new.cron_expression,
            timezone: new.timezone,
            is_active: new.is_active,
            input: new.input,
            next_run_at,
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_schedule(&schedule).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            automation_id = %schedule.automation_id,
            cron = schedule.cron_expression.as_str(),
            timezone = schedule.timezone.as_str(),
            next_run_at = %schedule.next_run_at,
            "schedule created"
        );
        self.audit
            .record(
                AuditEvent::new(AuditAction::ScheduleCreated, EntityType::Schedule, schedule.id)
                    .automation(schedule.automation_id)
                    .details(json!({
                        "name": schedule.name,
                        "cron_expression": schedule.cron_expression,
                        "timezone": schedule.timezone,
                    }))
                    .actor(actor),
            )
            .await;

        Ok(schedule)
    }

    /// Apply a partial update.
    ///
    /// Only the editable fields are written, so claim bookkeeping made by a
    /// concurrent tick survives. When the timing changes, `next_run_at` is
    /// rewritten with a compare-and-set against the value read; if a tick
    /// claims the schedule in between, the update is re-read and retried.
    pub async fn update_schedule(
        &self,
        id: &Uuid,
        update: ScheduleUpdate,
        actor: Option<&str>,
    ) -> Result<Schedule, ScheduleError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.get_schedule(id).await?;
            let (edited, rescheduled) = apply_update(current.clone(), &update, Utc::now())?;
            let reschedule_from = rescheduled.then_some(current.next_run_at);

            match self.store.update_schedule_settings(&edited, reschedule_from).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(schedule_id = %id, attempt, "schedule claimed during update, retrying");
                    continue;
                }
                Err(RepositoryError::NotFound) => return Err(ScheduleError::NotFound(*id)),
                Err(e) => return Err(e.into()),
            }

            let schedule = self.get_schedule(id).await?;
            tracing::info!(
                schedule_id = %schedule.id,
                is_active = schedule.is_active,
                next_run_at = %schedule.next_run_at,
                "schedule updated"
            );
            self.audit
                .record(
                    AuditEvent::new(AuditAction::ScheduleUpdated, EntityType::Schedule, schedule.id)
                        .automation(schedule.automation_id)
                        .details(json!({
                            "cron_expression": schedule.cron_expression,
                            "timezone": schedule.timezone,
                            "is_active": schedule.is_active,
                        }))
                        .actor(actor),
                )
                .await;
            return Ok(schedule);
        }

        Err(ScheduleError::Repository(RepositoryError::Conflict(format!(
            "schedule {id} kept firing during update"
        ))))
    }

    pub async fn set_active(
        &self,
        id: &Uuid,
        active: bool,
        actor: Option<&str>,
    ) -> Result<Schedule, ScheduleError> {
        self.update_schedule(
            id,
            ScheduleUpdate {
                is_active: Some(active),
                ..Default::default()
            },
            actor,
        )
        .await
    }

    pub async fn delete_schedule(&self, id: &Uuid, actor: Option<&str>) -> Result<(), ScheduleError> {
        let schedule = self.get_schedule(id).await?;
        if !self.store.delete_schedule(id).await? {
            return Err(ScheduleError::NotFound(*id));
        }

        tracing::info!(schedule_id = %id, "schedule deleted");
        self.audit
            .record(
                AuditEvent::new(AuditAction::ScheduleDeleted, EntityType::Schedule, id)
                    .automation(schedule.automation_id)
                    .details(json!({ "name": schedule.name }))
                    .actor(actor),
            )
            .await;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &Uuid) -> Result<Schedule, ScheduleError> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or(ScheduleError::NotFound(*id))
    }

    pub async fn list_schedules(&self, automation_id: Option<&Uuid>) -> Result<Vec<Schedule>, ScheduleError> {
        Ok(self.store.list_schedules(automation_id).await?)
    }

    // -- Polling ------------------------------------------------------------

    /// Active schedules with `next_run_at <= now`.
    pub async fn poll_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, ScheduleError> {
        Ok(self.store.list_due_schedules(now).await?)
    }

    /// Fire every schedule due at `now`.
    ///
    /// Each occurrence is claimed before anything else happens; a lost claim
    /// means another tick already fired it. Missed occurrences collapse into
    /// this single fire.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<FireOutcome>, ScheduleError> {
        let due = self.poll_due(now).await?;
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "due schedules");
        }

        let mut outcomes = Vec::with_capacity(due.len());
        for schedule in due {
            outcomes.push(self.fire(schedule, now).await?);
        }
        Ok(outcomes)
    }

    async fn fire(&self, schedule: Schedule, now: DateTime<Utc>) -> Result<FireOutcome, ScheduleError> {
        let schedule_id = schedule.id;

        let next_run = match compute_next_run(&schedule.cron_expression, &schedule.timezone, now) {
            Ok(next) => next,
            Err(e) => {
                // Stored expressions are validated on write; this only
                // happens if the timezone database changed underneath us.
                tracing::error!(schedule_id = %schedule_id, error = %e, "cannot compute next run");
                self.store.record_schedule_failure(&schedule_id).await?;
                return Ok(FireOutcome::Failed {
                    schedule_id,
                    reason: e.to_string(),
                });
            }
        };

        if !self
            .store
            .claim_schedule(&schedule_id, schedule.next_run_at, next_run, now)
            .await?
        {
            tracing::debug!(schedule_id = %schedule_id, "occurrence already claimed");
            return Ok(FireOutcome::AlreadyClaimed { schedule_id });
        }

        let skipped = count_occurrences(
            &schedule.cron_expression,
            &schedule.timezone,
            schedule.next_run_at,
            now,
        )
        .unwrap_or(0);
        if skipped > 0 {
            tracing::warn!(
                schedule_id = %schedule_id,
                skipped,
                "missed occurrences collapsed into a single run"
            );
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::ScheduleFired, EntityType::Schedule, schedule_id)
                    .automation(schedule.automation_id)
                    .details(json!({
                        "scheduled_for": schedule.next_run_at.to_rfc3339(),
                        "next_run_at": next_run.to_rfc3339(),
                        "skipped": skipped,
                    }))
                    .actor(Some(SCHEDULER_ACTOR)),
            )
            .await;

        let handle = match self
            .executor
            .start(
                schedule.automation_id,
                TriggerType::Scheduled,
                schedule.input.clone(),
                Some(SCHEDULER_ACTOR),
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(schedule_id = %schedule_id, error = %e, "scheduled run could not start");
                self.store.record_schedule_failure(&schedule_id).await?;
                return Ok(FireOutcome::Failed {
                    schedule_id,
                    reason: e.to_string(),
                });
            }
        };

        let execution_id = handle.execution_id;
        tracing::info!(
            schedule_id = %schedule_id,
            execution_id = %execution_id,
            next_run_at = %next_run,
            "schedule fired"
        );

        let store = self.store.clone();
        tokio::spawn(async move {
            let succeeded = matches!(
                handle.wait().await,
                Ok(ref e) if e.status == ExecutionStatus::Success
            );
            if !succeeded {
                if let Err(e) = store.record_schedule_failure(&schedule_id).await {
                    tracing::warn!(schedule_id = %schedule_id, error = %e, "failed to record schedule failure");
                }
            }
        });

        Ok(FireOutcome::Started {
            schedule_id,
            execution_id,
        })
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Start the poll loop. Ticks once immediately to catch up on anything
    /// that came due while the process was down.
    pub async fn start(&self, poll_interval: Duration) -> Result<(), ScheduleError> {
        let mut inner = self.inner.write().await;
        if inner.is_some() {
            return Err(ScheduleError::Job("scheduler already started".to_string()));
        }

        if let Err(e) = self.tick(Utc::now()).await {
            tracing::warn!(error = %e, "initial schedule tick failed");
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| ScheduleError::Job(e.to_string()))?;

        let this = self.clone();
        let job = Job::new_repeated_async(poll_interval, move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                if let Err(e) = this.tick(Utc::now()).await {
                    tracing::warn!(error = %e, "schedule tick failed");
                }
            })
        })
        .map_err(|e| ScheduleError::Job(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| ScheduleError::Job(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| ScheduleError::Job(e.to_string()))?;

        *inner = Some(scheduler);
        tracing::info!(poll_interval_secs = poll_interval.as_secs(), "schedule poller started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ScheduleError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| ScheduleError::Job(e.to_string()))?;
            tracing::info!("schedule poller stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

/// Apply `update` to `schedule`. Returns the edited schedule and whether
/// its next run was recomputed.
fn apply_update(
    mut schedule: Schedule,
    update: &ScheduleUpdate,
    now: DateTime<Utc>,
) -> Result<(Schedule, bool), ScheduleError> {
    let timing_changed = update.cron_expression.is_some()
        || update.timezone.is_some()
        || (update.is_active == Some(true) && !schedule.is_active);

    if let Some(name) = &update.name {
        schedule.name = name.clone();
    }
    if let Some(expr) = &update.cron_expression {
        schedule.cron_expression = expr.clone();
    }
    if let Some(tz) = &update.timezone {
        schedule.timezone = tz.clone();
    }
    if let Some(input) = &update.input {
        schedule.input = input.clone();
    }
    if let Some(active) = update.is_active {
        schedule.is_active = active;
    }

    // Recompute from now so re-enabling never replays the paused gap.
    if timing_changed {
        schedule.next_run_at = compute_next_run(&schedule.cron_expression, &schedule.timezone, now)?;
    }
    schedule.updated_at = now;
    Ok((schedule, timing_changed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use flowline_types::automation::{
        Automation, AutomationStatus, Node, NodeType, WorkflowDefinition,
    };
    use flowline_types::config::ExecutorConfig;
    use flowline_types::execution::ExecutionFilter;

    use crate::repository::automation::AutomationRepository;
    use crate::repository::execution::ExecutionRepository;
    use crate::repository::memory::InMemoryStore;
    use crate::repository::schedule::ScheduleRepository;
    use crate::workflow::action::ActionRegistry;
    use crate::workflow::execution::ExecutionManager;

    async fn setup(status: AutomationStatus) -> (Scheduler<InMemoryStore>, InMemoryStore, Uuid) {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut config = serde_json::Map::new();
        config.insert("message".to_string(), json!("tick"));
        let automation = Automation {
            id: Uuid::now_v7(),
            name: "report".to_string(),
            description: None,
            workflow: WorkflowDefinition {
                nodes: vec![Node {
                    id: "log".to_string(),
                    node_type: NodeType::Log,
                    name: "log".to_string(),
                    config,
                    error_handling: None,
                    max_retries: None,
                }],
                edges: vec![],
                variables: Variables::new(),
            },
            error_handling: Default::default(),
            retry_config: Default::default(),
            timeout_secs: None,
            status,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        store.save_automation(&automation).await.unwrap();

        let executor = Executor::new(
            ExecutionManager::new(store.clone()),
            ActionRegistry::with_builtins(),
            ExecutorConfig::default(),
        );
        (Scheduler::new(executor), store, automation.id)
    }

    fn new_schedule(automation_id: Uuid, cron: &str) -> NewSchedule {
        NewSchedule {
            automation_id,
            name: "nightly".to_string(),
            cron_expression: cron.to_string(),
            timezone: "UTC".to_string(),
            input: Variables::new(),
            is_active: true,
        }
    }

    /// Make a schedule due by moving its next run into the past.
    async fn make_due(store: &InMemoryStore, id: &Uuid, ago: ChronoDuration) -> DateTime<Utc> {
        let mut s = store.get_schedule(id).await.unwrap().unwrap();
        let previous = s.next_run_at;
        s.next_run_at = Utc::now() - ago;
        assert!(store.update_schedule_settings(&s, Some(previous)).await.unwrap());
        s.next_run_at
    }

    // -------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_computes_next_run() {
        let (scheduler, _, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "0 0 * * *"), Some("ops"))
            .await
            .unwrap();
        assert!(s.next_run_at > Utc::now());
        assert_eq!(s.run_count, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_cron_and_timezone() {
        let (scheduler, _, automation_id) = setup(AutomationStatus::Active).await;
        let err = scheduler
            .create_schedule(new_schedule(automation_id, "61 * * * *"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));

        let mut bad_tz = new_schedule(automation_id, "0 0 * * *");
        bad_tz.timezone = "Nowhere/Special".to_string();
        let err = scheduler.create_schedule(bad_tz, None).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));

        assert!(scheduler.list_schedules(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_automation() {
        let (scheduler, _, _) = setup(AutomationStatus::Active).await;
        let err = scheduler
            .create_schedule(new_schedule(Uuid::now_v7(), "0 0 * * *"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::AutomationNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_validates_and_recomputes() {
        let (scheduler, _, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "0 0 * * *"), None)
            .await
            .unwrap();

        let err = scheduler
            .update_schedule(
                &s.id,
                ScheduleUpdate {
                    cron_expression: Some("whenever".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));

        let updated = scheduler
            .update_schedule(
                &s.id,
                ScheduleUpdate {
                    cron_expression: Some("every 5 minutes".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert!(updated.next_run_at <= Utc::now() + ChronoDuration::minutes(5));
    }

    #[tokio::test]
    async fn test_update_after_fire_keeps_run_bookkeeping() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "every 1 minute"), None)
            .await
            .unwrap();
        make_due(&store, &s.id, ChronoDuration::seconds(5)).await;
        assert_eq!(scheduler.tick(Utc::now()).await.unwrap().len(), 1);
        let fired = store.get_schedule(&s.id).await.unwrap().unwrap();

        let renamed = scheduler
            .update_schedule(
                &s.id,
                ScheduleUpdate {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
                Some("ops"),
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.run_count, 1);
        assert_eq!(renamed.last_run_at, fired.last_run_at);
        assert_eq!(renamed.next_run_at, fired.next_run_at);
        assert!(scheduler.tick(Utc::now()).await.unwrap().is_empty());

        let err = scheduler
            .update_schedule(&Uuid::now_v7(), ScheduleUpdate::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disable_and_delete() {
        let (scheduler, _, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "hourly"), None)
            .await
            .unwrap();

        let disabled = scheduler.set_active(&s.id, false, None).await.unwrap();
        assert!(!disabled.is_active);

        scheduler.delete_schedule(&s.id, None).await.unwrap();
        let err = scheduler.get_schedule(&s.id).await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
        let err = scheduler.delete_schedule(&s.id, None).await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
    }

    // -------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_tick_fires_due_schedule_once() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "every 1 minute"), None)
            .await
            .unwrap();
        let was_due = make_due(&store, &s.id, ChronoDuration::seconds(5)).await;

        let outcomes = scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let FireOutcome::Started { execution_id, .. } = outcomes[0] else {
            panic!("expected a started run, got {:?}", outcomes[0]);
        };

        let fired = store.get_schedule(&s.id).await.unwrap().unwrap();
        assert_eq!(fired.run_count, 1);
        assert!(fired.last_run_at.is_some());
        assert!(fired.next_run_at > was_due);

        let exec = store.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(exec.trigger_type, TriggerType::Scheduled);
        assert_eq!(exec.triggered_by.as_deref(), Some(SCHEDULER_ACTOR));

        // Not due any more.
        assert!(scheduler.tick(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_ticks_create_one_execution() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "every 1 minute"), None)
            .await
            .unwrap();
        make_due(&store, &s.id, ChronoDuration::seconds(1)).await;

        let now = Utc::now();
        let (a, b) = tokio::join!(scheduler.tick(now), scheduler.tick(now));
        let started = a
            .unwrap()
            .into_iter()
            .chain(b.unwrap())
            .filter(|o| matches!(o, FireOutcome::Started { .. }))
            .count();
        assert_eq!(started, 1);

        let executions = store.list_executions(&ExecutionFilter::default()).await.unwrap();
        assert_eq!(executions.len(), 1);
    }

    #[tokio::test]
    async fn test_missed_occurrences_collapse() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Active).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "every 1 minute"), None)
            .await
            .unwrap();
        make_due(&store, &s.id, ChronoDuration::minutes(30)).await;

        let outcomes = scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let fired = store.get_schedule(&s.id).await.unwrap().unwrap();
        assert_eq!(fired.run_count, 1);
        assert!(fired.next_run_at > Utc::now() - ChronoDuration::seconds(1));
    }

    #[tokio::test]
    async fn test_inactive_automation_counts_failure() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Paused).await;
        let s = scheduler
            .create_schedule(new_schedule(automation_id, "every 1 minute"), None)
            .await
            .unwrap();
        make_due(&store, &s.id, ChronoDuration::seconds(5)).await;

        let outcomes = scheduler.tick(Utc::now()).await.unwrap();
        assert!(matches!(outcomes[0], FireOutcome::Failed { .. }));

        let fired = store.get_schedule(&s.id).await.unwrap().unwrap();
        assert_eq!(fired.failure_count, 1);
        assert!(store
            .list_executions(&ExecutionFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_disabled_schedule_not_polled() {
        let (scheduler, store, automation_id) = setup(AutomationStatus::Active).await;
        let mut new = new_schedule(automation_id, "every 1 minute");
        new.is_active = false;
        let s = scheduler.create_schedule(new, None).await.unwrap();
        make_due(&store, &s.id, ChronoDuration::seconds(5)).await;

        assert!(scheduler.poll_due(Utc::now()).await.unwrap().is_empty());
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_stop() {
        let (scheduler, _, _) = setup(AutomationStatus::Active).await;
        scheduler.start(Duration::from_secs(30)).await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(scheduler.start(Duration::from_secs(30)).await.is_err());
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
    }
}
