//! Execution state machine.
//!
//! `ExecutionManager` is the only writer of an execution's status. Every
//! transition is a compare-and-set against the status it was validated
//! from, so two racing writers can never both finalize the same run.
//!
//! ```text
//! Pending ──► Running ──► Success | Failed | Cancelled | Timeout
//!    │
//!    └──────► Cancelled
//! ```
//!
//! Running executions register a `CancellationToken` here; `cancel` trips the
//! token and the worker finalizes the run at its next node boundary.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flowline_types::audit::{AuditAction, EntityType};
use flowline_types::automation::Variables;
use flowline_types::error::RepositoryError;
use flowline_types::execution::{
    Execution, ExecutionFilter, ExecutionStatus, LogEntry, StatusChange, TriggerType,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::audit::{AuditEvent, AuditLogger};
use crate::repository::Store;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("automation not found: {0}")]
    AutomationNotFound(Uuid),

    #[error("invalid state transition for execution {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("execution {id} is {status}, logs can only be appended while running")]
    NotRunning { id: Uuid, status: ExecutionStatus },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Transition payloads
// ---------------------------------------------------------------------------

/// Why a run ended badly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    /// Node that caused the failure, if any.
    pub node_id: Option<String>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
        }
    }

    pub fn at_node(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: Some(node_id.into()),
        }
    }
}

/// Final state snapshot a worker writes along with the terminal status.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub output: Variables,
    pub variables: Variables,
    pub retry_count: u32,
}

/// What `cancel` did.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The execution was moved to `Cancelled` right away.
    Cancelled(Execution),
    /// The running worker was signalled and will finalize the run.
    Signalled(Uuid),
}

// ---------------------------------------------------------------------------
// ExecutionManager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExecutionManager<S: Store> {
    store: S,
    audit: AuditLogger<S>,
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<S: Store> ExecutionManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            tokens: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &AuditLogger<S> {
        &self.audit
    }

    /// Create a new pending execution of the automation's current version.
    pub async fn create(
        &self,
        automation_id: Uuid,
        trigger_type: TriggerType,
        input: Variables,
        actor: Option<&str>,
    ) -> Result<Execution, ExecutionError> {
        let automation = self
            .store
            .get_automation(&automation_id)
            .await?
            .ok_or(ExecutionError::AutomationNotFound(automation_id))?;

        let execution = Execution::pending(
            automation.id,
            automation.version,
            trigger_type,
            input,
            actor.map(str::to_string),
        );
        self.store.create_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            automation_id = %automation.id,
            trigger = trigger_type.as_str(),
            "execution created"
        );
        self.audit
            .record(
                AuditEvent::new(AuditAction::ExecutionCreated, EntityType::Execution, execution.id)
                    .automation(automation.id)
                    .execution(execution.id)
                    .details(json!({
                        "trigger_type": trigger_type.as_str(),
                        "automation_version": automation.version,
                    }))
                    .actor(actor),
            )
            .await;

        Ok(execution)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Execution, ExecutionError> {
        self.store
            .get_execution(id)
            .await?
            .ok_or(ExecutionError::NotFound(*id))
    }

    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, ExecutionError> {
        Ok(self.store.list_executions(filter).await?)
    }

    /// Move an execution to `to`, validating legality against its stored state.
    pub async fn transition(
        &self,
        id: &Uuid,
        to: ExecutionStatus,
        failure: Option<Failure>,
    ) -> Result<Execution, ExecutionError> {
        self.apply_transition(id, to, failure, None).await
    }

    /// Terminal transition that also persists the run's final output,
    /// variables and retry count.
    pub async fn finish(
        &self,
        id: &Uuid,
        to: ExecutionStatus,
        failure: Option<Failure>,
        snapshot: RunSnapshot,
    ) -> Result<Execution, ExecutionError> {
        self.apply_transition(id, to, failure, Some(snapshot)).await
    }

    async fn apply_transition(
        &self,
        id: &Uuid,
        to: ExecutionStatus,
        failure: Option<Failure>,
        snapshot: Option<RunSnapshot>,
    ) -> Result<Execution, ExecutionError> {
        // States only move forward, so a lost CAS race re-validates against
        // a strictly later state and this loop ends within a few rounds.
        loop {
            let current = self.get(id).await?;
            if !current.status.can_transition_to(to) {
                return Err(ExecutionError::InvalidTransition {
                    id: *id,
                    from: current.status,
                    to,
                });
            }

            let change = build_change(&current, to, failure.clone(), snapshot.clone());
            if !self
                .store
                .compare_and_set_status(id, current.status, &change)
                .await?
            {
                tracing::debug!(execution_id = %id, to = to.as_str(), "status changed concurrently, retrying");
                continue;
            }

            let updated = apply_locally(current, &change);
            self.after_transition(&updated).await;
            return Ok(updated);
        }
    }

    async fn after_transition(&self, execution: &Execution) {
        match execution.status {
            ExecutionStatus::Running => {
                tracing::info!(execution_id = %execution.id, "execution started");
                self.audit
                    .record(
                        AuditEvent::new(
                            AuditAction::ExecutionStarted,
                            EntityType::Execution,
                            execution.id,
                        )
                        .automation(execution.automation_id)
                        .execution(execution.id),
                    )
                    .await;
            }
            status if status.is_terminal() => {
                self.tokens.remove(&execution.id);
                tracing::info!(
                    execution_id = %execution.id,
                    status = status.as_str(),
                    duration_ms = execution.duration_ms.unwrap_or(0),
                    error_step = execution.error_step.as_deref().unwrap_or(""),
                    "execution finished"
                );
                let recorded = self
                    .audit
                    .record_required(
                        AuditEvent::new(
                            AuditAction::ExecutionCompleted,
                            EntityType::Execution,
                            execution.id,
                        )
                        .automation(execution.automation_id)
                        .execution(execution.id)
                        .details(json!({
                            "status": status.as_str(),
                            "duration_ms": execution.duration_ms,
                            "error_message": execution.error_message,
                            "error_step": execution.error_step,
                        })),
                    )
                    .await;
                if let Err(e) = recorded {
                    tracing::error!(
                        execution_id = %execution.id,
                        status = status.as_str(),
                        error = %e,
                        "execution finished without a completion audit entry"
                    );
                }
            }
            _ => {}
        }
    }

    /// Cancel a pending or running execution.
    ///
    /// Pending runs are cancelled in place. A running execution with a live
    /// worker in this process is signalled instead; without one (the worker
    /// died or lives elsewhere) it is cancelled in place too.
    pub async fn cancel(&self, id: &Uuid, actor: Option<&str>) -> Result<CancelOutcome, ExecutionError> {
        let mut audited = false;
        loop {
            let current = self.get(id).await?;
            if current.status.is_terminal() {
                return Err(ExecutionError::InvalidTransition {
                    id: *id,
                    from: current.status,
                    to: ExecutionStatus::Cancelled,
                });
            }

            if !audited {
                audited = true;
                self.audit
                    .record(
                        AuditEvent::new(AuditAction::ExecutionCancelRequested, EntityType::Execution, id)
                            .automation(current.automation_id)
                            .execution(*id)
                            .details(json!({ "status": current.status.as_str() }))
                            .actor(actor),
                    )
                    .await;
            }

            if current.status == ExecutionStatus::Running {
                if let Some(token) = self.tokens.get(id) {
                    token.cancel();
                    tracing::info!(execution_id = %id, "cancellation signalled to worker");
                    return Ok(CancelOutcome::Signalled(*id));
                }
            }

            match self
                .transition(id, ExecutionStatus::Cancelled, Some(Failure::new("cancelled")))
                .await
            {
                Ok(execution) => return Ok(CancelOutcome::Cancelled(execution)),
                // Started between our read and the write; signal the worker instead.
                Err(ExecutionError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Append a log line. Only legal while the execution is running.
    pub async fn append_log(&self, id: &Uuid, entry: &LogEntry) -> Result<(), ExecutionError> {
        if self.store.append_log_if_running(id, entry).await? {
            return Ok(());
        }
        let current = self.get(id).await?;
        Err(ExecutionError::NotRunning {
            id: *id,
            status: current.status,
        })
    }

    /// Register the cancellation token of a run this process is about to
    /// drive. Removed automatically on the terminal transition.
    pub fn register_token(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(id, token.clone());
        token
    }

    pub fn release_token(&self, id: &Uuid) {
        self.tokens.remove(id);
    }

    /// Number of runs with a live worker in this process.
    pub fn active_runs(&self) -> usize {
        self.tokens.len()
    }
}

fn build_change(
    current: &Execution,
    to: ExecutionStatus,
    failure: Option<Failure>,
    snapshot: Option<RunSnapshot>,
) -> StatusChange {
    let now = Utc::now();
    let mut change = StatusChange::to(to);

    if to == ExecutionStatus::Running {
        change.started_at = Some(now);
    }
    if to.is_terminal() {
        let since = current.started_at.unwrap_or(current.created_at);
        change.completed_at = Some(now);
        change.duration_ms = Some((now - since).num_milliseconds().max(0) as u64);
    }
    if let Some(failure) = failure {
        change.error_message = Some(failure.message);
        change.error_step = failure.node_id;
    }
    if let Some(snapshot) = snapshot {
        change.output = Some(snapshot.output);
        change.variables = Some(snapshot.variables);
        change.retry_count = Some(snapshot.retry_count);
    }
    change
}

fn apply_locally(mut execution: Execution, change: &StatusChange) -> Execution {
    execution.status = change.status;
    if change.started_at.is_some() {
        execution.started_at = change.started_at;
    }
    if change.completed_at.is_some() {
        execution.completed_at = change.completed_at;
        execution.duration_ms = change.duration_ms;
    }
    if change.error_message.is_some() {
        execution.error_message = change.error_message.clone();
        execution.error_step = change.error_step.clone();
    }
    if let Some(output) = &change.output {
        execution.output = output.clone();
    }
    if let Some(variables) = &change.variables {
        execution.variables = variables.clone();
    }
    if let Some(retry_count) = change.retry_count {
        execution.retry_count = retry_count;
    }
    execution
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
