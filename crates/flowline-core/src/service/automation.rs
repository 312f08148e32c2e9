//! Automation management service.
//!
//! Orchestrates automation creation, definition updates, lifecycle changes,
//! deletion and triggering. Definitions are validated (graph compiled) on
//! every write, so a stored automation always has a runnable graph.

use chrono::Utc;
use flowline_types::audit::{AuditAction, EntityType};
use flowline_types::automation::{Automation, AutomationStatus, Variables};
use flowline_types::error::RepositoryError;
use flowline_types::execution::{Execution, TriggerType};
use serde_json::json;
use uuid::Uuid;

use crate::repository::Store;
use crate::workflow::audit::{AuditEvent, AuditLogger};
use crate::workflow::definition::{validate_definition, AutomationDefinition, DefinitionError};
use crate::workflow::executor::{Executor, ExecutorError, RunHandle};

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("automation not found: {0}")]
    NotFound(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("automation {id} cannot go from {from} to {to}")]
    InvalidStatus {
        id: Uuid,
        from: AutomationStatus,
        to: AutomationStatus,
    },

    #[error("automation {id} is {status}, only active automations can be triggered")]
    NotActive { id: Uuid, status: AutomationStatus },

    #[error("automation name '{0}' is already in use")]
    DuplicateName(String),

    #[error(transparent)]
    Executor(ExecutorError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<ExecutorError> for AutomationError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::AutomationNotFound(id) => AutomationError::NotFound(id.to_string()),
            ExecutorError::AutomationNotActive { id, status } => {
                AutomationError::NotActive { id, status }
            }
            other => AutomationError::Executor(other),
        }
    }
}

/// Whether a lifecycle move is allowed. Archiving is one-way.
fn lifecycle_allowed(from: AutomationStatus, to: AutomationStatus) -> bool {
    use AutomationStatus::*;
    matches!(
        (from, to),
        (Draft, Active) | (Paused, Active) | (Active, Paused) | (Draft | Active | Paused, Archived)
    )
}

/// Service orchestrating the automation lifecycle.
#[derive(Clone)]
pub struct AutomationService<S: Store> {
    store: S,
    executor: Executor<S>,
    audit: AuditLogger<S>,
}

impl<S: Store> AutomationService<S> {
    pub fn new(executor: Executor<S>) -> Self {
        let store = executor.manager().store().clone();
        Self {
            audit: AuditLogger::new(store.clone()),
            store,
            executor,
        }
    }

    /// Create a draft automation from a definition.
    pub async fn create(
        &self,
        def: AutomationDefinition,
        actor: Option<&str>,
    ) -> Result<Automation, AutomationError> {
        validate_definition(&def)?;
        if self.find_by_name(&def.name).await?.is_some() {
            return Err(AutomationError::DuplicateName(def.name));
        }

        let now = Utc::now();
        let automation = Automation {
            id: Uuid::now_v7(),
            name: def.name,
            description: def.description,
            workflow: def.workflow,
            error_handling: def.error_handling,
            retry_config: def.retry_config,
            timeout_secs: def.timeout_secs,
            status: AutomationStatus::Draft,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.save_automation(&automation).await?;

        tracing::info!(
            automation_id = %automation.id,
            name = automation.name.as_str(),
            nodes = automation.workflow.nodes.len(),
            "automation created"
        );
        self.audit
            .record(
                AuditEvent::new(AuditAction::AutomationCreated, EntityType::Automation, automation.id)
                    .automation(automation.id)
                    .details(json!({ "name": automation.name, "version": automation.version }))
                    .actor(actor),
            )
            .await;

        Ok(automation)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Automation, AutomationError> {
        self.store
            .get_automation(id)
            .await?
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))
    }

    /// Look up by id or, failing that, by exact name.
    pub async fn resolve(&self, id_or_name: &str) -> Result<Automation, AutomationError> {
        if let Ok(id) = Uuid::parse_str(id_or_name) {
            if let Some(found) = self.store.get_automation(&id).await? {
                return Ok(found);
            }
        }
        self.find_by_name(id_or_name)
            .await?
            .ok_or_else(|| AutomationError::NotFound(id_or_name.to_string()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Automation>, AutomationError> {
        Ok(self
            .store
            .list_automations(None)
            .await?
            .into_iter()
            .find(|a| a.name == name))
    }

    pub async fn list(&self, status: Option<AutomationStatus>) -> Result<Vec<Automation>, AutomationError> {
        Ok(self.store.list_automations(status).await?)
    }

    /// Replace the definition. Bumps the version; running executions keep
    /// the version they started with.
    pub async fn update(
        &self,
        id: &Uuid,
        def: AutomationDefinition,
        actor: Option<&str>,
    ) -> Result<Automation, AutomationError> {
        let mut automation = self.get(id).await?;
        if automation.status == AutomationStatus::Archived {
            return Err(AutomationError::InvalidStatus {
                id: *id,
                from: automation.status,
                to: automation.status,
            });
        }
        validate_definition(&def)?;
        if def.name != automation.name {
            if let Some(other) = self.find_by_name(&def.name).await? {
                if other.id != automation.id {
                    return Err(AutomationError::DuplicateName(def.name));
                }
            }
        }

        automation.name = def.name;
        automation.description = def.description;
        automation.workflow = def.workflow;
        automation.error_handling = def.error_handling;
        automation.retry_config = def.retry_config;
        automation.timeout_secs = def.timeout_secs;
        automation.version += 1;
        automation.updated_at = Utc::now();
        self.store.save_automation(&automation).await?;

        tracing::info!(automation_id = %id, version = automation.version, "automation updated");
        self.audit
            .record(
                AuditEvent::new(AuditAction::AutomationUpdated, EntityType::Automation, id)
                    .automation(*id)
                    .details(json!({ "version": automation.version }))
                    .actor(actor),
            )
            .await;

        Ok(automation)
    }

    pub async fn activate(&self, id: &Uuid, actor: Option<&str>) -> Result<Automation, AutomationError> {
        self.set_status(id, AutomationStatus::Active, AuditAction::AutomationActivated, actor)
            .await
    }

    pub async fn pause(&self, id: &Uuid, actor: Option<&str>) -> Result<Automation, AutomationError> {
        self.set_status(id, AutomationStatus::Paused, AuditAction::AutomationPaused, actor)
            .await
    }

    pub async fn archive(&self, id: &Uuid, actor: Option<&str>) -> Result<Automation, AutomationError> {
        self.set_status(id, AutomationStatus::Archived, AuditAction::AutomationArchived, actor)
            .await
    }

    async fn set_status(
        &self,
        id: &Uuid,
        to: AutomationStatus,
        action: AuditAction,
        actor: Option<&str>,
    ) -> Result<Automation, AutomationError> {
        let mut automation = self.get(id).await?;
        let from = automation.status;
        if !lifecycle_allowed(from, to) {
            return Err(AutomationError::InvalidStatus { id: *id, from, to });
        }
        if to == AutomationStatus::Active {
            crate::workflow::definition::validate_workflow(&automation.workflow)?;
        }

        automation.status = to;
        automation.updated_at = Utc::now();
        self.store.save_automation(&automation).await?;

        tracing::info!(automation_id = %id, from = from.as_str(), to = to.as_str(), "automation status changed");
        self.audit
            .record(
                AuditEvent::new(action, EntityType::Automation, id)
                    .automation(*id)
                    .details(json!({ "from": from.as_str(), "to": to.as_str() }))
                    .actor(actor),
            )
            .await;

        Ok(automation)
    }

    /// Delete an automation and its schedules. Past executions are kept
    /// until retention removes them.
    pub async fn delete(&self, id: &Uuid, actor: Option<&str>) -> Result<(), AutomationError> {
        let automation = self.get(id).await?;
        if !self.store.delete_automation(id).await? {
            return Err(AutomationError::NotFound(id.to_string()));
        }

        tracing::info!(automation_id = %id, "automation deleted");
        self.audit
            .record(
                AuditEvent::new(AuditAction::AutomationDeleted, EntityType::Automation, id)
                    .automation(*id)
                    .details(json!({ "name": automation.name }))
                    .actor(actor),
            )
            .await;
        Ok(())
    }

    /// Start a run on its own task. The handle carries the execution id;
    /// dropping it leaves the run going in the background.
    pub async fn trigger(
        &self,
        id: &Uuid,
        trigger_type: TriggerType,
        input: Variables,
        actor: Option<&str>,
    ) -> Result<RunHandle, AutomationError> {
        Ok(self.executor.start(*id, trigger_type, input, actor).await?)
    }

    /// Start a run and wait for it to finish.
    pub async fn trigger_and_wait(
        &self,
        id: &Uuid,
        trigger_type: TriggerType,
        input: Variables,
        actor: Option<&str>,
    ) -> Result<Execution, AutomationError> {
        let handle = self.executor.start(*id, trigger_type, input, actor).await?;
        Ok(handle.wait().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
