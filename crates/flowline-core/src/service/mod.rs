//! Services composing the engine pieces into the management surface.
//!
//! `Engine` wires one store, one action registry and one configuration into
//! every service, so callers (the CLI, embedders) build it once and share it.

pub mod automation;
pub mod retention;

use flowline_types::config::EngineConfig;

use crate::repository::Store;
use crate::workflow::action::ActionRegistry;
use crate::workflow::audit::AuditLogger;
use crate::workflow::execution::ExecutionManager;
use crate::workflow::executor::Executor;
use crate::workflow::scheduler::Scheduler;
use automation::AutomationService;
use retention::RetentionService;

/// All engine services over a single store.
#[derive(Clone)]
pub struct Engine<S: Store> {
    pub automations: AutomationService<S>,
    pub executions: ExecutionManager<S>,
    pub scheduler: Scheduler<S>,
    pub retention: RetentionService<S>,
    pub audit: AuditLogger<S>,
    pub config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, registry: ActionRegistry, config: EngineConfig) -> Self {
        let executions = ExecutionManager::new(store.clone());
        let executor = Executor::new(executions.clone(), registry, config.executor.clone());

        tracing::debug!(
            handlers = ?executor.registry().node_types(),
            "engine initialized"
        );

        Self {
            automations: AutomationService::new(executor.clone()),
            scheduler: Scheduler::new(executor),
            retention: RetentionService::new(store.clone()),
            audit: AuditLogger::new(store),
            executions,
            config,
        }
    }
}
