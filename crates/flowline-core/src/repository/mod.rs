//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (flowline-infra) implements. The core crate never depends on any
//! specific storage technology. `memory` provides an in-process
//! implementation used by tests and embedders.

pub mod audit;
pub mod automation;
pub mod execution;
pub mod memory;
pub mod schedule;

use audit::AuditRepository;
use automation::AutomationRepository;
use execution::ExecutionRepository;
use schedule::ScheduleRepository;

/// Every port the engine needs, bundled so services take a single handle.
///
/// Implementors are cheap to clone (pool or `Arc` handles) so each spawned
/// execution task can own one.
pub trait Store:
    AutomationRepository
    + ExecutionRepository
    + ScheduleRepository
    + AuditRepository
    + Clone
    + 'static
{
}

impl<T> Store for T where
    T: AutomationRepository
        + ExecutionRepository
        + ScheduleRepository
        + AuditRepository
        + Clone
        + 'static
{
}
