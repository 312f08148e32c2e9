//! Execution repository trait definition.
//!
//! Status changes and log appends are conditional writes: the repository
//! applies them only while the stored status matches, which is what keeps two
//! concurrent writers from both finalizing the same execution.

use chrono::{DateTime, Utc};
use flowline_types::error::RepositoryError;
use flowline_types::execution::{
    Execution, ExecutionFilter, ExecutionStatus, LogEntry, StatusChange,
};
use uuid::Uuid;

pub trait ExecutionRepository: Send + Sync {
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution with its logs in append order.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions newest first. Logs are not loaded; use
    /// `get_execution` for a single execution's log.
    fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Apply `change` only if the stored status equals `expected`.
    /// Returns `false` when another writer got there first.
    fn compare_and_set_status(
        &self,
        id: &Uuid,
        expected: ExecutionStatus,
        change: &StatusChange,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Append a log entry only while the execution is running.
    fn append_log_if_running(
        &self,
        id: &Uuid,
        entry: &LogEntry,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete terminal executions (and their logs) completed before `cutoff`.
    fn purge_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
