//! Audit repository trait definition.
//!
//! Append-only: there is no update operation, and deletion exists only for
//! the retention purge.

use chrono::{DateTime, Utc};
use flowline_types::audit::{AuditFilter, AuditLogEntry};
use flowline_types::error::RepositoryError;

pub trait AuditRepository: Send + Sync {
    fn append_audit(
        &self,
        entry: &AuditLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Query entries newest first.
    fn list_audit(
        &self,
        filter: &AuditFilter,
    ) -> impl std::future::Future<Output = Result<Vec<AuditLogEntry>, RepositoryError>> + Send;

    /// Delete entries older than `cutoff`.
    fn purge_audit_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
