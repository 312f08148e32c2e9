//! Automation repository trait definition.

use flowline_types::automation::{Automation, AutomationStatus};
use flowline_types::error::RepositoryError;
use uuid::Uuid;

/// Storage for automation definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AutomationRepository: Send + Sync {
    /// Upsert an automation (insert or replace by ID).
    fn save_automation(
        &self,
        automation: &Automation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_automation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Automation>, RepositoryError>> + Send;

    /// List automations ordered by name, optionally filtered by status.
    fn list_automations(
        &self,
        status: Option<AutomationStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Automation>, RepositoryError>> + Send;

    /// Delete an automation and every schedule that references it.
    /// Returns `true` if the automation existed.
    fn delete_automation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
