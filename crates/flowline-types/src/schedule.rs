//! Schedule types for cron-driven automation runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::Variables;

/// A cron rule that periodically creates executions of one automation.
///
/// `next_run_at` is always derived from `(cron_expression, timezone,
/// reference instant)` by the scheduler; callers never set it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub name: String,
    /// 5-field, 6-field, or human-readable ("every 5 minutes") expression.
    pub cron_expression: String,
    /// IANA timezone name the expression is evaluated in.
    pub timezone: String,
    pub is_active: bool,
    /// Input handed to each execution this schedule creates.
    #[serde(default)]
    pub input: Variables,
    pub next_run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Due when active and the next fire time has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn schedule(next_run_at: DateTime<Utc>, is_active: bool) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::now_v7(),
            automation_id: Uuid::now_v7(),
            name: "nightly".to_string(),
            cron_expression: "0 0 * * *".to_string(),
            timezone: "UTC".to_string(),
            is_active,
            input: Variables::new(),
            next_run_at,
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_is_due_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(schedule(now, true).is_due(now));
        assert!(schedule(now - Duration::seconds(1), true).is_due(now));
        assert!(!schedule(now + Duration::seconds(1), true).is_due(now));
    }

    #[test]
    fn test_inactive_schedule_never_due() {
        let now = Utc::now();
        assert!(!schedule(now - Duration::hours(1), false).is_due(now));
    }
}
