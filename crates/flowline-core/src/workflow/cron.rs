//! Cron expression handling for schedules.
//!
//! Everything here is pure: given the same expression, timezone and
//! reference instant the results never change. Expressions are evaluated in
//! the schedule's IANA timezone and converted back to UTC, so daylight saving
//! shifts land on the correct wall-clock time.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Upper bound on occurrences counted when measuring a gap, so a per-second
/// schedule that was down for a week does not spin.
pub const MAX_COUNTED_OCCURRENCES: usize = 10_000;

/// A cron expression or timezone that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schedule: {0}")]
pub struct ScheduleValidationError(pub String);

impl ScheduleValidationError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Turn a schedule string into a 6-field (seconds-first) cron expression.
///
/// Accepted forms (case-insensitive for the shorthands):
/// - 5-field cron, minute precision: `*/5 * * * *` -> `0 */5 * * * *`
/// - 6-field cron with seconds: passed through
/// - `every minute`, `every hour`, `every day`, `hourly`, `daily`
/// - `every N seconds|minutes|hours`
/// - `every day at HH:MM`
pub fn normalize_schedule(input: &str) -> Result<String, ScheduleValidationError> {
    let trimmed = input.trim();
    match trimmed.split_whitespace().count() {
        5 => return Ok(format!("0 {trimmed}")),
        6 => return Ok(trimmed.to_string()),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    let fixed = match lower.as_str() {
        "every minute" | "minutely" => Some("0 * * * * *"),
        "every hour" | "hourly" => Some("0 0 * * * *"),
        "every day" | "daily" => Some("0 0 0 * * *"),
        _ => None,
    };
    if let Some(expr) = fixed {
        return Ok(expr.to_string());
    }

    let invalid = || ScheduleValidationError::new(format!("unrecognized schedule format: '{trimmed}'"));
    let rest = lower.strip_prefix("every ").ok_or_else(invalid)?;

    if let Some(at) = rest.strip_prefix("day at ") {
        let (h, m) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(ScheduleValidationError::new(format!(
                "time of day out of range: '{at}'"
            )));
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let mut words = rest.split_whitespace();
    let (Some(n), Some(unit), None) = (words.next(), words.next(), words.next()) else {
        return Err(invalid());
    };
    let n: u32 = n.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(ScheduleValidationError::new("interval must be > 0"));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse an IANA timezone name such as `Europe/Berlin` or `UTC`.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleValidationError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleValidationError::new(format!("unknown timezone '{name}'")))
}

fn parse_cron(expr: &str) -> Result<croner::Cron, ScheduleValidationError> {
    let normalized = normalize_schedule(expr)?;
    normalized
        .parse::<croner::Cron>()
        .map_err(|e| ScheduleValidationError::new(format!("invalid cron expression '{expr}': {e}")))
}

/// Check that an expression/timezone pair parses and fires at least once.
pub fn validate(expr: &str, timezone: &str) -> Result<(), ScheduleValidationError> {
    compute_next_run(expr, timezone, Utc::now()).map(|_| ())
}

// ---------------------------------------------------------------------------
// Occurrences
// ---------------------------------------------------------------------------

/// The first instant strictly after `reference` at which `expr` matches in
/// `timezone`, as UTC.
pub fn compute_next_run(
    expr: &str,
    timezone: &str,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleValidationError> {
    let cron = parse_cron(expr)?;
    let tz = parse_timezone(timezone)?;
    let local = reference.with_timezone(&tz);
    cron.find_next_occurrence(&local, false)
        .map(|next| next.with_timezone(&Utc))
        .map_err(|e| ScheduleValidationError::new(format!("'{expr}' has no upcoming occurrence: {e}")))
}

/// The next `count` occurrences strictly after `reference`.
pub fn upcoming_runs(
    expr: &str,
    timezone: &str,
    reference: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, ScheduleValidationError> {
    let cron = parse_cron(expr)?;
    let tz = parse_timezone(timezone)?;
    Ok(cron
        .iter_after(reference.with_timezone(&tz))
        .take(count)
        .map(|t| t.with_timezone(&Utc))
        .collect())
}

/// Occurrences strictly after `after` and at or before `until`, capped at
/// [`MAX_COUNTED_OCCURRENCES`].
pub fn count_occurrences(
    expr: &str,
    timezone: &str,
    after: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<usize, ScheduleValidationError> {
    let cron = parse_cron(expr)?;
    let tz = parse_timezone(timezone)?;
    Ok(cron
        .iter_after(after.with_timezone(&tz))
        .take(MAX_COUNTED_OCCURRENCES)
        .take_while(|t| t.with_timezone(&Utc) <= until)
        .count())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
