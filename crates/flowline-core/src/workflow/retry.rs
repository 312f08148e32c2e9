//! Failure policy as data.
//!
//! A node failure is described by three facts: the node's `ErrorHandling`
//! mode, how much of its retry budget is left, and whether the error is
//! retryable. `decide` maps that triple to a `FailureDisposition` through a
//! single exhaustive match, so every combination is visible in one place.
//!
//! | mode     | budget    | error class | disposition |
//! |----------|-----------|-------------|-------------|
//! | stop     | any       | any         | Stop        |
//! | continue | any       | any         | Continue    |
//! | retry    | remaining | retryable   | Retry       |
//! | retry    | remaining | fatal       | Stop        |
//! | retry    | exhausted | any         | Stop        |

use std::time::Duration;

use flowline_types::automation::{BackoffStrategy, ErrorHandling, RetryConfig};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Whether retrying could help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl ErrorClass {
    pub fn from_retryable(retryable: bool) -> Self {
        if retryable {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }
}

/// Retry budget of one node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Remaining { used: u32, left: u32 },
    Exhausted,
}

impl RetryBudget {
    pub fn new(max_retries: u32, used: u32) -> Self {
        if used < max_retries {
            RetryBudget::Remaining {
                used,
                left: max_retries - used,
            }
        } else {
            RetryBudget::Exhausted
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Abort the run; the execution fails with this node attached.
    Stop,
    /// Record the failure and carry on to successors.
    Continue,
    /// Sleep `delay`, then invoke the action again as retry number `retry`.
    Retry { retry: u32, delay: Duration },
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff settings for one automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build from an automation's retry configuration, with `cap_ms` as an
    /// engine-wide upper bound on any delay.
    pub fn from_config(config: &RetryConfig, cap_ms: u64) -> Self {
        Self {
            backoff: config.backoff,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.min(cap_ms)),
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// - fixed: `base`
    /// - linear: `base * retry`
    /// - exponential: `base * 2^(retry - 1)`
    ///
    /// Always capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let n = retry.max(1);
        let base = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let ms = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(n)),
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(n - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Decision table
// ---------------------------------------------------------------------------

/// Decide what happens after a node failure.
pub fn decide(
    mode: ErrorHandling,
    budget: RetryBudget,
    class: ErrorClass,
    policy: &RetryPolicy,
) -> FailureDisposition {
    match (mode, budget, class) {
        (ErrorHandling::Stop, _, _) => FailureDisposition::Stop,
        (ErrorHandling::Continue, _, _) => FailureDisposition::Continue,
        (ErrorHandling::Retry, RetryBudget::Remaining { used, .. }, ErrorClass::Retryable) => {
            let retry = used + 1;
            FailureDisposition::Retry {
                retry,
                delay: policy.delay_for(retry),
            }
        }
        (ErrorHandling::Retry, RetryBudget::Remaining { .. }, ErrorClass::Fatal) => {
            FailureDisposition::Stop
        }
        (ErrorHandling::Retry, RetryBudget::Exhausted, _) => FailureDisposition::Stop,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
