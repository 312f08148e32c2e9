//! Workflow engine core: graph compilation, execution, scheduling and audit.
//!
//! - `definition` -- YAML/JSON automation files and structural validation
//! - `dag` -- graph compiler: adjacency, start nodes, cycle rejection
//! - `variables` -- `{{name}}` placeholder resolution in node config
//! - `action` -- `ActionHandler` trait and the injectable `ActionRegistry`
//! - `builtin` -- engine-internal `log`, `set_variable` and `delay` actions
//! - `context` -- per-run variable overlay and node outputs
//! - `expression` -- JEXL evaluator for edge guards
//! - `retry` -- failure policy decision table and backoff
//! - `execution` -- execution state machine with compare-and-set transitions
//! - `executor` -- depth-first graph walker
//! - `cron` -- pure cron/timezone evaluation
//! - `scheduler` -- schedule CRUD and the claim-based poll loop
//! - `audit` -- append-only audit logger

pub mod action;
pub mod audit;
pub mod builtin;
pub mod context;
pub mod cron;
pub mod dag;
pub mod definition;
pub mod execution;
pub mod executor;
pub mod expression;
pub mod retry;
pub mod scheduler;
pub mod variables;
