//! Workflow engine and repository trait definitions for Flowline.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the engine itself: graph compilation, variable
//! resolution, action dispatch, retry policy, execution state machine, the
//! cron scheduler, and the audit logger. It depends only on `flowline-types`
//! -- never on `flowline-infra` or any database crate.

pub mod repository;
pub mod service;
pub mod workflow;
