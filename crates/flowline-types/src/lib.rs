//! Shared domain types for Flowline.
//!
//! This crate contains the domain types used across the workflow engine:
//! Automation, Node, Edge, Execution, Schedule, AuditLogEntry, engine
//! configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod audit;
pub mod automation;
pub mod config;
pub mod error;
pub mod execution;
pub mod schedule;
