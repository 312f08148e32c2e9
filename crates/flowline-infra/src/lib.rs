//! Infrastructure layer for Flowline.
//!
//! Implements the repository ports from `flowline-core` on SQLite and loads
//! the engine configuration from the data directory.

pub mod config;
pub mod sqlite;
