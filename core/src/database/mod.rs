// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Execution Repository (PostgreSQL)
//!
//! Durable persistence for jobs, executions, and outbox rows, behind the
//! [`crate::repository::Repository`] capability. This layer is the sole
//! enforcer of the unit dedup invariant: a partial unique index admits at
//! most one pending, running, or completed execution per
//! (job, region, model, coalesce(question, '')) tuple, and violations
//! surface as [`DatabaseError::DuplicateKey`] so the scheduler can convert
//! them to `duplicate_skipped` deterministically.
//!
//! Transient database errors bubble up to callers, which retry with
//! backoff; the repository never silently drops a write.

pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use config::{DatabaseConfig, DatabaseConfigBuilder};
pub use connection::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use models::*;
pub use repositories::{ExecutionRepository, JobRepository, OutboxRepository};

/// Default database name
pub const DEFAULT_DATABASE_NAME: &str = "meridian";

/// Default connection pool size
pub const DEFAULT_POOL_SIZE: u32 = 20;

/// Default connection timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;
