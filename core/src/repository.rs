// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The repository capability.
//!
//! The runner, scheduler, context manager, and recovery controller all talk
//! to storage through this narrow trait rather than importing the database
//! layer directly. [`crate::database::Database`] implements it over
//! PostgreSQL; [`crate::testing::MemoryRepository`] implements it in memory
//! for hermetic tests. Tests construct a fresh repository per case.

use async_trait::async_trait;

use crate::database::error::DatabaseResult;
use crate::database::models::{
    ExecutionCounts, ExecutionRecord, JobRecord, NewExecution, OutboxRecord, StatusTransition,
};
use crate::jobs::{ExecutionStatus, JobSpec, JobStatus, Region};

/// Durable storage for jobs, executions, and outbox rows.
///
/// Implementations must enforce the unit-uniqueness invariant: at most one
/// pending, running, or completed execution per
/// (job, region, model, question) tuple, with an empty question id comparing
/// equal to NULL. A violating insert fails with
/// [`crate::database::DatabaseError::DuplicateKey`].
#[async_trait]
pub trait Repository: Send + Sync {
    // --- jobs ---

    /// Insert a job row and its outbox row in one transaction.
    async fn create_job(
        &self,
        jobspec_id: &str,
        owner_id: Option<&str>,
        spec: &JobSpec,
    ) -> DatabaseResult<JobRecord>;

    /// Fetch a job by internal id.
    async fn job(&self, internal_id: i64) -> DatabaseResult<Option<JobRecord>>;

    /// Fetch a job by its submitter-supplied id.
    async fn job_by_jobspec_id(&self, jobspec_id: &str) -> DatabaseResult<Option<JobRecord>>;

    /// Conditionally transition a job's status.
    ///
    /// The update applies only when the current status is one of `from`;
    /// otherwise the caller lost the race and receives the actual current
    /// status. `started_at` is stamped on the first move to `processing`,
    /// `completed_at` on any terminal status.
    async fn update_job_status(
        &self,
        internal_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> DatabaseResult<StatusTransition>;

    /// Persist the final counters and reason for a job.
    async fn record_job_outcome(
        &self,
        internal_id: i64,
        completed_count: i32,
        failed_count: i32,
        reason: Option<&str>,
    ) -> DatabaseResult<()>;

    /// Bump the job-level retry counter, returning the new value.
    async fn increment_job_retry(&self, internal_id: i64) -> DatabaseResult<i32>;

    /// Jobs sitting in `status` with no update for at least
    /// `older_than_secs` seconds, oldest first.
    async fn stale_jobs(
        &self,
        status: JobStatus,
        older_than_secs: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<JobRecord>>;

    // --- executions ---

    /// Insert an execution row. Fails with `DuplicateKey` when a blocking
    /// row already exists for the unit.
    async fn insert_execution(&self, new: NewExecution) -> DatabaseResult<i64>;

    /// Settle an open execution row: status, provider, payloads, and
    /// `completed_at` for terminal statuses.
    async fn finalize_execution(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        provider_id: Option<&str>,
        output: Option<&serde_json::Value>,
        receipt: Option<&serde_json::Value>,
    ) -> DatabaseResult<()>;

    /// The auto-stop probe: does a blocking (pending, running, or completed)
    /// row exist for this unit?
    async fn has_blocking_execution(
        &self,
        job_id: i64,
        region: Region,
        model_id: &str,
        question_id: Option<&str>,
    ) -> DatabaseResult<bool>;

    /// All execution rows for a job in deterministic
    /// (region, model, question, attempt) order.
    async fn list_executions(&self, job_id: i64) -> DatabaseResult<Vec<ExecutionRecord>>;

    /// Counts of the job's executions grouped by status.
    async fn count_executions(&self, job_id: i64) -> DatabaseResult<ExecutionCounts>;

    /// Bulk-cancel every non-terminal execution of a job. Returns the number
    /// of rows updated.
    async fn cancel_open_executions(&self, job_id: i64) -> DatabaseResult<u64>;

    // --- outbox ---

    /// Append an outbox row for a job (used by recovery republish).
    async fn insert_outbox(&self, job_id: i64) -> DatabaseResult<()>;

    /// Unpublished outbox rows in insertion order.
    async fn unpublished_outbox(&self, limit: i64) -> DatabaseResult<Vec<OutboxRecord>>;

    /// Mark an outbox row as published.
    async fn mark_outbox_published(&self, outbox_id: i64) -> DatabaseResult<()>;
}
