// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Testing utilities.
//!
//! [`MemoryRepository`] implements the full [`Repository`] capability over
//! process memory with the same semantics as the PostgreSQL layer,
//! including the partial unit-uniqueness index and conditional status
//! updates, so runner and scheduler behavior can be exercised hermetically.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::models::{
    ExecutionCounts, ExecutionRecord, JobRecord, NewExecution, OutboxRecord, StatusTransition,
};
use crate::jobs::{ExecutionStatus, JobSpec, JobStatus, Region};
use crate::repository::Repository;

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<i64, JobRecord>,
    by_jobspec: HashMap<String, i64>,
    executions: BTreeMap<i64, ExecutionRecord>,
    outbox: BTreeMap<i64, OutboxRecord>,
    next_job_id: i64,
    next_execution_id: i64,
    next_outbox_id: i64,
}

/// In-memory [`Repository`] implementation for tests.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a job's `updated_at`, for exercising the recovery sweeps.
    pub fn age_job(&self, internal_id: i64, by_secs: i64) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.jobs.get_mut(&internal_id) {
            job.updated_at = job.updated_at - ChronoDuration::seconds(by_secs);
        }
    }

    /// Direct read of a job row without the async trait ceremony.
    pub fn job_snapshot(&self, internal_id: i64) -> Option<JobRecord> {
        self.inner.lock().jobs.get(&internal_id).cloned()
    }
}

fn unit_key(
    job_id: i64,
    region: &str,
    model_id: &str,
    question_id: Option<&str>,
) -> (i64, String, String, String) {
    (
        job_id,
        region.to_string(),
        model_id.to_string(),
        question_id.unwrap_or("").to_string(),
    )
}

fn parse_status(raw: &str) -> DatabaseResult<ExecutionStatus> {
    raw.parse()
        .map_err(|_| DatabaseError::InvalidInput(format!("bad execution status: {raw}")))
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_job(
        &self,
        jobspec_id: &str,
        owner_id: Option<&str>,
        spec: &JobSpec,
    ) -> DatabaseResult<JobRecord> {
        let spec_json = serde_json::to_value(spec)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let mut inner = self.inner.lock();
        if inner.by_jobspec.contains_key(jobspec_id) {
            return Err(DatabaseError::DuplicateKey(format!(
                "jobs_jobspec_id_key: {jobspec_id}"
            )));
        }

        inner.next_job_id += 1;
        let internal_id = inner.next_job_id;
        let now = Utc::now();

        let record = JobRecord {
            internal_id,
            jobspec_id: jobspec_id.to_string(),
            owner_id: owner_id.map(str::to_string),
            status: JobStatus::Created.as_str().to_string(),
            spec: spec_json,
            reason: None,
            completed_count: 0,
            failed_count: 0,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        inner.by_jobspec.insert(jobspec_id.to_string(), internal_id);
        inner.jobs.insert(internal_id, record.clone());

        inner.next_outbox_id += 1;
        let outbox_id = inner.next_outbox_id;
        inner.outbox.insert(
            outbox_id,
            OutboxRecord {
                id: outbox_id,
                job_id: internal_id,
                published: false,
                created_at: now,
                published_at: None,
            },
        );

        Ok(record)
    }

    async fn job(&self, internal_id: i64) -> DatabaseResult<Option<JobRecord>> {
        Ok(self.inner.lock().jobs.get(&internal_id).cloned())
    }

    async fn job_by_jobspec_id(&self, jobspec_id: &str) -> DatabaseResult<Option<JobRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_jobspec
            .get(jobspec_id)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }

    async fn update_job_status(
        &self,
        internal_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> DatabaseResult<StatusTransition> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&internal_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("job {internal_id}")))?;

        let current: JobStatus = job
            .status
            .parse()
            .map_err(|_| DatabaseError::InvalidInput(format!("bad job status: {}", job.status)))?;

        if !from.contains(&current) {
            return Ok(StatusTransition {
                applied: false,
                current,
            });
        }

        let now = Utc::now();
        job.status = to.as_str().to_string();
        job.updated_at = now;
        if to == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }

        Ok(StatusTransition {
            applied: true,
            current: to,
        })
    }

    async fn record_job_outcome(
        &self,
        internal_id: i64,
        completed_count: i32,
        failed_count: i32,
        reason: Option<&str>,
    ) -> DatabaseResult<()> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&internal_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("job {internal_id}")))?;

        job.completed_count = completed_count;
        job.failed_count = failed_count;
        if reason.is_some() {
            job.reason = reason.map(str::to_string);
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_job_retry(&self, internal_id: i64) -> DatabaseResult<i32> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&internal_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("job {internal_id}")))?;

        job.retry_count += 1;
        job.updated_at = Utc::now();
        Ok(job.retry_count)
    }

    async fn stale_jobs(
        &self,
        status: JobStatus,
        older_than_secs: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<JobRecord>> {
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs);
        let inner = self.inner.lock();

        let mut stale: Vec<JobRecord> = inner
            .jobs
            .values()
            .filter(|j| j.status == status.as_str() && j.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn insert_execution(&self, new: NewExecution) -> DatabaseResult<i64> {
        let mut inner = self.inner.lock();

        // The partial unique index: at most one blocking row per unit.
        if new.status.is_blocking() {
            let key = unit_key(
                new.job_id,
                new.region.as_str(),
                &new.model_id,
                new.question_id.as_deref(),
            );
            let conflict = inner.executions.values().any(|row| {
                row.unit_key() == key
                    && row
                        .execution_status()
                        .map(|s| s.is_blocking())
                        .unwrap_or(false)
            });
            if conflict {
                return Err(DatabaseError::DuplicateKey(format!(
                    "executions_unit_key: job {} {} {} {:?}",
                    new.job_id, new.region, new.model_id, new.question_id
                )));
            }
        }

        inner.next_execution_id += 1;
        let id = inner.next_execution_id;
        inner.executions.insert(
            id,
            ExecutionRecord {
                id,
                job_id: new.job_id,
                region: new.region.as_str().to_string(),
                model_id: new.model_id,
                question_id: new.question_id,
                attempt: new.attempt,
                status: new.status.as_str().to_string(),
                provider_id: new.provider_id,
                output: new.output,
                receipt: new.receipt,
                started_at: new.started_at,
                completed_at: new.completed_at,
                created_at: Utc::now(),
            },
        );

        Ok(id)
    }

    async fn finalize_execution(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        provider_id: Option<&str>,
        output: Option<&serde_json::Value>,
        receipt: Option<&serde_json::Value>,
    ) -> DatabaseResult<()> {
        let mut inner = self.inner.lock();
        let row = inner
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("execution {execution_id}")))?;

        row.status = status.as_str().to_string();
        if let Some(provider_id) = provider_id {
            row.provider_id = provider_id.to_string();
        }
        if let Some(output) = output {
            row.output = Some(output.clone());
        }
        if let Some(receipt) = receipt {
            row.receipt = Some(receipt.clone());
        }
        if status.is_terminal() && row.completed_at.is_none() {
            row.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn has_blocking_execution(
        &self,
        job_id: i64,
        region: Region,
        model_id: &str,
        question_id: Option<&str>,
    ) -> DatabaseResult<bool> {
        let key = unit_key(job_id, region.as_str(), model_id, question_id);
        let inner = self.inner.lock();
        Ok(inner.executions.values().any(|row| {
            row.unit_key() == key
                && row
                    .execution_status()
                    .map(|s| s.is_blocking())
                    .unwrap_or(false)
        }))
    }

    async fn list_executions(&self, job_id: i64) -> DatabaseResult<Vec<ExecutionRecord>> {
        let inner = self.inner.lock();
        let mut rows: Vec<ExecutionRecord> = inner
            .executions
            .values()
            .filter(|row| row.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let a_key = (
                a.region.clone(),
                a.model_id.clone(),
                a.question_id.clone().unwrap_or_default(),
                a.attempt,
            );
            let b_key = (
                b.region.clone(),
                b.model_id.clone(),
                b.question_id.clone().unwrap_or_default(),
                b.attempt,
            );
            a_key.cmp(&b_key)
        });
        Ok(rows)
    }

    async fn count_executions(&self, job_id: i64) -> DatabaseResult<ExecutionCounts> {
        let inner = self.inner.lock();
        let mut counts = ExecutionCounts::default();
        for row in inner.executions.values().filter(|r| r.job_id == job_id) {
            counts.record(parse_status(&row.status)?);
        }
        Ok(counts)
    }

    async fn cancel_open_executions(&self, job_id: i64) -> DatabaseResult<u64> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut updated = 0;

        for row in inner.executions.values_mut().filter(|r| r.job_id == job_id) {
            let status = parse_status(&row.status)?;
            if matches!(
                status,
                ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Retrying
            ) {
                row.status = ExecutionStatus::Cancelled.as_str().to_string();
                row.completed_at = Some(now);
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn insert_outbox(&self, job_id: i64) -> DatabaseResult<()> {
        let mut inner = self.inner.lock();
        inner.next_outbox_id += 1;
        let id = inner.next_outbox_id;
        inner.outbox.insert(
            id,
            OutboxRecord {
                id,
                job_id,
                published: false,
                created_at: Utc::now(),
                published_at: None,
            },
        );
        Ok(())
    }

    async fn unpublished_outbox(&self, limit: i64) -> DatabaseResult<Vec<OutboxRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .outbox
            .values()
            .filter(|row| !row.published)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_outbox_published(&self, outbox_id: i64) -> DatabaseResult<()> {
        let mut inner = self.inner.lock();
        let row = inner
            .outbox
            .get_mut(&outbox_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("outbox {outbox_id}")))?;
        row.published = true;
        row.published_at = Some(Utc::now());
        Ok(())
    }
}
