// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Job repository.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::database::{
    error::{DatabaseError, DatabaseResult},
    models::{JobRecord, StatusTransition},
};
use crate::jobs::{JobSpec, JobStatus};

/// Job repository
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a job and its outbox row in one transaction.
    pub async fn create_with_outbox(
        &self,
        jobspec_id: &str,
        owner_id: Option<&str>,
        spec: &JobSpec,
    ) -> DatabaseResult<JobRecord> {
        let spec_json = serde_json::to_value(spec)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (jobspec_id, owner_id, status, spec)
            VALUES ($1, $2, 'created', $3)
            RETURNING *
            "#,
        )
        .bind(jobspec_id)
        .bind(owner_id)
        .bind(&spec_json)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO outbox (job_id) VALUES ($1)")
            .bind(record.internal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(record)
    }

    /// Get job by internal id
    pub async fn get(&self, internal_id: i64) -> DatabaseResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE internal_id = $1")
            .bind(internal_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Get job by submitter-supplied id
    pub async fn get_by_jobspec_id(&self, jobspec_id: &str) -> DatabaseResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE jobspec_id = $1")
            .bind(jobspec_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Conditional status transition.
    ///
    /// Applies only when the current status is in `from`; callers treat a
    /// non-matching status as a lost race and act on the returned current
    /// status instead.
    pub async fn update_status(
        &self,
        internal_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> DatabaseResult<StatusTransition> {
        let from_strs: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let updated = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE jobs
            SET status = $1,
                updated_at = now(),
                started_at = CASE
                    WHEN $1 = 'processing' AND started_at IS NULL THEN now()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $1 = ANY(ARRAY['completed', 'failed', 'cancelled']) THEN now()
                    ELSE completed_at
                END
            WHERE internal_id = $2 AND status = ANY($3)
            RETURNING status
            "#,
        )
        .bind(to.as_str())
        .bind(internal_id)
        .bind(&from_strs)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(status) = updated {
            let current = status
                .parse()
                .map_err(|_| DatabaseError::InvalidInput(format!("bad job status: {status}")))?;
            return Ok(StatusTransition {
                applied: true,
                current,
            });
        }

        let current: String =
            sqlx::query_scalar("SELECT status FROM jobs WHERE internal_id = $1")
                .bind(internal_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DatabaseError::NotFound(format!("job {internal_id}")))?;

        let current = current
            .parse()
            .map_err(|_| DatabaseError::InvalidInput(format!("bad job status: {current}")))?;

        Ok(StatusTransition {
            applied: false,
            current,
        })
    }

    /// Persist final counters and reason.
    pub async fn record_outcome(
        &self,
        internal_id: i64,
        completed_count: i32,
        failed_count: i32,
        reason: Option<&str>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET completed_count = $1,
                failed_count = $2,
                reason = COALESCE($3, reason),
                updated_at = now()
            WHERE internal_id = $4
            "#,
        )
        .bind(completed_count)
        .bind(failed_count)
        .bind(reason)
        .bind(internal_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bump the job-level retry counter.
    pub async fn increment_retry(&self, internal_id: i64) -> DatabaseResult<i32> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1, updated_at = now()
            WHERE internal_id = $1
            RETURNING retry_count
            "#,
        )
        .bind(internal_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("job {internal_id}")))?;

        Ok(count)
    }

    /// Jobs in `status` untouched for at least `older_than_secs`, oldest
    /// first. Used by the recovery sweeps.
    pub async fn list_stale(
        &self,
        status: JobStatus,
        older_than_secs: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<JobRecord>> {
        let cutoff = Utc::now() - Duration::seconds(older_than_secs);

        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
        )
        .bind(status.as_str())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
