// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution repository.
//!
//! Sole enforcer of the unit dedup invariant at storage level: the partial
//! unique index `executions_unit_key` admits at most one pending, running,
//! or completed row per (job, region, model, coalesce(question, '')) tuple.
//! Failed and cancelled rows stay behind as the audit trail of earlier
//! attempts without blocking a retry.

use sqlx::PgPool;

use crate::database::{
    error::DatabaseResult,
    models::{ExecutionCounts, ExecutionRecord, NewExecution},
};
use crate::jobs::{ExecutionStatus, Region};

/// Execution repository
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    /// Create a new execution repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an execution row.
    ///
    /// A unique-index conflict surfaces as
    /// [`crate::database::DatabaseError::DuplicateKey`] so the scheduler can
    /// record the unit as `duplicate_skipped`.
    pub async fn insert(&self, new: NewExecution) -> DatabaseResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO executions (
                job_id, region, model_id, question_id, attempt, status,
                provider_id, output, receipt, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(new.job_id)
        .bind(new.region.as_str())
        .bind(&new.model_id)
        .bind(&new.question_id)
        .bind(new.attempt)
        .bind(new.status.as_str())
        .bind(&new.provider_id)
        .bind(&new.output)
        .bind(&new.receipt)
        .bind(new.started_at)
        .bind(new.completed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Settle an open row. `completed_at` is stamped for terminal statuses.
    pub async fn finalize(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        provider_id: Option<&str>,
        output: Option<&serde_json::Value>,
        receipt: Option<&serde_json::Value>,
    ) -> DatabaseResult<()> {
        let completed_at = if status.is_terminal() {
            Some(chrono::Utc::now())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE executions
            SET status = $1,
                provider_id = COALESCE($2, provider_id),
                output = COALESCE($3, output),
                receipt = COALESCE($4, receipt),
                completed_at = COALESCE($5, completed_at)
            WHERE id = $6
            "#,
        )
        .bind(status.as_str())
        .bind(provider_id)
        .bind(output)
        .bind(receipt)
        .bind(completed_at)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The auto-stop probe: is there a blocking row for this unit?
    ///
    /// The empty question id compares equal to NULL, matching the unique
    /// index expression.
    pub async fn has_blocking(
        &self,
        job_id: i64,
        region: Region,
        model_id: &str,
        question_id: Option<&str>,
    ) -> DatabaseResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM executions
                WHERE job_id = $1
                  AND region = $2
                  AND model_id = $3
                  AND COALESCE(question_id, '') = $4
                  AND status = ANY(ARRAY['pending', 'running', 'completed'])
            )
            "#,
        )
        .bind(job_id)
        .bind(region.as_str())
        .bind(model_id)
        .bind(question_id.unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// All rows for a job in deterministic order for barrier and reporting
    /// logic.
    pub async fn list_for_job(&self, job_id: i64) -> DatabaseResult<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            SELECT * FROM executions
            WHERE job_id = $1
            ORDER BY region ASC, model_id ASC, COALESCE(question_id, '') ASC, attempt ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Counts grouped by status.
    pub async fn counts_for_job(&self, job_id: i64) -> DatabaseResult<ExecutionCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM executions
            WHERE job_id = $1
            GROUP BY status
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = ExecutionCounts::default();
        for (status, count) in rows {
            if let Ok(status) = status.parse::<ExecutionStatus>() {
                match status {
                    ExecutionStatus::Pending => counts.pending = count,
                    ExecutionStatus::Running => counts.running = count,
                    ExecutionStatus::Completed => counts.completed = count,
                    ExecutionStatus::Failed => counts.failed = count,
                    ExecutionStatus::Cancelled => counts.cancelled = count,
                    ExecutionStatus::DuplicateSkipped => counts.duplicate_skipped = count,
                    ExecutionStatus::Retrying => counts.retrying = count,
                }
            }
        }

        Ok(counts)
    }

    /// Bulk-cancel every non-terminal row of a job.
    pub async fn cancel_open(&self, job_id: i64) -> DatabaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'cancelled', completed_at = now()
            WHERE job_id = $1
              AND status = ANY(ARRAY['pending', 'running', 'retrying'])
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
