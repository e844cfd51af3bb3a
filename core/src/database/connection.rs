// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Database connection and pool management.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::{
    config::DatabaseConfig,
    error::{DatabaseError, DatabaseResult},
    models::{
        ExecutionCounts, ExecutionRecord, JobRecord, NewExecution, OutboxRecord, StatusTransition,
    },
    repositories::{ExecutionRepository, JobRepository, OutboxRepository},
};
use crate::jobs::{ExecutionStatus, JobSpec, JobStatus, Region};
use crate::repository::Repository;

/// Database connection with repository access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    jobs: Arc<JobRepository>,
    executions: Arc<ExecutionRepository>,
    outbox: Arc<OutboxRepository>,
}

impl Database {
    /// Connect to the database
    pub async fn connect(config: DatabaseConfig) -> DatabaseResult<Self> {
        info!("Connecting to database: {}", config.connection_url_safe());

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout_duration())
            .idle_timeout(config.idle_timeout_duration())
            .max_lifetime(config.max_lifetime_duration())
            .connect(&config.connection_url())
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connected successfully");

        let jobs = Arc::new(JobRepository::new(pool.clone()));
        let executions = Arc::new(ExecutionRepository::new(pool.clone()));
        let outbox = Arc::new(OutboxRepository::new(pool.clone()));

        Ok(Self {
            pool,
            jobs,
            executions,
            outbox,
        })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DatabaseResult<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");

        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get job repository
    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    /// Get execution repository
    pub fn executions(&self) -> &ExecutionRepository {
        &self.executions
    }

    /// Get outbox repository
    pub fn outbox(&self) -> &OutboxRepository {
        &self.outbox
    }

    /// Check database health
    pub async fn health_check(&self) -> DatabaseResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(true)
    }

    /// Close the database connection
    pub async fn close(&self) {
        debug!("Closing database connection");
        self.pool.close().await;
    }
}

#[async_trait]
impl Repository for Database {
    async fn create_job(
        &self,
        jobspec_id: &str,
        owner_id: Option<&str>,
        spec: &JobSpec,
    ) -> DatabaseResult<JobRecord> {
        self.jobs.create_with_outbox(jobspec_id, owner_id, spec).await
    }

    async fn job(&self, internal_id: i64) -> DatabaseResult<Option<JobRecord>> {
        self.jobs.get(internal_id).await
    }

    async fn job_by_jobspec_id(&self, jobspec_id: &str) -> DatabaseResult<Option<JobRecord>> {
        self.jobs.get_by_jobspec_id(jobspec_id).await
    }

    async fn update_job_status(
        &self,
        internal_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> DatabaseResult<StatusTransition> {
        self.jobs.update_status(internal_id, from, to).await
    }

    async fn record_job_outcome(
        &self,
        internal_id: i64,
        completed_count: i32,
        failed_count: i32,
        reason: Option<&str>,
    ) -> DatabaseResult<()> {
        self.jobs
            .record_outcome(internal_id, completed_count, failed_count, reason)
            .await
    }

    async fn increment_job_retry(&self, internal_id: i64) -> DatabaseResult<i32> {
        self.jobs.increment_retry(internal_id).await
    }

    async fn stale_jobs(
        &self,
        status: JobStatus,
        older_than_secs: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<JobRecord>> {
        self.jobs.list_stale(status, older_than_secs, limit).await
    }

    async fn insert_execution(&self, new: NewExecution) -> DatabaseResult<i64> {
        self.executions.insert(new).await
    }

    async fn finalize_execution(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        provider_id: Option<&str>,
        output: Option<&serde_json::Value>,
        receipt: Option<&serde_json::Value>,
    ) -> DatabaseResult<()> {
        self.executions
            .finalize(execution_id, status, provider_id, output, receipt)
            .await
    }

    async fn has_blocking_execution(
        &self,
        job_id: i64,
        region: Region,
        model_id: &str,
        question_id: Option<&str>,
    ) -> DatabaseResult<bool> {
        self.executions
            .has_blocking(job_id, region, model_id, question_id)
            .await
    }

    async fn list_executions(&self, job_id: i64) -> DatabaseResult<Vec<ExecutionRecord>> {
        self.executions.list_for_job(job_id).await
    }

    async fn count_executions(&self, job_id: i64) -> DatabaseResult<ExecutionCounts> {
        self.executions.counts_for_job(job_id).await
    }

    async fn cancel_open_executions(&self, job_id: i64) -> DatabaseResult<u64> {
        self.executions.cancel_open(job_id).await
    }

    async fn insert_outbox(&self, job_id: i64) -> DatabaseResult<()> {
        self.outbox.insert(job_id).await
    }

    async fn unpublished_outbox(&self, limit: i64) -> DatabaseResult<Vec<OutboxRecord>> {
        self.outbox.list_unpublished(limit).await
    }

    async fn mark_outbox_published(&self, outbox_id: i64) -> DatabaseResult<()> {
        self.outbox.mark_published(outbox_id).await
    }
}
