// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::jobs::{ExecutionStatus, JobSpec, JobStatus, Region};

/// Job record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub internal_id: i64,
    pub jobspec_id: String,
    pub owner_id: Option<String>,
    pub status: String,
    pub spec: serde_json::Value,
    pub reason: Option<String>,
    pub completed_count: i32,
    pub failed_count: i32,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Parse the stored status string.
    pub fn job_status(&self) -> DatabaseResult<JobStatus> {
        self.status
            .parse()
            .map_err(|_| DatabaseError::InvalidInput(format!("bad job status: {}", self.status)))
    }

    /// Deserialize the stored spec.
    pub fn job_spec(&self) -> DatabaseResult<JobSpec> {
        serde_json::from_value(self.spec.clone())
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))
    }
}

/// Execution record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_id: i64,
    pub region: String,
    pub model_id: String,
    pub question_id: Option<String>,
    pub attempt: i32,
    pub status: String,
    pub provider_id: String,
    pub output: Option<serde_json::Value>,
    pub receipt: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Parse the stored status string.
    pub fn execution_status(&self) -> DatabaseResult<ExecutionStatus> {
        self.status.parse().map_err(|_| {
            DatabaseError::InvalidInput(format!("bad execution status: {}", self.status))
        })
    }

    /// Parse the stored region string.
    pub fn execution_region(&self) -> DatabaseResult<Region> {
        self.region
            .parse()
            .map_err(|_| DatabaseError::InvalidInput(format!("bad region: {}", self.region)))
    }

    /// The unit tuple this row belongs to, with the empty question treated
    /// as equal to NULL.
    pub fn unit_key(&self) -> (i64, String, String, String) {
        (
            self.job_id,
            self.region.clone(),
            self.model_id.clone(),
            self.question_id.clone().unwrap_or_default(),
        )
    }
}

/// Outbox record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub job_id: i64,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Execution insert data
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub job_id: i64,
    pub region: Region,
    pub model_id: String,
    pub question_id: Option<String>,
    pub attempt: i32,
    pub status: ExecutionStatus,
    pub provider_id: String,
    pub output: Option<serde_json::Value>,
    pub receipt: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewExecution {
    /// A row opened before dispatching the provider call.
    pub fn running(
        job_id: i64,
        region: Region,
        model_id: impl Into<String>,
        question_id: Option<String>,
        attempt: i32,
    ) -> Self {
        Self {
            job_id,
            region,
            model_id: model_id.into(),
            question_id,
            attempt,
            status: ExecutionStatus::Running,
            provider_id: String::new(),
            output: None,
            receipt: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A `duplicate_skipped` row recorded by the auto-stop check.
    pub fn duplicate_skipped(
        job_id: i64,
        region: Region,
        model_id: impl Into<String>,
        question_id: Option<String>,
        attempt: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            region,
            model_id: model_id.into(),
            question_id,
            attempt,
            status: ExecutionStatus::DuplicateSkipped,
            provider_id: String::new(),
            output: None,
            receipt: None,
            started_at: Some(now),
            completed_at: Some(now),
        }
    }
}

/// Counts of a job's executions grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub duplicate_skipped: i64,
    pub retrying: i64,
}

impl ExecutionCounts {
    /// Rows in a terminal status.
    pub fn terminal(&self) -> i64 {
        self.completed + self.failed + self.cancelled + self.duplicate_skipped
    }

    /// Rows still open.
    pub fn open(&self) -> i64 {
        self.pending + self.running + self.retrying
    }

    pub fn total(&self) -> i64 {
        self.terminal() + self.open()
    }

    /// Fold one status into the counts.
    pub fn record(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Pending => self.pending += 1,
            ExecutionStatus::Running => self.running += 1,
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::DuplicateSkipped => self.duplicate_skipped += 1,
            ExecutionStatus::Retrying => self.retrying += 1,
        }
    }
}

/// Outcome of a conditional job-status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    /// Whether the update matched and was applied
    pub applied: bool,
    /// The job's status after the call (the existing status when the update
    /// lost the race)
    pub current: JobStatus,
}
