// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Job context registry and user-initiated cancellation.
//!
//! A process-wide registry maps `jobspec_id` to the cancellation token of
//! the currently active job. The runner registers on claim and unregisters
//! on every exit path; a cancel request fires the token so in-flight
//! provider calls abort.

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::database::DatabaseError;
use crate::jobs::JobStatus;
use crate::repository::Repository;

/// Registry of active job contexts.
#[derive(Default)]
pub struct ContextManager {
    active: DashMap<String, CancellationToken>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the active context for a job. Called at the start of
    /// processing; a previous stale registration is replaced.
    pub fn register(&self, jobspec_id: &str, token: CancellationToken) {
        self.active.insert(jobspec_id.to_string(), token);
    }

    /// Remove a job's registration. Called on every exit path.
    pub fn unregister(&self, jobspec_id: &str) {
        self.active.remove(jobspec_id);
    }

    /// Fire a registered context. Returns whether one was present.
    pub fn cancel(&self, jobspec_id: &str) -> bool {
        match self.active.get(jobspec_id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Cancellation errors
#[derive(Debug, Error)]
pub enum CancelError {
    /// No job with the given id
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The requester does not own the job
    #[error("Requester does not own job {0}")]
    NotOwner(String),

    /// The job already reached a terminal status other than `cancelled`
    #[error("Job is already {0}")]
    AlreadyTerminal(JobStatus),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    /// The job's status after the request
    pub status: JobStatus,
    /// Non-terminal executions flipped to `cancelled`
    pub cancelled_executions: u64,
    /// Whether an active context was signalled
    pub context_signalled: bool,
}

/// Cancel a job on behalf of its owner.
///
/// Idempotent: cancelling an already-cancelled job succeeds without side
/// effects. The conditional status update is the arbiter against racing
/// runners; the registered context (when present) aborts in-flight work; and
/// the bulk execution update sweeps rows the scheduler has not reached yet.
pub async fn cancel_job(
    repo: &dyn Repository,
    contexts: &ContextManager,
    jobspec_id: &str,
    requester: Option<&str>,
) -> Result<CancelOutcome, CancelError> {
    let job = repo
        .job_by_jobspec_id(jobspec_id)
        .await?
        .ok_or_else(|| CancelError::NotFound(jobspec_id.to_string()))?;

    if let (Some(requester), Some(owner)) = (requester, job.owner_id.as_deref()) {
        if requester != owner {
            return Err(CancelError::NotOwner(jobspec_id.to_string()));
        }
    }

    let status = job
        .job_status()
        .map_err(CancelError::Database)?;

    if status.is_terminal() {
        return if status == JobStatus::Cancelled {
            debug!(jobspec_id, "cancel on already-cancelled job");
            Ok(CancelOutcome {
                status,
                cancelled_executions: 0,
                context_signalled: false,
            })
        } else {
            Err(CancelError::AlreadyTerminal(status))
        };
    }

    let transition = repo
        .update_job_status(job.internal_id, &JobStatus::OPEN, JobStatus::Cancelled)
        .await?;

    if !transition.applied && transition.current != JobStatus::Cancelled {
        return Err(CancelError::AlreadyTerminal(transition.current));
    }

    let context_signalled = contexts.cancel(jobspec_id);
    let cancelled_executions = repo.cancel_open_executions(job.internal_id).await?;

    info!(
        jobspec_id,
        cancelled_executions, context_signalled, "job cancelled"
    );

    Ok(CancelOutcome {
        status: JobStatus::Cancelled,
        cancelled_executions,
        context_signalled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_cancel_unregister() {
        let contexts = ContextManager::new();
        let token = CancellationToken::new();

        contexts.register("job-1", token.clone());
        assert_eq!(contexts.len(), 1);

        assert!(contexts.cancel("job-1"));
        assert!(token.is_cancelled());

        contexts.unregister("job-1");
        assert!(contexts.is_empty());
        assert!(!contexts.cancel("job-1"));
    }

    #[test]
    fn test_register_replaces_stale_entry() {
        let contexts = ContextManager::new();
        let stale = CancellationToken::new();
        let fresh = CancellationToken::new();

        contexts.register("job-1", stale.clone());
        contexts.register("job-1", fresh.clone());

        contexts.cancel("job-1");
        assert!(!stale.is_cancelled());
        assert!(fresh.is_cancelled());
    }
}
