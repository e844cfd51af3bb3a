// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outbox publisher.
//!
//! Periodically reads unpublished outbox rows in insertion order, pushes one
//! envelope per row, and marks the row published after a successful push. A
//! crash between the push and the mark yields a duplicate envelope on the
//! next scan, which the claim lock and the execution dedup barrier absorb.

use std::sync::Arc;
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::database::DatabaseError;
use crate::jobs::{Envelope, JobStatus};
use crate::queue::{EnvelopeQueue, QueueError};
use crate::repository::Repository;

/// Publisher errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The outbox publisher task.
pub struct OutboxPublisher {
    repo: Arc<dyn Repository>,
    queue: Arc<dyn EnvelopeQueue>,
    config: QueueConfig,
}

impl OutboxPublisher {
    pub fn new(
        repo: Arc<dyn Repository>,
        queue: Arc<dyn EnvelopeQueue>,
        config: QueueConfig,
    ) -> Self {
        Self {
            repo,
            queue,
            config,
        }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.publish_interval_ms,
            "outbox publisher starting"
        );

        let mut ticker = interval(self.config.publish_interval());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_batch().await {
                        warn!(error = %e, "outbox publish pass failed");
                    }
                }
            }
        }

        info!("outbox publisher stopped");
    }

    /// Publish one batch of unpublished rows. Returns the number of
    /// envelopes pushed.
    pub async fn publish_batch(&self) -> Result<usize, PublishError> {
        let rows = self
            .repo
            .unpublished_outbox(self.config.publish_batch)
            .await?;

        let mut published = 0;
        for row in rows {
            let Some(job) = self.repo.job(row.job_id).await? else {
                // Orphaned row; mark it so the scan does not spin on it.
                warn!(outbox_id = row.id, job_id = row.job_id, "outbox row without job");
                self.repo.mark_outbox_published(row.id).await?;
                continue;
            };

            let envelope = Envelope::new(job.internal_id, job.jobspec_id.clone(), job.retry_count);
            self.queue.push(envelope).await?;
            self.repo.mark_outbox_published(row.id).await?;

            // First publication moves the job forward; republished rows for
            // jobs already past `created` leave the status alone.
            self.repo
                .update_job_status(job.internal_id, &[JobStatus::Created], JobStatus::Queued)
                .await?;

            debug!(job_id = job.internal_id, jobspec_id = %job.jobspec_id, "envelope published");
            published += 1;
        }

        Ok(published)
    }
}
