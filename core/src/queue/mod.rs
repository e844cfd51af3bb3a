// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Queue handoff capabilities.
//!
//! The handoff between job submission and the runner is expressed as two
//! small capabilities rather than a concrete store: an at-least-once
//! [`EnvelopeQueue`] with a dead-letter topic, and a short-TTL [`ClaimLock`]
//! keyed by `jobspec_id`. The in-process implementations in [`memory`] serve
//! single-process deployments and tests; a clustered deployment implements
//! the same traits over a shared store.

pub mod memory;
pub mod publisher;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::jobs::Envelope;

pub use memory::{MemoryClaimLock, MemoryQueue};
pub use publisher::OutboxPublisher;

/// Queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend is unreachable
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Envelope could not be encoded or decoded
    #[error("Envelope serialization error: {0}")]
    Serialization(String),
}

/// At-least-once envelope delivery.
///
/// Envelopes are idempotent keys; consumers must tolerate redelivery.
#[async_trait]
pub trait EnvelopeQueue: Send + Sync {
    /// Push an envelope onto the jobs topic.
    async fn push(&self, envelope: Envelope) -> QueueResult<()>;

    /// Pop the next envelope, waiting until one arrives or the token fires.
    /// Returns `None` on cancellation.
    async fn pop(&self, cancel: &CancellationToken) -> QueueResult<Option<Envelope>>;

    /// Move an envelope to the dead-letter topic for operator inspection.
    async fn push_dead_letter(&self, envelope: Envelope) -> QueueResult<()>;

    /// Envelopes currently waiting on the jobs topic.
    async fn len(&self) -> usize;

    /// Envelopes parked on the dead-letter topic.
    async fn dead_letter_len(&self) -> usize;
}

/// An acquired claim, released explicitly or reclaimed by TTL expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken(pub u64);

/// Cluster-wide mutual exclusion keyed by `jobspec_id`.
///
/// The TTL bounds how long a crashed holder can wedge a key; recovery
/// handles the orphaned job once the lock expires.
pub trait ClaimLock: Send + Sync {
    /// Attempt to acquire the lock for `key`. Returns a token on success,
    /// `None` when another holder owns a live claim.
    fn try_acquire(&self, key: &str, ttl: Duration) -> Option<ClaimToken>;

    /// Release a claim. A stale token (expired and re-acquired by another
    /// holder) is ignored.
    fn release(&self, key: &str, token: ClaimToken);
}
