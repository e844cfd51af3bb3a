// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! In-process queue and claim-lock implementations.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::jobs::Envelope;
use crate::queue::{ClaimLock, ClaimToken, EnvelopeQueue, QueueResult};

/// FIFO envelope queue backed by process memory.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<Envelope>>,
    dead: Mutex<Vec<Envelope>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeQueue for MemoryQueue {
    async fn push(&self, envelope: Envelope) -> QueueResult<()> {
        self.jobs.lock().push_back(envelope);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, cancel: &CancellationToken) -> QueueResult<Option<Envelope>> {
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not lost.
            let notified = self.notify.notified();

            if let Some(envelope) = self.jobs.lock().pop_front() {
                return Ok(Some(envelope));
            }

            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn push_dead_letter(&self, envelope: Envelope) -> QueueResult<()> {
        self.dead.lock().push(envelope);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    async fn dead_letter_len(&self) -> usize {
        self.dead.lock().len()
    }
}

/// TTL claim table backed by process memory.
#[derive(Default)]
pub struct MemoryClaimLock {
    claims: DashMap<String, (u64, Instant)>,
    next_token: AtomicU64,
}

impl MemoryClaimLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClaimLock for MemoryClaimLock {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Option<ClaimToken> {
        let now = Instant::now();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.claims.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                let (held_token, expires) = held.get_mut();
                if *expires > now {
                    return None;
                }
                // Expired claim: the previous holder crashed or stalled.
                *held_token = token;
                *expires = now + ttl;
                Some(ClaimToken(token))
            }
            Entry::Vacant(vacant) => {
                vacant.insert((token, now + ttl));
                Some(ClaimToken(token))
            }
        }
    }

    fn release(&self, key: &str, token: ClaimToken) {
        self.claims
            .remove_if(key, |_, (held_token, _)| *held_token == token.0);
    }
}
