// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Job and execution status machines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for unrecognized status strings read back from storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Job lifecycle status.
///
/// Transitions are monotonic except that recovery may send a stale
/// `processing` job back to `created` for re-enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Inserted by the submitter, not yet published
    Created,
    /// Envelope published to the queue
    Queued,
    /// Claimed by a runner
    Processing,
    /// Matrix expanded, units scheduled
    Running,
    /// Barrier reached, waiting for in-flight writes to land
    Finalizing,
    /// Terminal: matrix complete and success rate met
    Completed,
    /// Terminal: timeout, insufficient success rate, or unrecoverable error
    Failed,
    /// Terminal: user-initiated cancel
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The statuses a runner may claim from when an envelope arrives.
    pub const CLAIMABLE: [JobStatus; 3] = [Self::Created, Self::Queued, Self::Processing];

    /// The non-terminal statuses, for bulk operations like cancel.
    pub const OPEN: [JobStatus; 5] = [
        Self::Created,
        Self::Queued,
        Self::Processing,
        Self::Running,
        Self::Finalizing,
    ];

    /// Whether moving to `next` is a legal transition.
    ///
    /// Forward motion follows the lifecycle order; the one sanctioned
    /// re-entry is `processing -> created` performed by crash recovery.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (Self::Processing, Self::Created) => true,
            _ => Self::rank(next) > Self::rank(*self) || next.is_terminal(),
        }
    }

    fn rank(status: JobStatus) -> u8 {
        match status {
            Self::Created => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Running => 3,
            Self::Finalizing => 4,
            Self::Completed | Self::Failed | Self::Cancelled => 5,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "running" => Ok(Self::Running),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Per-execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Row created, unit not yet dispatched
    Pending,
    /// Provider call in flight
    Running,
    /// Provider returned successfully
    Completed,
    /// Provider error, timeout, or no healthy provider
    Failed,
    /// Job context cancelled while the unit was open
    Cancelled,
    /// Auto-stop found an existing row for the unit
    DuplicateSkipped,
    /// Awaiting a retry attempt
    Retrying,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::DuplicateSkipped => "duplicate_skipped",
            Self::Retrying => "retrying",
        }
    }

    /// Terminal execution statuses must carry a `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::DuplicateSkipped
        )
    }

    /// Statuses that block a re-attempt of the same unit.
    ///
    /// A `failed` row invites a retry and a `cancelled` row may be healed by
    /// crash recovery, so neither blocks; a pending, running, or completed
    /// row means the unit is owned or already answered.
    pub const BLOCKING: [ExecutionStatus; 3] = [Self::Pending, Self::Running, Self::Completed];

    pub fn is_blocking(&self) -> bool {
        Self::BLOCKING.contains(self)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "duplicate_skipped" => Ok(Self::DuplicateSkipped),
            "retrying" => Ok(Self::Retrying),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
