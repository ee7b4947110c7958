//! Durable job queue and dead-letter sink.
//!
//! A job is keyed by the webhook event id, which makes enqueue idempotent:
//! a second enqueue of an event that is waiting, running or done is a
//! no-op. Failed attempts are rescheduled with exponential backoff until
//! the attempt ceiling is reached.

mod memory;
mod postgres;

pub use memory::{MemoryDeadLetterSink, MemoryJobQueue};
pub use postgres::{PgDeadLetterSink, PgJobQueue};

use crate::entities::dead_letter::DeadLetterRecord;
use async_trait::async_trait;
use loopin_sdk::objects::{DeadLetterPayload, QueueJobPayload};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {0} has a malformed id")]
    MalformedJobId(String),
    #[error("job {0} is not known to the queue")]
    UnknownJob(String),
    #[error("lease on job {0} is no longer held")]
    LeaseLost(String),
}

/// Attempt ceiling plus exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempts_made` failures.
    ///
    /// `base * 2^(attempts_made - 1)`: the first retry waits `base`.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// What happens to a job that just failed its `attempts_made`-th attempt.
    pub fn after_failure(&self, attempts_made: u32) -> FailureOutcome {
        if attempts_made >= self.max_attempts {
            FailureOutcome::Exhausted { attempts_made }
        } else {
            FailureOutcome::Retrying {
                attempts_made,
                delay: self.backoff(attempts_made),
            }
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub event_id: Uuid,
    /// Failed attempts so far, not counting the one about to run. A lease
    /// that expired under a previous holder counts as a failed attempt.
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Fresh per claim. Updates carrying a stale token are rejected with
    /// [`QueueError::LeaseLost`].
    pub lease_token: Uuid,
}

impl Job {
    pub fn payload(&self) -> QueueJobPayload {
        QueueJobPayload {
            event_id: self.event_id,
        }
    }

    /// The attempt budget was spent by holders that never reported back.
    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Failure reason recorded when a lease runs out under its holder.
pub const LEASE_EXPIRED: &str = "job lease expired before the worker finished";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id is already queued, running or done.
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Rescheduled after `delay`.
    Retrying { attempts_made: u32, delay: Duration },
    /// Attempt ceiling reached; the job is parked as failed.
    Exhausted { attempts_made: u32 },
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, payload: QueueJobPayload) -> Result<EnqueueOutcome, QueueError>;

    /// How long a claim or renewal keeps a job away from other workers.
    fn lease(&self) -> Duration;

    /// Lease up to `limit` runnable jobs.
    async fn claim(&self, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Push the lease of a running job another [`JobQueue::lease`] ahead.
    async fn extend_lease(&self, job: &Job) -> Result<(), QueueError>;

    async fn complete(&self, job: &Job) -> Result<(), QueueError>;

    /// Record a failed attempt and apply the retry policy.
    async fn fail(&self, job: &Job, reason: &str) -> Result<FailureOutcome, QueueError>;

    /// Park a job as failed without counting another attempt.
    async fn give_up(&self, job: &Job, reason: &str) -> Result<(), QueueError>;
}

/// Permanent store for jobs that exhausted their retries. Records are
/// never removed; operators read them back for inspection and replay.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, record: DeadLetterPayload) -> Result<(), QueueError>;

    /// Newest first.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(u64::MAX / 2),
        };
        assert_eq!(policy.backoff(40), Duration::MAX);
    }

    #[test]
    fn third_failure_exhausts_default_policy() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.after_failure(1),
            FailureOutcome::Retrying { attempts_made: 1, .. }
        ));
        assert!(matches!(
            policy.after_failure(2),
            FailureOutcome::Retrying { attempts_made: 2, .. }
        ));
        assert_eq!(
            policy.after_failure(3),
            FailureOutcome::Exhausted { attempts_made: 3 }
        );
    }
}
