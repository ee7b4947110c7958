//! In-process queue backends for tests and single-instance runs.

use super::{
    DeadLetterSink, EnqueueOutcome, FailureOutcome, Job, JobQueue, LEASE_EXPIRED, QueueError,
    RetryPolicy,
};
use crate::entities::dead_letter::DeadLetterRecord;
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use loopin_sdk::objects::{DeadLetterPayload, QueueJobPayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Active {
        lease_until: OffsetDateTime,
        token: Uuid,
    },
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    state: State,
    run_at: OffsetDateTime,
    last_error: Option<String>,
    seq: u64,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

pub struct MemoryJobQueue {
    name: String,
    retry: RetryPolicy,
    lease: Duration,
    jobs: Mutex<Jobs>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobQueue {
    pub fn new(name: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_clock(name, retry, Duration::from_secs(300), Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        retry: RetryPolicy,
        lease: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            retry,
            lease,
            jobs: Mutex::new(Jobs::default()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of jobs ever enqueued under distinct ids.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Failed attempts recorded for `id`, if the job exists.
    pub fn attempts_made(&self, id: &str) -> Option<u32> {
        self.lock().entries.get(id).map(|e| e.job.attempts_made)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.lock()
            .entries
            .get(id)
            .is_some_and(|e| e.state == State::Completed)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.lock()
            .entries
            .get(id)
            .is_some_and(|e| e.state == State::Failed)
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.lock().entries.get(id).and_then(|e| e.last_error.clone())
    }

    /// Run `update` on the entry only while `job` still holds its lease.
    fn with_lease<T>(
        &self,
        job: &Job,
        update: impl FnOnce(&mut Entry) -> T,
    ) -> Result<T, QueueError> {
        let mut jobs = self.lock();
        let entry = jobs
            .entries
            .get_mut(&job.id)
            .ok_or_else(|| QueueError::UnknownJob(job.id.clone()))?;
        match entry.state {
            State::Active { token, .. } if token == job.lease_token => Ok(update(entry)),
            _ => Err(QueueError::LeaseLost(job.id.clone())),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: QueueJobPayload) -> Result<EnqueueOutcome, QueueError> {
        let id = payload.event_id.to_string();
        let now = self.clock.now();
        let mut jobs = self.lock();
        jobs.next_seq += 1;
        let seq = jobs.next_seq;
        let fresh = Entry {
            job: Job {
                id: id.clone(),
                event_id: payload.event_id,
                attempts_made: 0,
                max_attempts: self.retry.max_attempts,
                lease_token: Uuid::nil(),
            },
            state: State::Waiting,
            run_at: now,
            last_error: None,
            seq,
        };
        match jobs.entries.get_mut(&id) {
            Some(entry) if entry.state == State::Failed => {
                *entry = fresh;
                Ok(EnqueueOutcome::Enqueued)
            }
            Some(_) => Ok(EnqueueOutcome::AlreadyQueued),
            None => {
                jobs.entries.insert(id, fresh);
                Ok(EnqueueOutcome::Enqueued)
            }
        }
    }

    fn lease(&self) -> Duration {
        self.lease
    }

    async fn claim(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let now = self.clock.now();
        let lease_until = now + self.lease;
        let token = Uuid::new_v4();
        let mut jobs = self.lock();
        let mut runnable: Vec<&mut Entry> = jobs
            .entries
            .values_mut()
            .filter(|e| match e.state {
                State::Waiting => e.run_at <= now,
                State::Active {
                    lease_until: held_until,
                    ..
                } => held_until <= now,
                State::Completed | State::Failed => false,
            })
            .collect();
        runnable.sort_by_key(|e| (e.run_at, e.seq));
        Ok(runnable
            .into_iter()
            .take(limit)
            .map(|entry| {
                if matches!(entry.state, State::Active { .. }) {
                    entry.job.attempts_made = entry.job.attempts_made.saturating_add(1);
                    entry.last_error = Some(LEASE_EXPIRED.to_string());
                }
                entry.state = State::Active { lease_until, token };
                entry.job.lease_token = token;
                entry.job.clone()
            })
            .collect())
    }

    async fn extend_lease(&self, job: &Job) -> Result<(), QueueError> {
        let lease_until = self.clock.now() + self.lease;
        self.with_lease(job, |entry| {
            entry.state = State::Active {
                lease_until,
                token: job.lease_token,
            };
        })
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        self.with_lease(job, |entry| {
            entry.state = State::Completed;
            entry.last_error = None;
        })
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<FailureOutcome, QueueError> {
        let now = self.clock.now();
        let retry = self.retry;
        self.with_lease(job, |entry| {
            let policy = RetryPolicy {
                max_attempts: entry.job.max_attempts,
                ..retry
            };
            entry.job.attempts_made = job.attempts_made.saturating_add(1);
            entry.last_error = Some(reason.to_string());
            let outcome = policy.after_failure(entry.job.attempts_made);
            match outcome {
                FailureOutcome::Retrying { delay, .. } => {
                    entry.state = State::Waiting;
                    entry.run_at = now + delay;
                }
                FailureOutcome::Exhausted { .. } => entry.state = State::Failed,
            }
            outcome
        })
    }

    async fn give_up(&self, job: &Job, reason: &str) -> Result<(), QueueError> {
        self.with_lease(job, |entry| {
            entry.state = State::Failed;
            entry.last_error = Some(reason.to_string());
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    name: String,
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Written payloads, oldest first.
    pub fn records(&self) -> Vec<DeadLetterPayload> {
        self.lock().iter().map(DeadLetterRecord::payload).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeadLetterRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: DeadLetterPayload) -> Result<(), QueueError> {
        let record = DeadLetterRecord {
            id: Uuid::now_v7(),
            queue_name: self.name.clone(),
            original_queue: record.original_queue,
            event_id: record.event_id,
            job_id: record.job_id,
            attempts_made: i32::try_from(record.attempts_made).unwrap_or(i32::MAX),
            failed_reason: record.failed_reason,
            failed_at: record.timestamp,
        };
        self.lock().push(record);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        Ok(self.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, QueueError> {
        Ok(self.lock().iter().find(|r| r.id == id).cloned())
    }
}
