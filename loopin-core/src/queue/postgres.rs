use super::{
    DeadLetterSink, EnqueueOutcome, FailureOutcome, Job, JobQueue, LEASE_EXPIRED, QueueError,
    RetryPolicy,
};
use crate::entities::JobStatus;
use crate::entities::dead_letter::{
    DeadLetterRecord, GetDeadLetterById, InsertDeadLetter, ListDeadLetters,
};
use crate::entities::queue_job::{
    ClaimJobs, CompleteJob, EnqueueJob, ExtendJobLease, QueueJobRow, RecordJobFailure,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use loopin_sdk::objects::{DeadLetterPayload, QueueJobPayload};
use std::time::Duration;
use uuid::Uuid;

/// Job queue over the `webhook_jobs` table.
#[derive(Clone)]
pub struct PgJobQueue {
    db: DatabaseProcessor,
    name: String,
    retry: RetryPolicy,
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(db: DatabaseProcessor, name: String, retry: RetryPolicy, lease: Duration) -> Self {
        Self {
            db,
            name,
            retry,
            lease,
        }
    }

    fn job_from_row(row: QueueJobRow, lease_token: Uuid) -> Result<Job, QueueError> {
        let event_id =
            Uuid::parse_str(&row.id).map_err(|_| QueueError::MalformedJobId(row.id.clone()))?;
        Ok(Job {
            id: row.id,
            event_id,
            attempts_made: u32::try_from(row.attempts_made).unwrap_or_default(),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or_default(),
            lease_token,
        })
    }

    async fn record_failure(
        &self,
        job: &Job,
        attempts_made: u32,
        status: JobStatus,
        run_at: time::OffsetDateTime,
        reason: &str,
    ) -> Result<(), QueueError> {
        let held = self
            .db
            .process(RecordJobFailure {
                queue_name: self.name.clone(),
                id: job.id.clone(),
                lease_token: job.lease_token,
                attempts_made: i32::try_from(attempts_made).unwrap_or(i32::MAX),
                status,
                run_at,
                error: reason.to_string(),
            })
            .await?;
        if held {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(job.id.clone()))
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: QueueJobPayload) -> Result<EnqueueOutcome, QueueError> {
        let created = self
            .db
            .process(EnqueueJob {
                queue_name: self.name.clone(),
                id: payload.event_id.to_string(),
                max_attempts: i32::try_from(self.retry.max_attempts).unwrap_or(i32::MAX),
                backoff_ms: i64::try_from(self.retry.base_delay.as_millis()).unwrap_or(i64::MAX),
            })
            .await?;
        Ok(if created {
            EnqueueOutcome::Enqueued
        } else {
            EnqueueOutcome::AlreadyQueued
        })
    }

    fn lease(&self) -> Duration {
        self.lease
    }

    async fn claim(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let lease_token = Uuid::new_v4();
        let rows = self
            .db
            .process(ClaimJobs {
                queue_name: self.name.clone(),
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
                lease_until: time::OffsetDateTime::now_utc() + self.lease,
                lease_token,
                expired_reason: LEASE_EXPIRED.to_string(),
            })
            .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::job_from_row(row, lease_token) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::error!(queue = %self.name, error = %e, "Skipping malformed job"),
            }
        }
        Ok(jobs)
    }

    async fn extend_lease(&self, job: &Job) -> Result<(), QueueError> {
        let held = self
            .db
            .process(ExtendJobLease {
                queue_name: self.name.clone(),
                id: job.id.clone(),
                lease_token: job.lease_token,
                lease_until: time::OffsetDateTime::now_utc() + self.lease,
            })
            .await?;
        if held {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(job.id.clone()))
        }
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let held = self
            .db
            .process(CompleteJob {
                queue_name: self.name.clone(),
                id: job.id.clone(),
                lease_token: job.lease_token,
            })
            .await?;
        if held {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(job.id.clone()))
        }
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<FailureOutcome, QueueError> {
        let policy = RetryPolicy {
            max_attempts: job.max_attempts,
            ..self.retry
        };
        let attempts_made = job.attempts_made.saturating_add(1);
        let outcome = policy.after_failure(attempts_made);
        let now = time::OffsetDateTime::now_utc();
        let (status, run_at) = match outcome {
            FailureOutcome::Retrying { delay, .. } => (JobStatus::Delayed, now + delay),
            FailureOutcome::Exhausted { .. } => (JobStatus::Failed, now),
        };
        self.record_failure(job, attempts_made, status, run_at, reason)
            .await?;
        Ok(outcome)
    }

    async fn give_up(&self, job: &Job, reason: &str) -> Result<(), QueueError> {
        let now = time::OffsetDateTime::now_utc();
        self.record_failure(job, job.attempts_made, JobStatus::Failed, now, reason)
            .await
    }
}

/// Dead-letter sink over the `dead_letters` table.
#[derive(Clone)]
pub struct PgDeadLetterSink {
    db: DatabaseProcessor,
    name: String,
}

impl PgDeadLetterSink {
    pub fn new(db: DatabaseProcessor, name: String) -> Self {
        Self { db, name }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: DeadLetterPayload) -> Result<(), QueueError> {
        self.db
            .process(InsertDeadLetter {
                queue_name: self.name.clone(),
                payload: record,
            })
            .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        Ok(self
            .db
            .process(ListDeadLetters {
                queue_name: self.name.clone(),
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, QueueError> {
        let record = self.db.process(GetDeadLetterById { id }).await?;
        Ok(record.filter(|r| r.queue_name == self.name))
    }
}
