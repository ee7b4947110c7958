//! Processing of a single queue job.

use crate::handlers::HandlerRegistry;
use crate::queue::{DeadLetterSink, FailureOutcome, Job, JobQueue, LEASE_EXPIRED, QueueError};
use crate::store::{EventStore, StoreError};
use crate::utils::Clock;
use kanau::processor::Processor;
use loopin_sdk::objects::DeadLetterPayload;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The event no longer exists; the job was dropped.
    Dropped,
    /// The event was already processed; nothing ran.
    AlreadyProcessed,
    Processed,
    /// The handler failed and the job was rescheduled.
    Retrying { attempts_made: u32, delay: Duration },
    /// The handler failed for the last time, or earlier holders let the
    /// lease expire until the budget ran out. `recorded` is false when the
    /// dead-letter write itself failed.
    DeadLettered { attempts_made: u32, recorded: bool },
    /// The lease expired mid-run and another worker now holds the job.
    Superseded,
}

/// Runs one job: load the event, call its handler, record the outcome.
pub struct JobRunner {
    events: Arc<dyn EventStore>,
    handlers: HandlerRegistry,
    queue: Arc<dyn JobQueue>,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    pub fn new(
        events: Arc<dyn EventStore>,
        handlers: HandlerRegistry,
        queue: Arc<dyn JobQueue>,
        dead_letters: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            handlers,
            queue,
            dead_letters,
            clock,
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// `Ok(false)` when the queue no longer recognises our lease.
    fn still_held(job: &Job, result: Result<(), QueueError>) -> Result<bool, WorkerError> {
        match result {
            Ok(()) => Ok(true),
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.id, "Lease lost, leaving the job to its new holder");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dead_letter(&self, job: &Job, attempts_made: u32, reason: String) -> bool {
        let record = DeadLetterPayload {
            original_queue: self.queue.name().to_string(),
            event_id: job.event_id,
            job_id: job.id.clone(),
            attempts_made,
            failed_reason: reason,
            timestamp: self.clock.now(),
        };
        match self.dead_letters.write(record).await {
            Ok(()) => {
                warn!(
                    event_id = %job.event_id,
                    job_id = %job.id,
                    attempts_made,
                    dead_letter_queue = self.dead_letters.name(),
                    "Job exhausted retries, dead-lettered"
                );
                true
            }
            Err(e) => {
                error!(
                    event_id = %job.event_id,
                    job_id = %job.id,
                    attempts_made,
                    error = %e,
                    "Failed to write dead-letter record"
                );
                false
            }
        }
    }
}

impl Processor<Job> for JobRunner {
    type Output = JobOutcome;
    type Error = WorkerError;
    #[tracing::instrument(skip_all, err, fields(job_id = %job.id))]
    async fn process(&self, job: Job) -> Result<JobOutcome, WorkerError> {
        let Some(event) = self.events.get(job.event_id).await? else {
            warn!(event_id = %job.event_id, "Event not found, dropping job");
            if !Self::still_held(&job, self.queue.complete(&job).await)? {
                return Ok(JobOutcome::Superseded);
            }
            return Ok(JobOutcome::Dropped);
        };

        if event.processed {
            if !Self::still_held(&job, self.queue.complete(&job).await)? {
                return Ok(JobOutcome::Superseded);
            }
            return Ok(JobOutcome::AlreadyProcessed);
        }

        if job.is_exhausted() {
            self.events.mark_failed(event.id, LEASE_EXPIRED).await?;
            if !Self::still_held(&job, self.queue.give_up(&job, LEASE_EXPIRED).await)? {
                return Ok(JobOutcome::Superseded);
            }
            let recorded = self
                .dead_letter(&job, job.attempts_made, LEASE_EXPIRED.to_string())
                .await;
            return Ok(JobOutcome::DeadLettered {
                attempts_made: job.attempts_made,
                recorded,
            });
        }

        let reason = match self.handlers.dispatch(&event).await {
            Ok(()) => {
                self.events.mark_processed(event.id).await?;
                info!(event_id = %event.id, event_type = %event.sdk_event_type(), "Event processed");
                if !Self::still_held(&job, self.queue.complete(&job).await)? {
                    return Ok(JobOutcome::Superseded);
                }
                return Ok(JobOutcome::Processed);
            }
            Err(e) => e.to_string(),
        };

        self.events.mark_failed(event.id, &reason).await?;
        let outcome = match self.queue.fail(&job, &reason).await {
            Ok(outcome) => outcome,
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.id, "Lease lost, leaving the job to its new holder");
                return Ok(JobOutcome::Superseded);
            }
            Err(e) => return Err(e.into()),
        };
        match outcome {
            FailureOutcome::Retrying {
                attempts_made,
                delay,
            } => {
                warn!(
                    event_id = %event.id,
                    attempts_made,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Handler failed, retrying"
                );
                Ok(JobOutcome::Retrying {
                    attempts_made,
                    delay,
                })
            }
            FailureOutcome::Exhausted { attempts_made } => {
                let recorded = self.dead_letter(&job, attempts_made, reason).await;
                Ok(JobOutcome::DeadLettered {
                    attempts_made,
                    recorded,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::WebhookEventType;
    use crate::entities::dead_letter::DeadLetterRecord;
    use crate::entities::webhook_event::NewWebhookEvent;
    use crate::handlers::testing::ScriptedHandler;
    use crate::queue::{MemoryDeadLetterSink, MemoryJobQueue, RetryPolicy};
    use crate::store::{InsertOutcome, MemoryEventStore};
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use loopin_sdk::objects::{EventType, QueueJobPayload};
    use serde_json::json;
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct Fixture {
        clock: Arc<ManualClock>,
        events: Arc<MemoryEventStore>,
        queue: Arc<MemoryJobQueue>,
        dead_letters: Arc<MemoryDeadLetterSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
            Self {
                events: Arc::new(MemoryEventStore::new(clock.clone())),
                queue: Arc::new(MemoryJobQueue::with_clock(
                    "webhook-events",
                    RetryPolicy::default(),
                    Duration::from_secs(300),
                    clock.clone(),
                )),
                dead_letters: Arc::new(MemoryDeadLetterSink::new("webhook-events-dlq")),
                clock,
            }
        }

        fn runner(&self, handler: Arc<ScriptedHandler>) -> JobRunner {
            self.runner_with_sink(handler, self.dead_letters.clone())
        }

        fn runner_with_sink(
            &self,
            handler: Arc<ScriptedHandler>,
            sink: Arc<dyn DeadLetterSink>,
        ) -> JobRunner {
            JobRunner::new(
                self.events.clone(),
                HandlerRegistry::new().register(EventType::Comments, handler),
                self.queue.clone(),
                sink,
                self.clock.clone(),
            )
        }

        async fn enqueued_event(&self) -> Uuid {
            let InsertOutcome::Inserted(event) = self
                .events
                .insert_if_absent(NewWebhookEvent {
                    event_type: WebhookEventType::Comments,
                    account_id: Uuid::nil(),
                    subject_id: "acct".to_string(),
                    source_user_id: None,
                    event_hash: Uuid::new_v4().to_string(),
                    payload: json!({"field": "comments", "value": {"id": "c1"}}),
                })
                .await
                .unwrap()
            else {
                panic!("expected insert");
            };
            self.queue
                .enqueue(QueueJobPayload { event_id: event.id })
                .await
                .unwrap();
            event.id
        }

        /// Claim and run every due job, then advance past the longest backoff.
        async fn drain(&self, runner: &JobRunner) -> Vec<JobOutcome> {
            let mut outcomes = Vec::new();
            for _ in 0..10 {
                for job in self.queue.claim(10).await.unwrap() {
                    outcomes.push(runner.process(job).await.unwrap());
                }
                self.clock.advance(time::Duration::minutes(5));
            }
            outcomes
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl DeadLetterSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn write(&self, _: DeadLetterPayload) -> Result<(), QueueError> {
            Err(QueueError::UnknownJob("sink offline".to_string()))
        }

        async fn list(&self, _: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
            Ok(Vec::new())
        }

        async fn get(&self, _: Uuid) -> Result<Option<DeadLetterRecord>, QueueError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn success_marks_event_processed_and_completes_job() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        let runner = fixture.runner(ScriptedHandler::succeeding());

        assert_eq!(fixture.drain(&runner).await, vec![JobOutcome::Processed]);
        let event = fixture.events.get(event_id).await.unwrap().unwrap();
        assert!(event.processed);
        assert_eq!(event.error, None);
        assert!(fixture.queue.is_completed(&event_id.to_string()));
    }

    #[tokio::test]
    async fn always_failing_handler_runs_three_times_then_dead_letters_once() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        let handler = ScriptedHandler::always_failing();
        let runner = fixture.runner(handler.clone());

        let outcomes = fixture.drain(&runner).await;
        assert_eq!(handler.calls(), 3);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes[2],
            JobOutcome::DeadLettered {
                attempts_made: 3,
                recorded: true
            }
        );

        let records = fixture.dead_letters.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, event_id);
        assert_eq!(records[0].job_id, event_id.to_string());
        assert_eq!(records[0].original_queue, "webhook-events");
        assert_eq!(records[0].attempts_made, 3);
        assert_eq!(records[0].failed_reason, "scripted failure #3");

        let event = fixture.events.get(event_id).await.unwrap().unwrap();
        assert!(!event.processed);
        assert_eq!(event.error.as_deref(), Some("scripted failure #3"));
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        let runner = fixture.runner(ScriptedHandler::failing(1));

        let outcomes = fixture.drain(&runner).await;
        assert!(matches!(outcomes[0], JobOutcome::Retrying { attempts_made: 1, .. }));
        assert_eq!(outcomes[1], JobOutcome::Processed);
        let event = fixture.events.get(event_id).await.unwrap().unwrap();
        assert!(event.processed);
        assert_eq!(event.error, None);
        assert!(fixture.dead_letters.records().is_empty());
    }

    #[tokio::test]
    async fn processed_event_is_not_handled_twice() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        fixture.events.mark_processed(event_id).await.unwrap();
        let handler = ScriptedHandler::succeeding();
        let runner = fixture.runner(handler.clone());

        assert_eq!(fixture.drain(&runner).await, vec![JobOutcome::AlreadyProcessed]);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn missing_event_drops_the_job() {
        let fixture = Fixture::new();
        fixture
            .queue
            .enqueue(QueueJobPayload {
                event_id: Uuid::now_v7(),
            })
            .await
            .unwrap();
        let runner = fixture.runner(ScriptedHandler::succeeding());
        assert_eq!(fixture.drain(&runner).await, vec![JobOutcome::Dropped]);
    }

    #[tokio::test]
    async fn job_whose_holders_keep_stalling_is_dead_lettered() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        let handler = ScriptedHandler::succeeding();
        let runner = fixture.runner(handler.clone());

        // three workers die in turn without reporting back
        fixture.queue.claim(1).await.unwrap();
        let mut job = None;
        for _ in 0..3 {
            fixture.clock.advance(time::Duration::seconds(301));
            job = fixture.queue.claim(1).await.unwrap().pop();
        }
        let job = job.unwrap();
        assert_eq!(job.attempts_made, 3);

        assert_eq!(
            runner.process(job).await.unwrap(),
            JobOutcome::DeadLettered {
                attempts_made: 3,
                recorded: true
            }
        );
        assert_eq!(handler.calls(), 0);
        assert!(fixture.queue.is_failed(&event_id.to_string()));
        let records = fixture.dead_letters.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failed_reason, LEASE_EXPIRED);
        let event = fixture.events.get(event_id).await.unwrap().unwrap();
        assert!(!event.processed);
        assert_eq!(event.error.as_deref(), Some(LEASE_EXPIRED));
    }

    #[tokio::test]
    async fn stale_worker_yields_to_the_new_holder() {
        let fixture = Fixture::new();
        let event_id = fixture.enqueued_event().await;
        let runner = fixture.runner(ScriptedHandler::always_failing());

        let stale = fixture.queue.claim(1).await.unwrap().remove(0);
        fixture.clock.advance(time::Duration::seconds(301));
        let current = fixture.queue.claim(1).await.unwrap().remove(0);

        assert_eq!(runner.process(stale).await.unwrap(), JobOutcome::Superseded);
        assert_eq!(fixture.queue.attempts_made(&event_id.to_string()), Some(1));
        assert!(fixture.dead_letters.records().is_empty());

        assert!(matches!(
            runner.process(current).await.unwrap(),
            JobOutcome::Retrying { attempts_made: 2, .. }
        ));
    }

    #[tokio::test]
    async fn dead_letter_write_failure_is_not_fatal() {
        let fixture = Fixture::new();
        fixture.enqueued_event().await;
        let runner = fixture.runner_with_sink(ScriptedHandler::always_failing(), Arc::new(BrokenSink));

        let outcomes = fixture.drain(&runner).await;
        assert_eq!(
            outcomes.last(),
            Some(&JobOutcome::DeadLettered {
                attempts_made: 3,
                recorded: false
            })
        );
    }
}
