//! Built-in scheduled tasks.

use super::dispatcher::Dispatcher;
use super::scheduler::{ScheduleError, ScheduledTask};
use crate::lock::LockStore;
use crate::rate_guard::RateCounterStore;
use crate::store::EventStore;
use crate::utils::Clock;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Re-dispatches events that were stored but never picked up.
///
/// An event that is unprocessed, has no recorded error and is older than
/// the grace period most likely lost its job between the insert and the
/// enqueue. Enqueue is idempotent, so events whose job does exist are left
/// alone.
pub struct PendingSweep {
    events: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    batch: usize,
}

impl PendingSweep {
    pub const NAME: &'static str = "pending-sweep";

    pub fn new(
        events: Arc<dyn EventStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        grace: Duration,
    ) -> Self {
        Self {
            events,
            dispatcher,
            clock,
            grace,
            batch: 500,
        }
    }
}

#[async_trait]
impl ScheduledTask for PendingSweep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self) -> Result<(), ScheduleError> {
        let cutoff = self.clock.now() - self.grace;
        let stale = self
            .events
            .stale_pending(cutoff, self.batch)
            .await
            .map_err(|e| ScheduleError::Task(e.to_string()))?;
        let mut redispatched = 0usize;
        for event in &stale {
            match self.dispatcher.dispatch(event).await {
                Ok(_) => redispatched += 1,
                Err(e) => warn!(event_id = %event.id, error = %e, "Re-dispatch failed"),
            }
        }
        if !stale.is_empty() {
            info!(found = stale.len(), redispatched, "Pending sweep finished");
        }
        Ok(())
    }
}

/// Deletes expired lock rows and rate windows from the shared store.
pub struct StorePrune {
    locks: Arc<dyn LockStore>,
    rate_windows: Arc<dyn RateCounterStore>,
}

impl StorePrune {
    pub const NAME: &'static str = "store-prune";

    pub fn new(locks: Arc<dyn LockStore>, rate_windows: Arc<dyn RateCounterStore>) -> Self {
        Self {
            locks,
            rate_windows,
        }
    }
}

#[async_trait]
impl ScheduledTask for StorePrune {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self) -> Result<(), ScheduleError> {
        let locks = self.locks.prune_expired().await?;
        let windows = self
            .rate_windows
            .prune_expired()
            .await
            .map_err(|e| ScheduleError::Task(e.to_string()))?;
        info!(locks, windows, "Pruned expired store entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;
    use crate::entities::WebhookEventType;
    use crate::entities::webhook_event::NewWebhookEvent;
    use crate::handlers::HandlerRegistry;
    use crate::lock::MemoryLockStore;
    use crate::queue::{JobQueue, MemoryJobQueue, RetryPolicy};
    use crate::rate_guard::{LocalRateWindows, RateKind, WindowKey};
    use crate::store::{InsertOutcome, MemoryEventStore};
    use crate::utils::ManualClock;
    use serde_json::json;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_enqueues_only_old_error_free_events() {
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let events = Arc::new(MemoryEventStore::new(clock.clone()));
        let queue = Arc::new(MemoryJobQueue::with_clock(
            "webhook-events",
            RetryPolicy::default(),
            Duration::from_secs(60),
            clock.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            ProcessingMode::Queue,
            queue.clone(),
            events.clone(),
            HandlerRegistry::new(),
        ));

        let mut ids = Vec::new();
        for hash in ["lost", "failed"] {
            let InsertOutcome::Inserted(event) = events
                .insert_if_absent(NewWebhookEvent {
                    event_type: WebhookEventType::Comments,
                    account_id: Uuid::nil(),
                    subject_id: "acct".to_string(),
                    source_user_id: None,
                    event_hash: hash.to_string(),
                    payload: json!({"field": "comments", "value": {"id": hash}}),
                })
                .await
                .unwrap()
            else {
                panic!("expected insert");
            };
            ids.push(event.id);
        }
        events.mark_failed(ids[1], "boom").await.unwrap();

        let sweep = PendingSweep::new(
            events.clone(),
            dispatcher,
            clock.clone(),
            Duration::from_secs(120),
        );
        sweep.run().await.unwrap();
        assert!(queue.is_empty());

        clock.advance(time::Duration::minutes(3));
        sweep.run().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.claim(10).await.unwrap()[0].event_id, ids[0]);

        sweep.run().await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_expired_entries() {
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let locks = Arc::new(MemoryLockStore::new(clock.clone()));
        let windows = Arc::new(LocalRateWindows::new(clock.clone()));
        locks
            .acquire("lock:jobs:x", "t", Duration::from_secs(1))
            .await
            .unwrap();
        windows
            .increment(
                &WindowKey::at(RateKind::Reply, "acct", clock.now()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        clock.advance(time::Duration::seconds(2));
        StorePrune::new(locks.clone(), windows.clone())
            .run()
            .await
            .unwrap();
        assert!(windows.is_empty());
        assert!(locks.acquire("lock:jobs:x", "u", Duration::from_secs(1)).await.unwrap());
    }
}
