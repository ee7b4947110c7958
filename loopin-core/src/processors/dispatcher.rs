//! Hands stored events to processing.

use crate::config::ProcessingMode;
use crate::entities::webhook_event::WebhookEvent;
use crate::handlers::HandlerRegistry;
use crate::queue::{EnqueueOutcome, JobQueue, QueueError};
use crate::store::{EventStore, StoreError};
use loopin_sdk::objects::QueueJobPayload;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A job keyed by the event id was queued.
    Enqueued,
    /// A job for this event already exists.
    AlreadyQueued,
    /// Inline mode: the handler succeeded.
    Processed,
    /// Inline mode: the handler failed. The message is stored on the event;
    /// there is no retry.
    Failed(String),
}

pub struct Dispatcher {
    mode: ProcessingMode,
    queue: Arc<dyn JobQueue>,
    events: Arc<dyn EventStore>,
    handlers: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(
        mode: ProcessingMode,
        queue: Arc<dyn JobQueue>,
        events: Arc<dyn EventStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            mode,
            queue,
            events,
            handlers,
        }
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchOutcome, DispatchError> {
        match self.mode {
            ProcessingMode::Queue => self.enqueue(event).await,
            ProcessingMode::Inline => self.run_inline(event).await,
        }
    }

    /// Always enqueue, whatever the configured mode. Used for replays.
    pub async fn enqueue(&self, event: &WebhookEvent) -> Result<DispatchOutcome, DispatchError> {
        let outcome = self
            .queue
            .enqueue(QueueJobPayload { event_id: event.id })
            .await?;
        Ok(match outcome {
            EnqueueOutcome::Enqueued => {
                debug!(event_id = %event.id, queue = self.queue.name(), "Event enqueued");
                DispatchOutcome::Enqueued
            }
            EnqueueOutcome::AlreadyQueued => {
                debug!(event_id = %event.id, "Event already queued");
                DispatchOutcome::AlreadyQueued
            }
        })
    }

    async fn run_inline(&self, event: &WebhookEvent) -> Result<DispatchOutcome, DispatchError> {
        match self.handlers.dispatch(event).await {
            Ok(()) => {
                self.events.mark_processed(event.id).await?;
                Ok(DispatchOutcome::Processed)
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Inline handler failed");
                let message = e.to_string();
                self.events.mark_failed(event.id, &message).await?;
                Ok(DispatchOutcome::Failed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::WebhookEventType;
    use crate::entities::webhook_event::NewWebhookEvent;
    use crate::handlers::testing::ScriptedHandler;
    use crate::queue::{MemoryJobQueue, RetryPolicy};
    use crate::store::{InsertOutcome, MemoryEventStore};
    use loopin_sdk::objects::EventType;
    use serde_json::json;
    use uuid::Uuid;

    async fn stored(events: &MemoryEventStore) -> WebhookEvent {
        let outcome = events
            .insert_if_absent(NewWebhookEvent {
                event_type: WebhookEventType::Comments,
                account_id: Uuid::nil(),
                subject_id: "acct".to_string(),
                source_user_id: None,
                event_hash: "h".to_string(),
                payload: json!({"field": "comments", "value": {"id": "c1"}}),
            })
            .await
            .unwrap();
        let InsertOutcome::Inserted(event) = outcome else {
            panic!("expected insert");
        };
        event
    }

    #[tokio::test]
    async fn queue_mode_enqueues_once_per_event() {
        let events = Arc::new(MemoryEventStore::default());
        let queue = Arc::new(MemoryJobQueue::new("webhook-events", RetryPolicy::default()));
        let handler = ScriptedHandler::succeeding();
        let dispatcher = Dispatcher::new(
            ProcessingMode::Queue,
            queue.clone(),
            events.clone(),
            HandlerRegistry::new().register(EventType::Comments, handler.clone()),
        );
        let event = stored(&events).await;

        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), DispatchOutcome::Enqueued);
        assert_eq!(
            dispatcher.dispatch(&event).await.unwrap(),
            DispatchOutcome::AlreadyQueued
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn inline_mode_writes_back_the_outcome() {
        let events = Arc::new(MemoryEventStore::default());
        let queue = Arc::new(MemoryJobQueue::new("webhook-events", RetryPolicy::default()));
        let handler = ScriptedHandler::failing(1);
        let dispatcher = Dispatcher::new(
            ProcessingMode::Inline,
            queue.clone(),
            events.clone(),
            HandlerRegistry::new().register(EventType::Comments, handler.clone()),
        );
        let event = stored(&events).await;

        let failed = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(failed, DispatchOutcome::Failed("scripted failure #1".to_string()));
        let row = events.get(event.id).await.unwrap().unwrap();
        assert!(!row.processed);
        assert_eq!(row.error.as_deref(), Some("scripted failure #1"));

        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), DispatchOutcome::Processed);
        let row = events.get(event.id).await.unwrap().unwrap();
        assert!(row.processed);
        assert_eq!(row.error, None);
        assert!(queue.is_empty());
    }
}
