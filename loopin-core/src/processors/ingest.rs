//! Turns a verified delivery into stored, dispatched events.
//!
//! Each change is handled on its own: an unknown field, an unresolvable
//! subject, a duplicate or even a store failure affects only that change,
//! never its siblings in the same delivery.

use super::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
use crate::entities::webhook_event::NewWebhookEvent;
use crate::store::{EventStore, InsertOutcome, StoreError, SubjectDirectory};
use crate::utils::event_hash;
use loopin_sdk::objects::{Change, ChangeValue, DeliveryEntry, EventType, WebhookDelivery};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// What happened to one change of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Stored {
        event_id: Uuid,
        dispatch: DispatchOutcome,
    },
    /// Stored, but handing it to the dispatcher failed. The pending sweep
    /// picks it up later.
    StoredNotDispatched { event_id: Uuid },
    /// Same `(account, field, value)` already stored.
    Duplicate,
    UnknownSubject,
    /// A field the pipeline does not subscribe to.
    UnsupportedField,
    /// The value does not have the shape its field requires.
    InvalidValue,
    /// The store could not be reached.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub outcomes: Vec<ChangeOutcome>,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    ChangeOutcome::Stored { .. } | ChangeOutcome::StoredNotDispatched { .. }
                )
            })
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.count(&ChangeOutcome::Duplicate)
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.stored() - self.duplicates()
    }

    fn count(&self, outcome: &ChangeOutcome) -> usize {
        self.outcomes.iter().filter(|o| *o == outcome).count()
    }
}

pub struct IngestPipeline {
    subjects: Arc<dyn SubjectDirectory>,
    events: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
}

impl IngestPipeline {
    pub fn new(
        subjects: Arc<dyn SubjectDirectory>,
        events: Arc<dyn EventStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            subjects,
            events,
            dispatcher,
        }
    }

    pub async fn ingest(&self, delivery: &WebhookDelivery) -> IngestReport {
        let mut report = IngestReport::default();
        for entry in &delivery.entry {
            for change in &entry.changes {
                let outcome = match self.ingest_change(entry, change).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(entry_id = %entry.id, field = %change.field, error = %e, "Failed to store change");
                        ChangeOutcome::Failed
                    }
                };
                report.outcomes.push(outcome);
            }
        }
        info!(
            changes = report.outcomes.len(),
            stored = report.stored(),
            duplicates = report.duplicates(),
            skipped = report.skipped(),
            "Delivery ingested"
        );
        report
    }

    async fn ingest_change(
        &self,
        entry: &DeliveryEntry,
        change: &Change,
    ) -> Result<ChangeOutcome, IngestError> {
        let Some(event_type) = EventType::from_field(&change.field) else {
            debug!(field = %change.field, "Ignoring unsupported field");
            return Ok(ChangeOutcome::UnsupportedField);
        };
        let typed = match ChangeValue::parse(event_type, &change.value) {
            Ok(typed) => typed,
            Err(e) => {
                warn!(entry_id = %entry.id, field = %change.field, error = %e, "Change value has the wrong shape");
                return Ok(ChangeOutcome::InvalidValue);
            }
        };

        let mut candidates = vec![entry.id.as_str()];
        candidates.extend(typed.subject_hints());
        let Some(account) = self.subjects.resolve(&candidates).await? else {
            warn!(entry_id = %entry.id, field = %change.field, "No connected account for change");
            return Ok(ChangeOutcome::UnknownSubject);
        };

        let new_event = NewWebhookEvent {
            event_type: event_type.into(),
            account_id: account.id,
            subject_id: account.platform_user_id.clone(),
            source_user_id: typed.source_user_id().map(str::to_string),
            event_hash: event_hash(account.id, &change.field, &change.value),
            payload: json!({ "field": change.field, "value": change.value }),
        };

        let event = match self.events.insert_if_absent(new_event).await? {
            InsertOutcome::Inserted(event) => event,
            InsertOutcome::Duplicate => {
                debug!(account_id = %account.id, field = %change.field, "Duplicate change skipped");
                return Ok(ChangeOutcome::Duplicate);
            }
        };

        match self.dispatcher.dispatch(&event).await {
            Ok(dispatch) => Ok(ChangeOutcome::Stored {
                event_id: event.id,
                dispatch,
            }),
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Stored event could not be dispatched");
                Ok(ChangeOutcome::StoredNotDispatched { event_id: event.id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;
    use crate::entities::account::PlatformAccount;
    use crate::handlers::HandlerRegistry;
    use crate::queue::{JobQueue, MemoryJobQueue, RetryPolicy};
    use crate::store::{MemoryEventStore, MemorySubjectDirectory};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Fixture {
        account: PlatformAccount,
        events: Arc<MemoryEventStore>,
        queue: Arc<MemoryJobQueue>,
        pipeline: IngestPipeline,
    }

    fn fixture() -> Fixture {
        let account = PlatformAccount {
            id: Uuid::now_v7(),
            platform_user_id: "17841400000000001".to_string(),
            platform_page_id: Some("page-1".to_string()),
        };
        let events = Arc::new(MemoryEventStore::default());
        let queue = Arc::new(MemoryJobQueue::new("webhook-events", RetryPolicy::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            ProcessingMode::Queue,
            queue.clone(),
            events.clone(),
            HandlerRegistry::new(),
        ));
        let pipeline = IngestPipeline::new(
            Arc::new(MemorySubjectDirectory::new(vec![account.clone()])),
            events.clone(),
            dispatcher,
        );
        Fixture {
            account,
            events,
            queue,
            pipeline,
        }
    }

    fn delivery(body: Value) -> WebhookDelivery {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn redelivery_with_reordered_keys_is_stored_once() {
        let fixture = fixture();
        let first = delivery(json!({"entry": [{
            "id": "17841400000000001",
            "changes": [{"field": "comments", "value": {"id": "c1", "text": "hi", "from": {"id": "u1", "username": "a"}}}]
        }]}));
        let second = delivery(json!({"entry": [{
            "id": "17841400000000001",
            "changes": [{"field": "comments", "value": {"from": {"username": "a", "id": "u1"}, "text": "hi", "id": "c1"}}]
        }]}));

        let report = fixture.pipeline.ingest(&first).await;
        assert_eq!(report.stored(), 1);
        let report = fixture.pipeline.ingest(&second).await;
        assert_eq!(report.outcomes, vec![ChangeOutcome::Duplicate]);

        let stored = fixture.events.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].account_id, fixture.account.id);
        assert_eq!(stored[0].source_user_id.as_deref(), Some("u1"));
        assert_eq!(fixture.queue.len(), 1);
    }

    #[tokio::test]
    async fn bad_siblings_do_not_block_good_changes() {
        let fixture = fixture();
        let body = delivery(json!({"entry": [
            {"id": "unknown-account", "changes": [{"field": "comments", "value": {"id": "c1"}}]},
            {"id": "17841400000000001", "changes": [
                {"field": "live_comments", "value": {"id": "c2"}},
                {"field": "comments", "value": {"text": "missing id"}},
                {"field": "mentions", "value": {"media_id": "m1"}}
            ]}
        ]}));

        let report = fixture.pipeline.ingest(&body).await;
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.outcomes[0], ChangeOutcome::UnknownSubject);
        assert_eq!(report.outcomes[1], ChangeOutcome::UnsupportedField);
        assert_eq!(report.outcomes[2], ChangeOutcome::InvalidValue);
        assert!(matches!(
            report.outcomes[3],
            ChangeOutcome::Stored {
                dispatch: DispatchOutcome::Enqueued,
                ..
            }
        ));
        assert_eq!(report.skipped(), 3);
    }

    #[tokio::test]
    async fn message_recipient_resolves_the_subject() {
        let fixture = fixture();
        let body = delivery(json!({"entry": [{
            "id": "some-other-id",
            "changes": [{"field": "messages", "value": {
                "sender": {"id": "u9"},
                "recipient": {"id": "page-1"},
                "message": {"text": "hello"}
            }}]
        }]}));

        let report = fixture.pipeline.ingest(&body).await;
        assert_eq!(report.stored(), 1);
        assert_eq!(
            fixture.events.snapshot()[0].subject_id,
            fixture.account.platform_user_id
        );
    }

    struct DownQueue;

    #[async_trait]
    impl JobQueue for DownQueue {
        fn name(&self) -> &str {
            "down"
        }

        async fn enqueue(
            &self,
            _: loopin_sdk::objects::QueueJobPayload,
        ) -> Result<crate::queue::EnqueueOutcome, crate::queue::QueueError> {
            Err(crate::queue::QueueError::UnknownJob("offline".to_string()))
        }

        fn lease(&self) -> std::time::Duration {
            std::time::Duration::from_secs(300)
        }

        async fn claim(&self, _: usize) -> Result<Vec<crate::queue::Job>, crate::queue::QueueError> {
            Ok(Vec::new())
        }

        async fn extend_lease(&self, _: &crate::queue::Job) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn complete(&self, _: &crate::queue::Job) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn fail(
            &self,
            _: &crate::queue::Job,
            _: &str,
        ) -> Result<crate::queue::FailureOutcome, crate::queue::QueueError> {
            Ok(crate::queue::FailureOutcome::Exhausted { attempts_made: 0 })
        }

        async fn give_up(&self, _: &crate::queue::Job, _: &str) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_the_stored_event() {
        let account = PlatformAccount {
            id: Uuid::now_v7(),
            platform_user_id: "acct".to_string(),
            platform_page_id: None,
        };
        let events = Arc::new(MemoryEventStore::default());
        let dispatcher = Arc::new(Dispatcher::new(
            ProcessingMode::Queue,
            Arc::new(DownQueue),
            events.clone(),
            HandlerRegistry::new(),
        ));
        let pipeline = IngestPipeline::new(
            Arc::new(MemorySubjectDirectory::new(vec![account])),
            events.clone(),
            dispatcher,
        );
        let body = delivery(json!({"entry": [{"id": "acct", "changes": [{"field": "comments", "value": {"id": "c"}}]}]}));

        let report = pipeline.ingest(&body).await;
        assert!(matches!(
            report.outcomes[0],
            ChangeOutcome::StoredNotDispatched { .. }
        ));
        assert_eq!(events.len(), 1);
    }
}
