use super::{EventFilter, EventStore, InsertOutcome, StoreError, SubjectDirectory, limit_to_i64};
use crate::entities::account::{FindAccountByPlatformIds, PlatformAccount};
use crate::entities::webhook_event::{
    ClearWebhookEventError, GetWebhookEventById, InsertWebhookEventIfAbsent, ListStalePendingEvents,
    ListWebhookEvents, MarkWebhookEventFailed, MarkWebhookEventProcessed, NewWebhookEvent,
    WebhookEvent,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// Event store over the `webhook_events` table.
#[derive(Clone)]
pub struct PgEventStore {
    db: DatabaseProcessor,
}

impl PgEventStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_if_absent(&self, event: NewWebhookEvent) -> Result<InsertOutcome, StoreError> {
        let inserted = self
            .db
            .process(InsertWebhookEventIfAbsent { event })
            .await?;
        Ok(match inserted {
            Some(event) => InsertOutcome::Inserted(event),
            None => InsertOutcome::Duplicate,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.db.process(GetWebhookEventById { id }).await?)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        Ok(self.db.process(MarkWebhookEventProcessed { id }).await?)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(MarkWebhookEventFailed {
                id,
                error: error.to_string(),
            })
            .await?)
    }

    async fn clear_error(&self, id: Uuid) -> Result<(), StoreError> {
        Ok(self.db.process(ClearWebhookEventError { id }).await?)
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>, StoreError> {
        Ok(self
            .db
            .process(ListWebhookEvents {
                processed: filter.processed,
                account_id: filter.account_id,
                limit: limit_to_i64(filter.limit),
            })
            .await?)
    }

    async fn stale_pending(
        &self,
        older_than: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        Ok(self
            .db
            .process(ListStalePendingEvents {
                older_than,
                limit: limit_to_i64(limit),
            })
            .await?)
    }
}

/// Subject lookup over the `platform_accounts` table.
#[derive(Clone)]
pub struct PgSubjectDirectory {
    db: DatabaseProcessor,
}

impl PgSubjectDirectory {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubjectDirectory for PgSubjectDirectory {
    async fn resolve(&self, platform_ids: &[&str]) -> Result<Option<PlatformAccount>, StoreError> {
        let platform_ids = platform_ids.iter().map(|id| id.to_string()).collect();
        Ok(self
            .db
            .process(FindAccountByPlatformIds { platform_ids })
            .await?)
    }
}
