//! The event store and the subject directory.
//!
//! The event store is the durable, idempotent record of every inbound
//! change. Its one atomic primitive is insert-if-absent on the event hash;
//! everything else is plain reads and single-row updates.

mod memory;
mod postgres;

pub use memory::{MemoryEventStore, MemorySubjectDirectory};
pub use postgres::{PgEventStore, PgSubjectDirectory};

use crate::entities::account::PlatformAccount;
use crate::entities::webhook_event::{NewWebhookEvent, WebhookEvent};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(WebhookEvent),
    /// An event with the same hash is already stored. Not an error.
    Duplicate,
}

/// Filter for operator listings.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub processed: Option<bool>,
    pub account_id: Option<Uuid>,
    pub limit: usize,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_if_absent(&self, event: NewWebhookEvent) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError>;

    /// `processed = true`, `processed_at = now`, error cleared.
    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failure message; the event stays unprocessed.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Clear a recorded failure before a replay.
    async fn clear_error(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>, StoreError>;

    /// Unprocessed, error-free events created before `older_than`, oldest first.
    async fn stale_pending(
        &self,
        older_than: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, StoreError>;
}

/// Resolves platform identifiers to internal accounts.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Return the connected account named by any of `platform_ids`.
    async fn resolve(&self, platform_ids: &[&str]) -> Result<Option<PlatformAccount>, StoreError>;
}

pub(crate) fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
