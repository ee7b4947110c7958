//! In-process store backends.
//!
//! Correct within a single process only. Used by tests and by
//! single-instance development runs.

use super::{EventFilter, EventStore, InsertOutcome, StoreError, SubjectDirectory};
use crate::entities::account::PlatformAccount;
use crate::entities::webhook_event::{NewWebhookEvent, WebhookEvent};
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Default)]
struct Events {
    by_id: HashMap<Uuid, WebhookEvent>,
    by_hash: HashMap<String, Uuid>,
}

pub struct MemoryEventStore {
    events: Mutex<Events>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryEventStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(Events::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored event, oldest first.
    pub fn snapshot(&self) -> Vec<WebhookEvent> {
        let mut events: Vec<_> = self.lock().by_id.values().cloned().collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        events
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Events> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut WebhookEvent)) {
        if let Some(event) = self.lock().by_id.get_mut(&id) {
            f(event);
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_if_absent(&self, event: NewWebhookEvent) -> Result<InsertOutcome, StoreError> {
        let mut events = self.lock();
        if events.by_hash.contains_key(&event.event_hash) {
            return Ok(InsertOutcome::Duplicate);
        }
        let stored = WebhookEvent {
            id: Uuid::now_v7(),
            event_type: event.event_type,
            account_id: event.account_id,
            subject_id: event.subject_id,
            source_user_id: event.source_user_id,
            event_hash: event.event_hash,
            payload: event.payload,
            processed: false,
            processed_at: None,
            error: None,
            created_at: self.clock.now(),
        };
        events.by_hash.insert(stored.event_hash.clone(), stored.id);
        events.by_id.insert(stored.id, stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.lock().by_id.get(&id).cloned())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.update(id, |event| {
            event.processed = true;
            event.processed_at = Some(now);
            event.error = None;
        });
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update(id, |event| {
            if !event.processed {
                event.error = Some(error.to_string());
            }
        });
        Ok(())
    }

    async fn clear_error(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |event| {
            if !event.processed {
                event.error = None;
            }
        });
        Ok(())
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>, StoreError> {
        let mut events: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|e| filter.processed.is_none_or(|p| e.processed == p))
            .filter(|e| filter.account_id.is_none_or(|a| e.account_id == a))
            .collect();
        events.reverse();
        events.truncate(filter.limit);
        Ok(events)
    }

    async fn stale_pending(
        &self,
        older_than: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|e| !e.processed && e.error.is_none() && e.created_at < older_than)
            .take(limit)
            .collect())
    }
}

/// A fixed set of connected accounts.
#[derive(Debug, Default)]
pub struct MemorySubjectDirectory {
    accounts: Mutex<Vec<PlatformAccount>>,
}

impl MemorySubjectDirectory {
    pub fn new(accounts: Vec<PlatformAccount>) -> Self {
        Self {
            accounts: Mutex::new(accounts),
        }
    }

    pub fn insert(&self, account: PlatformAccount) {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(account);
    }
}

#[async_trait]
impl SubjectDirectory for MemorySubjectDirectory {
    async fn resolve(&self, platform_ids: &[&str]) -> Result<Option<PlatformAccount>, StoreError> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(accounts
            .iter()
            .find(|account| platform_ids.iter().any(|id| account.matches(id)))
            .cloned())
    }
}
