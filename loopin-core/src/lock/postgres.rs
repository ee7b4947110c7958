use super::{LockError, LockStore};
use crate::entities::lock::{AcquireLock, PruneExpiredLocks, ReleaseLock};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use std::time::Duration;

/// Lock table in the shared database.
#[derive(Clone)]
pub struct PgLockStore {
    db: DatabaseProcessor,
}

impl PgLockStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        Ok(self
            .db
            .process(AcquireLock {
                key: key.to_string(),
                token: token.to_string(),
                ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            })
            .await?)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
        Ok(self
            .db
            .process(ReleaseLock {
                key: key.to_string(),
                token: token.to_string(),
            })
            .await?)
    }

    async fn prune_expired(&self) -> Result<u64, LockError> {
        Ok(self.db.process(PruneExpiredLocks).await?)
    }
}
