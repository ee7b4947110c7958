use super::{RateCounterStore, RateGuardError, WindowKey};
use crate::entities::rate_window::{GetRateWindow, IncrementRateWindow, PruneExpiredRateWindows};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use std::time::Duration;

/// Rate windows in the shared database, one row per window key.
#[derive(Clone)]
pub struct PgRateCounterStore {
    db: DatabaseProcessor,
}

impl PgRateCounterStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RateCounterStore for PgRateCounterStore {
    async fn increment(&self, key: &WindowKey, ttl: Duration) -> Result<i64, RateGuardError> {
        Ok(self
            .db
            .process(IncrementRateWindow {
                key: key.to_string(),
                ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            })
            .await?)
    }

    async fn count(&self, key: &WindowKey) -> Result<i64, RateGuardError> {
        Ok(self
            .db
            .process(GetRateWindow {
                key: key.to_string(),
            })
            .await?)
    }

    async fn prune_expired(&self) -> Result<u64, RateGuardError> {
        Ok(self.db.process(PruneExpiredRateWindows).await?)
    }
}
