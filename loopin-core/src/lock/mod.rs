//! Distributed mutual exclusion for periodic jobs.
//!
//! A lock is a `key -> token` entry with an expiry. Acquisition succeeds
//! only when the key is absent or expired; release deletes the key only
//! while it still carries the caller's token, so a holder whose lease ran
//! out can never remove a lock that another instance has since taken.

mod memory;
mod postgres;

pub use memory::MemoryLockStore;
pub use postgres::PgLockStore;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key = token` with the given ttl if no live holder exists.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` if it still carries `token`.
    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError>;

    /// Drop expired entries. Returns how many were removed.
    async fn prune_expired(&self) -> Result<u64, LockError>;
}

/// Runs actions under a store-backed lock.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Run `action` only if `key` can be taken.
    ///
    /// Returns `Ok(None)` without running `action` when another holder has
    /// the key. A failed release is logged and otherwise ignored; the lock
    /// then lapses at its ttl.
    pub async fn run_exclusively<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        action: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let token = Uuid::new_v4().to_string();
        if !self.store.acquire(key, &token, ttl).await? {
            debug!(lock_key = key, "Lock held elsewhere, skipping");
            return Ok(None);
        }

        let output = action().await;

        match self.store.release(key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(lock_key = key, "Lock expired before release"),
            Err(e) => warn!(lock_key = key, error = %e, "Failed to release lock"),
        }
        Ok(Some(output))
    }
}

/// Key under which scheduled job `job` is serialized.
pub fn job_lock_key(job: &str) -> String {
    format!("lock:jobs:{job}")
}
