use super::{LockError, LockStore};
use crate::utils::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

/// Single-process lock table.
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, (String, OffsetDateTime)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Token of the live holder of `key`.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).is_some_and(|(_, expires_at)| *expires_at > now) {
            return Ok(false);
        }
        locks.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).is_some_and(|(held, _)| held == token) {
            locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn prune_expired(&self) -> Result<u64, LockError> {
        let now = self.clock.now();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - locks.len()) as u64)
    }
}
