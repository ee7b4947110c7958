//! In-process rate windows.

use super::{RateCounterStore, RateGuardError, WINDOW_TTL, WindowKey, hour_bucket};
use crate::utils::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: i64,
    expires_at: OffsetDateTime,
}

/// Process-local window counters.
///
/// Windows from buckets before the current one are evicted on every write,
/// so the map holds at most one window per active `(kind, subject)`.
pub struct LocalRateWindows {
    windows: Mutex<HashMap<WindowKey, Window>>,
    clock: Arc<dyn Clock>,
}

impl LocalRateWindows {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WindowKey, Window>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn increment_now(&self, key: &WindowKey) -> i64 {
        self.increment_with_ttl(key, WINDOW_TTL)
    }

    pub(crate) fn count_now(&self, key: &WindowKey) -> i64 {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|w| w.expires_at > now)
            .map_or(0, |w| w.count)
    }

    fn increment_with_ttl(&self, key: &WindowKey, ttl: Duration) -> i64 {
        let now = self.clock.now();
        let current = hour_bucket(now);
        let mut windows = self.lock();
        windows.retain(|k, w| k.hour_bucket >= current && w.expires_at > now);
        let window = windows.entry(key.clone()).or_insert(Window {
            count: 0,
            expires_at: now + ttl,
        });
        window.count += 1;
        window.count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateCounterStore for LocalRateWindows {
    async fn increment(&self, key: &WindowKey, ttl: Duration) -> Result<i64, RateGuardError> {
        Ok(self.increment_with_ttl(key, ttl))
    }

    async fn count(&self, key: &WindowKey) -> Result<i64, RateGuardError> {
        Ok(self.count_now(key))
    }

    async fn prune_expired(&self) -> Result<u64, RateGuardError> {
        let now = self.clock.now();
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, w| w.expires_at > now);
        Ok((before - windows.len()) as u64)
    }
}
