//! Per-subject hourly rate guard.
//!
//! Counts actions in fixed one-hour windows keyed by
//! `rate:<kind>:<subject>:<hourBucket>`. Fixed windows let up to twice the
//! limit through across a bucket boundary; callers that need a true sliding
//! window must correct for that themselves.
//!
//! Three backends:
//! - strict: counters in the shared store, correct across every instance;
//! - memory: counters in this process only;
//! - auto: strict, falling back to memory for any call the shared store
//!   fails, with a single warning per process.

mod local;
mod postgres;

pub use local::LocalRateWindows;
pub use postgres::PgRateCounterStore;

use crate::config::RateGuardMode;
use crate::utils::Clock;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

/// Window lifetime: one hour plus slack so a window outlives its bucket.
pub const WINDOW_TTL: Duration = Duration::from_secs(3600 + 60);

#[derive(Debug, Error)]
pub enum RateGuardError {
    #[error("rate counter backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<sqlx::Error> for RateGuardError {
    fn from(e: sqlx::Error) -> Self {
        Self::BackendUnavailable(e.to_string())
    }
}

/// Kind of rate-sensitive outbound action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKind {
    Reply,
    DirectMessage,
}

impl RateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RateKind::Reply => "reply",
            RateKind::DirectMessage => "direct-message",
        }
    }
}

impl fmt::Display for RateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub kind: RateKind,
    pub subject_id: String,
    pub hour_bucket: i64,
}

impl WindowKey {
    pub fn at(kind: RateKind, subject_id: &str, now: OffsetDateTime) -> Self {
        Self {
            kind,
            subject_id: subject_id.to_string(),
            hour_bucket: hour_bucket(now),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate:{}:{}:{}",
            self.kind, self.subject_id, self.hour_bucket
        )
    }
}

/// `floor(unix_seconds / 3600)`.
pub fn hour_bucket(now: OffsetDateTime) -> i64 {
    now.unix_timestamp().div_euclid(3600)
}

/// Counter storage for rate windows.
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Increment the window and return its new count. The first increment
    /// of a window sets its expiry to `ttl`.
    async fn increment(&self, key: &WindowKey, ttl: Duration) -> Result<i64, RateGuardError>;

    /// Count of a live window, zero if it does not exist.
    async fn count(&self, key: &WindowKey) -> Result<i64, RateGuardError>;

    async fn prune_expired(&self) -> Result<u64, RateGuardError>;
}

/// Remembers whether the auto-mode fallback has been reported.
#[derive(Debug, Default)]
pub struct FallbackNotice {
    has_warned: AtomicBool,
}

impl FallbackNotice {
    /// Log the fallback unless it was already logged. Returns whether this
    /// call logged.
    pub fn note(&self, error: &RateGuardError) -> bool {
        if self.has_warned.swap(true, Ordering::Relaxed) {
            return false;
        }
        warn!(
            error = %error,
            "Shared rate counter unavailable, falling back to in-process counting"
        );
        true
    }

    pub fn has_warned(&self) -> bool {
        self.has_warned.load(Ordering::Relaxed)
    }
}

enum Backend {
    Strict(Arc<dyn RateCounterStore>),
    Memory,
    Auto(Arc<dyn RateCounterStore>),
}

/// The rate guard. Construct once per process and share it.
pub struct RateGuard {
    backend: Backend,
    local: LocalRateWindows,
    notice: FallbackNotice,
    clock: Arc<dyn Clock>,
}

impl RateGuard {
    pub fn strict(store: Arc<dyn RateCounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(Backend::Strict(store), clock)
    }

    pub fn memory(clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(Backend::Memory, clock)
    }

    pub fn auto(store: Arc<dyn RateCounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(Backend::Auto(store), clock)
    }

    pub fn from_mode(
        mode: RateGuardMode,
        store: Arc<dyn RateCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        match mode {
            RateGuardMode::Strict => Self::strict(store, clock),
            RateGuardMode::Memory => Self::memory(clock),
            RateGuardMode::Auto => Self::auto(store, clock),
        }
    }

    fn with_backend(backend: Backend, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            local: LocalRateWindows::new(clock.clone()),
            notice: FallbackNotice::default(),
            clock,
        }
    }

    pub fn fallback_notice(&self) -> &FallbackNotice {
        &self.notice
    }

    /// Whether one more action of `kind` for `subject_id` fits under `limit`
    /// in the current hour.
    pub async fn allow(
        &self,
        kind: RateKind,
        subject_id: &str,
        limit: u32,
    ) -> Result<bool, RateGuardError> {
        let count = self.current_count(kind, subject_id).await?;
        Ok(count < i64::from(limit))
    }

    /// Count one performed action. Call only after the action succeeded.
    pub async fn record(&self, kind: RateKind, subject_id: &str) -> Result<i64, RateGuardError> {
        let key = WindowKey::at(kind, subject_id, self.clock.now());
        match &self.backend {
            Backend::Strict(store) => store.increment(&key, WINDOW_TTL).await,
            Backend::Memory => Ok(self.local.increment_now(&key)),
            Backend::Auto(store) => match store.increment(&key, WINDOW_TTL).await {
                Ok(count) => Ok(count),
                Err(e) => {
                    self.notice.note(&e);
                    Ok(self.local.increment_now(&key))
                }
            },
        }
    }

    pub async fn current_count(
        &self,
        kind: RateKind,
        subject_id: &str,
    ) -> Result<i64, RateGuardError> {
        let key = WindowKey::at(kind, subject_id, self.clock.now());
        match &self.backend {
            Backend::Strict(store) => store.count(&key).await,
            Backend::Memory => Ok(self.local.count_now(&key)),
            Backend::Auto(store) => match store.count(&key).await {
                Ok(count) => Ok(count),
                Err(e) => {
                    self.notice.note(&e);
                    Ok(self.local.count_now(&key))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::AtomicUsize;

    struct DownStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateCounterStore for DownStore {
        async fn increment(&self, _: &WindowKey, _: Duration) -> Result<i64, RateGuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RateGuardError::BackendUnavailable("connection refused".into()))
        }

        async fn count(&self, _: &WindowKey) -> Result<i64, RateGuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RateGuardError::BackendUnavailable("connection refused".into()))
        }

        async fn prune_expired(&self) -> Result<u64, RateGuardError> {
            Err(RateGuardError::BackendUnavailable("connection refused".into()))
        }
    }

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 - 1_700_000_000 % 3600).unwrap()
    }

    #[test]
    fn window_key_format() {
        let key = WindowKey::at(RateKind::DirectMessage, "acct-1", start());
        assert_eq!(key.to_string(), format!("rate:direct-message:acct-1:{}", 1_700_000_000 / 3600));
    }

    #[tokio::test]
    async fn sixth_action_in_the_hour_is_refused_until_next_bucket() {
        let clock = Arc::new(ManualClock::new(start()));
        let guard = RateGuard::memory(clock.clone());

        for _ in 0..5 {
            assert!(guard.allow(RateKind::Reply, "acct", 5).await.unwrap());
            guard.record(RateKind::Reply, "acct").await.unwrap();
        }
        assert!(!guard.allow(RateKind::Reply, "acct", 5).await.unwrap());
        assert!(guard.allow(RateKind::Reply, "other", 5).await.unwrap());
        assert!(guard.allow(RateKind::DirectMessage, "acct", 5).await.unwrap());

        clock.advance(time::Duration::hours(1));
        assert!(guard.allow(RateKind::Reply, "acct", 5).await.unwrap());
        assert_eq!(guard.current_count(RateKind::Reply, "acct").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn strict_mode_propagates_backend_failure() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(DownStore {
            calls: AtomicUsize::new(0),
        });
        let guard = RateGuard::strict(store, clock);
        assert!(matches!(
            guard.allow(RateKind::Reply, "acct", 5).await,
            Err(RateGuardError::BackendUnavailable(_))
        ));
        assert!(guard.record(RateKind::Reply, "acct").await.is_err());
    }

    #[tokio::test]
    async fn auto_mode_counts_locally_and_warns_once() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(DownStore {
            calls: AtomicUsize::new(0),
        });
        let guard = RateGuard::auto(store.clone(), clock);
        assert!(!guard.fallback_notice().has_warned());

        for _ in 0..3 {
            assert!(guard.allow(RateKind::Reply, "acct", 3).await.unwrap());
            guard.record(RateKind::Reply, "acct").await.unwrap();
        }
        assert!(!guard.allow(RateKind::Reply, "acct", 3).await.unwrap());

        // every call still tries the shared store first
        assert_eq!(store.calls.load(Ordering::SeqCst), 7);
        assert!(guard.fallback_notice().has_warned());
        let err = RateGuardError::BackendUnavailable("again".into());
        assert!(!guard.fallback_notice().note(&err));
    }

    #[test]
    fn fallback_notice_logs_only_the_first_time() {
        let notice = FallbackNotice::default();
        let err = RateGuardError::BackendUnavailable("down".into());
        assert!(notice.note(&err));
        assert!(!notice.note(&err));
        assert!(!notice.note(&err));
    }
}
