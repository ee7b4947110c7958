//! Application state shared across all request handlers.

use crate::config::runtime::SharedConfig;
use loopin_core::processors::{Dispatcher, IngestPipeline};
use loopin_core::queue::DeadLetterSink;
use loopin_core::store::EventStore;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool. `None` when every store runs in memory.
    pub db: Option<PgPool>,
    /// Reloadable configuration sections (SIGHUP).
    pub config: SharedConfig,
    pub events: Arc<dyn EventStore>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub dispatcher: Arc<Dispatcher>,
    pub ingest: Arc<IngestPipeline>,
}
