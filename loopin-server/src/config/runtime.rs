//! Reloadable configuration shared with request handlers.

use loopin_core::config::{AdminConfig, WebhookConfig};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sections that SIGHUP may replace while the server runs. Each has its
/// own lock so readers of one never wait on a writer of the other.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    pub admin: Arc<RwLock<AdminConfig>>,
    pub webhook: Arc<RwLock<WebhookConfig>>,
}

impl SharedConfig {
    pub fn new(admin: AdminConfig, webhook: WebhookConfig) -> Self {
        Self {
            admin: Arc::new(RwLock::new(admin)),
            webhook: Arc::new(RwLock::new(webhook)),
        }
    }
}
