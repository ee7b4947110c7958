//! TOML file configuration structures.
//!
//! These structs directly map to the `loopin-config.toml` file format.

use loopin_core::config::{ProcessingMode, RateGuardMode};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_guard: RateGuardConfig,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

/// Webhook receiver section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// HMAC key shared with the platform. Empty rejects every delivery.
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub processing_mode: ProcessingMode,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Working queue section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub dead_letter_name: String,
    pub attempts: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub lease_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "webhook-events".to_string(),
            dead_letter_name: "webhook-events-dlq".to_string(),
            attempts: 3,
            backoff_ms: 5_000,
            concurrency: 5,
            poll_interval_ms: 1_000,
            lease_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateGuardConfig {
    #[serde(default)]
    pub mode: RateGuardMode,
}

/// One `[[schedules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub job: String,
    /// Five- or six-field cron expression.
    pub cron: String,
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
}

fn default_lock_ttl_ms() -> u64 {
    5 * 60 * 1000
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}
