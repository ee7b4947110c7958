//! Queue, dispatch, rate-guard and schedule settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::queue::RetryPolicy;

/// How the receiver hands stored events to their handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Enqueue a job keyed by the event id; workers process it with retries.
    #[default]
    Queue,
    /// Run the handler in the request context. No retry, no dead letters.
    Inline,
}

/// Backend selection for the rate guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateGuardMode {
    /// Counters in the shared store; correct across all instances.
    #[serde(rename = "redis", alias = "strict", alias = "shared")]
    Strict,
    /// Counters in process memory; correct within one instance only.
    Memory,
    /// Strict, degrading to memory for any call where the shared store fails.
    #[default]
    Auto,
}

/// Working-queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub dead_letter_name: String,
    pub retry: RetryPolicy,
    /// Maximum in-flight jobs per worker pool.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// How long a claimed job stays invisible to other workers.
    pub lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "webhook-events".to_string(),
            dead_letter_name: "webhook-events-dlq".to_string(),
            retry: RetryPolicy::default(),
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(300),
        }
    }
}

/// One lock-protected periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub job: String,
    pub cron: String,
    pub lock_ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Modes {
        processing: ProcessingMode,
        rate_guard: RateGuardMode,
    }

    #[test]
    fn mode_names_parse() {
        let modes: Modes =
            serde_json::from_str(r#"{"processing":"inline","rate_guard":"redis"}"#).unwrap();
        assert_eq!(modes.processing, ProcessingMode::Inline);
        assert_eq!(modes.rate_guard, RateGuardMode::Strict);

        let modes: Modes =
            serde_json::from_str(r#"{"processing":"queue","rate_guard":"strict"}"#).unwrap();
        assert_eq!(modes.processing, ProcessingMode::Queue);
        assert_eq!(modes.rate_guard, RateGuardMode::Strict);

        let modes: Modes =
            serde_json::from_str(r#"{"processing":"queue","rate_guard":"auto"}"#).unwrap();
        assert_eq!(modes.rate_guard, RateGuardMode::Auto);
    }
}
