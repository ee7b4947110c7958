//! Admin API request/response objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EventType;

/// A stored webhook event as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminWebhookEventResponse {
    pub id: Uuid,
    pub event_type: EventType,
    pub account_id: Uuid,
    pub subject_id: String,
    pub source_user_id: Option<String>,
    pub event_hash: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// A dead-letter record as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDeadLetterResponse {
    pub id: Uuid,
    pub original_queue: String,
    pub event_id: Uuid,
    pub job_id: String,
    pub attempts_made: u32,
    pub failed_reason: String,
    pub timestamp: i64,
}

/// Query parameters for listing events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEventsQuery {
    pub processed: Option<bool>,
    pub account_id: Option<Uuid>,
    pub limit: Option<u32>,
}

/// Query parameters for listing dead letters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDeadLettersQuery {
    pub limit: Option<u32>,
}

/// Result of replaying a dead-lettered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub event_id: Uuid,
    pub outcome: ReplayOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// A fresh job was queued for the event.
    Enqueued,
    /// A job for the event was already in the queue.
    AlreadyQueued,
    /// The event was processed inline and succeeded.
    Processed,
    /// The event was processed inline and failed again.
    Failed,
    /// The event had already been processed; nothing to do.
    AlreadyProcessed,
}
