pub mod account;
pub mod dead_letter;
pub mod lock;
pub mod queue_job;
pub mod rate_window;
pub mod webhook_event;

use loopin_sdk::objects::EventType as SdkEventType;

/// Event type for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `loopin_sdk::objects::EventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "webhook_event_type")]
pub enum WebhookEventType {
    Comments,
    Mentions,
    Messages,
    StoryInsights,
}

impl From<WebhookEventType> for SdkEventType {
    fn from(value: WebhookEventType) -> Self {
        match value {
            WebhookEventType::Comments => SdkEventType::Comments,
            WebhookEventType::Mentions => SdkEventType::Mentions,
            WebhookEventType::Messages => SdkEventType::Messages,
            WebhookEventType::StoryInsights => SdkEventType::StoryInsights,
        }
    }
}

impl From<SdkEventType> for WebhookEventType {
    fn from(value: SdkEventType) -> Self {
        match value {
            SdkEventType::Comments => WebhookEventType::Comments,
            SdkEventType::Mentions => WebhookEventType::Mentions,
            SdkEventType::Messages => WebhookEventType::Messages,
            SdkEventType::StoryInsights => WebhookEventType::StoryInsights,
        }
    }
}

/// Queue job status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "job_status")]
pub enum JobStatus {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}
