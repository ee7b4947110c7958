pub mod admin;
pub mod delivery;
pub mod queue;

pub use admin::{
    AdminDeadLetterResponse, AdminWebhookEventResponse, ListDeadLettersQuery, ListEventsQuery,
    ReplayOutcome, ReplayResponse,
};
pub use delivery::{
    Change, ChangeValue, CommentValue, DeliveryEntry, EventType, MediaRef, MentionValue,
    MessageValue, PlatformUser, StoryInsightsValue, WebhookDelivery,
};
pub use queue::{DeadLetterPayload, QueueJobPayload};
