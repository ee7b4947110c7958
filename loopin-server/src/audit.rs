//! Default event handler: records each typed change in the log.
//!
//! Stands in for the rule-matching collaborator. It never performs an
//! outbound action, so it only reads the rate guard to show how much of
//! the current window the subject has already used.

use async_trait::async_trait;
use loopin_core::entities::webhook_event::WebhookEvent;
use loopin_core::handlers::{EventHandler, HandlerError};
use loopin_core::rate_guard::{RateGuard, RateKind};
use loopin_sdk::objects::ChangeValue;
use std::sync::Arc;

pub struct AuditHandler {
    rate_guard: Arc<RateGuard>,
}

impl AuditHandler {
    pub fn new(rate_guard: Arc<RateGuard>) -> Self {
        Self { rate_guard }
    }

    fn rate_kind(change: &ChangeValue) -> Option<RateKind> {
        match change {
            ChangeValue::Comment(_) => Some(RateKind::Reply),
            ChangeValue::Message(_) => Some(RateKind::DirectMessage),
            ChangeValue::Mention(_) | ChangeValue::StoryInsights(_) => None,
        }
    }
}

#[async_trait]
impl EventHandler for AuditHandler {
    async fn handle(&self, event: &WebhookEvent, change: &ChangeValue) -> Result<(), HandlerError> {
        let used = match Self::rate_kind(change) {
            Some(kind) => self
                .rate_guard
                .current_count(kind, &event.subject_id)
                .await
                .map_err(|e| HandlerError::with_source("rate window unavailable", e))?,
            None => 0,
        };

        match change {
            ChangeValue::Comment(comment) => tracing::info!(
                event_id = %event.id,
                account_id = %event.account_id,
                comment_id = %comment.id,
                from = ?comment.from.as_ref().map(|u| u.id.as_str()),
                replies_this_hour = used,
                "Comment received"
            ),
            ChangeValue::Mention(mention) => tracing::info!(
                event_id = %event.id,
                account_id = %event.account_id,
                media_id = ?mention.media_id,
                comment_id = ?mention.comment_id,
                "Mention received"
            ),
            ChangeValue::Message(message) => tracing::info!(
                event_id = %event.id,
                account_id = %event.account_id,
                from = ?change.source_user_id(),
                has_text = message.text().is_some(),
                messages_this_hour = used,
                "Direct message received"
            ),
            ChangeValue::StoryInsights(insights) => tracing::info!(
                event_id = %event.id,
                account_id = %event.account_id,
                media_id = ?insights.media_id,
                "Story insights received"
            ),
        }
        Ok(())
    }
}
