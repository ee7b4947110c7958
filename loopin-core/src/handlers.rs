//! Event handlers.
//!
//! The core does not decide what an event means; it hands each stored
//! event to the handler registered for its type and records the outcome.

use crate::entities::webhook_event::WebhookEvent;
use async_trait::async_trait;
use loopin_sdk::objects::{ChangeValue, EventType};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A failed handler invocation. The message is what gets stored on the
/// event and in the dead-letter record.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent, change: &ChangeValue) -> Result<(), HandlerError>;
}

/// Handlers by event type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    /// Register `handler` for every event type.
    pub fn register_all(mut self, handler: Arc<dyn EventHandler>) -> Self {
        for event_type in EventType::ALL {
            self.handlers.insert(event_type, handler.clone());
        }
        self
    }

    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&event_type)
    }

    /// Run the handler for `event`.
    ///
    /// A payload that no longer parses as its event type is a handler
    /// failure. An event type without a handler succeeds.
    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let event_type = event.sdk_event_type();
        let Some(handler) = self.get(event_type) else {
            debug!(event_id = %event.id, event_type = %event_type, "No handler registered");
            return Ok(());
        };
        let change = event
            .change()
            .map_err(|e| HandlerError::with_source("stored payload does not parse", e))?;
        handler.handle(event, &change).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedHandler;
    use super::*;
    use crate::entities::WebhookEventType;
    use serde_json::json;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn event(event_type: WebhookEventType, payload: serde_json::Value) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::now_v7(),
            event_type,
            account_id: Uuid::nil(),
            subject_id: "acct".to_string(),
            source_user_id: None,
            event_hash: "h".to_string(),
            payload,
            processed: false,
            processed_at: None,
            error: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn unregistered_type_counts_as_success() {
        let registry = HandlerRegistry::new();
        let stored = event(WebhookEventType::Mentions, json!({"field": "mentions", "value": {}}));
        registry.dispatch(&stored).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_routes_by_type() {
        let comments = ScriptedHandler::succeeding();
        let messages = ScriptedHandler::succeeding();
        let registry = HandlerRegistry::new()
            .register(EventType::Comments, comments.clone())
            .register(EventType::Messages, messages.clone());

        let stored = event(
            WebhookEventType::Comments,
            json!({"field": "comments", "value": {"id": "c1"}}),
        );
        registry.dispatch(&stored).await.unwrap();
        assert_eq!(comments.calls(), 1);
        assert_eq!(messages.calls(), 0);
    }

    #[tokio::test]
    async fn unparsable_payload_is_a_handler_failure() {
        let handler = ScriptedHandler::succeeding();
        let registry = HandlerRegistry::new().register_all(handler.clone());
        let stored = event(
            WebhookEventType::Comments,
            json!({"field": "comments", "value": {"text": "no id"}}),
        );
        let err = registry.dispatch(&stored).await.unwrap_err();
        assert_eq!(err.message, "stored payload does not parse");
        assert_eq!(handler.calls(), 0);
    }
}
