use crate::entities::WebhookEventType;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use loopin_sdk::objects::{AdminWebhookEventResponse, ChangeValue, EventType};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// One stored webhook change.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: WebhookEventType,
    /// Internal account the change was resolved to.
    pub account_id: Uuid,
    /// Platform-side identifier of that account.
    pub subject_id: String,
    pub source_user_id: Option<String>,
    pub event_hash: String,
    /// The original `{field, value}` change, verbatim.
    pub payload: Value,
    pub processed: bool,
    pub processed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
}

impl WebhookEvent {
    pub fn sdk_event_type(&self) -> EventType {
        self.event_type.into()
    }

    /// Typed view of the stored change value.
    pub fn change(&self) -> Result<ChangeValue, serde_json::Error> {
        let value = self.payload.get("value").unwrap_or(&Value::Null);
        ChangeValue::parse(self.sdk_event_type(), value)
    }
}

impl From<WebhookEvent> for AdminWebhookEventResponse {
    fn from(event: WebhookEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.into(),
            account_id: event.account_id,
            subject_id: event.subject_id,
            source_user_id: event.source_user_id,
            event_hash: event.event_hash,
            payload: event.payload,
            processed: event.processed,
            processed_at: event.processed_at.map(|t| t.unix_timestamp()),
            error: event.error,
            created_at: event.created_at.unix_timestamp(),
        }
    }
}

/// Data for inserting a new webhook event.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_type: WebhookEventType,
    pub account_id: Uuid,
    pub subject_id: String,
    pub source_user_id: Option<String>,
    pub event_hash: String,
    pub payload: Value,
}

const EVENT_COLUMNS: &str = "id, event_type, account_id, subject_id, source_user_id, \
    event_hash, payload, processed, processed_at, error, created_at";

#[derive(Debug, Clone)]
/// Insert an event unless one with the same hash already exists.
///
/// Returns `None` when the hash is already present.
pub struct InsertWebhookEventIfAbsent {
    pub event: NewWebhookEvent,
}

impl Processor<InsertWebhookEventIfAbsent> for DatabaseProcessor {
    type Output = Option<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertWebhookEventIfAbsent")]
    async fn process(
        &self,
        insert: InsertWebhookEventIfAbsent,
    ) -> Result<Option<WebhookEvent>, sqlx::Error> {
        let NewWebhookEvent {
            event_type,
            account_id,
            subject_id,
            source_user_id,
            event_hash,
            payload,
        } = insert.event;
        let sql = format!(
            "INSERT INTO webhook_events \
             (id, event_type, account_id, subject_id, source_user_id, event_hash, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (event_hash) DO NOTHING \
             RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(Uuid::now_v7())
            .bind(event_type)
            .bind(account_id)
            .bind(subject_id)
            .bind(source_user_id)
            .bind(event_hash)
            .bind(payload)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetWebhookEventById {
    pub id: Uuid,
}

impl Processor<GetWebhookEventById> for DatabaseProcessor {
    type Output = Option<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWebhookEventById")]
    async fn process(&self, query: GetWebhookEventById) -> Result<Option<WebhookEvent>, sqlx::Error> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1");
        sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
/// Terminal success: `processed = true`, error cleared.
pub struct MarkWebhookEventProcessed {
    pub id: Uuid,
}

impl Processor<MarkWebhookEventProcessed> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkWebhookEventProcessed")]
    async fn process(&self, update: MarkWebhookEventProcessed) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = true, processed_at = now(), error = NULL
            WHERE id = $1
            "#,
        )
        .bind(update.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Record a handler failure. `processed` stays false.
pub struct MarkWebhookEventFailed {
    pub id: Uuid,
    pub error: String,
}

impl Processor<MarkWebhookEventFailed> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkWebhookEventFailed")]
    async fn process(&self, update: MarkWebhookEventFailed) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET error = $2
            WHERE id = $1 AND processed = false
            "#,
        )
        .bind(update.id)
        .bind(update.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClearWebhookEventError {
    pub id: Uuid,
}

impl Processor<ClearWebhookEventError> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClearWebhookEventError")]
    async fn process(&self, update: ClearWebhookEventError) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhook_events SET error = NULL WHERE id = $1 AND processed = false")
            .bind(update.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
/// List events, newest first, optionally filtered.
pub struct ListWebhookEvents {
    pub processed: Option<bool>,
    pub account_id: Option<Uuid>,
    pub limit: i64,
}

impl Processor<ListWebhookEvents> for DatabaseProcessor {
    type Output = Vec<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListWebhookEvents")]
    async fn process(&self, query: ListWebhookEvents) -> Result<Vec<WebhookEvent>, sqlx::Error> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events \
             WHERE ($1::boolean IS NULL OR processed = $1) \
               AND ($2::uuid IS NULL OR account_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(query.processed)
            .bind(query.account_id)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
/// Unprocessed events with no recorded error, created before `older_than`.
pub struct ListStalePendingEvents {
    pub older_than: OffsetDateTime,
    pub limit: i64,
}

impl Processor<ListStalePendingEvents> for DatabaseProcessor {
    type Output = Vec<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListStalePendingEvents")]
    async fn process(&self, query: ListStalePendingEvents) -> Result<Vec<WebhookEvent>, sqlx::Error> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events \
             WHERE processed = false AND error IS NULL AND created_at < $1 \
             ORDER BY created_at ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(query.older_than)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: Value) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::nil(),
            event_type: WebhookEventType::Comments,
            account_id: Uuid::nil(),
            subject_id: "17841400000000001".to_string(),
            source_user_id: None,
            event_hash: String::new(),
            payload,
            processed: false,
            processed_at: None,
            error: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn change_reads_the_stored_value() {
        let stored = event(json!({"field": "comments", "value": {"id": "c9", "text": "yo"}}));
        let ChangeValue::Comment(comment) = stored.change().unwrap() else {
            panic!("expected comment");
        };
        assert_eq!(comment.id, "c9");
    }

    #[test]
    fn change_without_value_fails_to_parse() {
        assert!(event(json!({"field": "comments"})).change().is_err());
    }

    #[test]
    fn admin_response_uses_unix_timestamps() {
        let mut stored = event(json!({}));
        stored.processed_at = Some(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(42));
        let response = AdminWebhookEventResponse::from(stored);
        assert_eq!(response.processed_at, Some(42));
        assert_eq!(response.created_at, 0);
        assert_eq!(response.event_type, EventType::Comments);
    }
}
