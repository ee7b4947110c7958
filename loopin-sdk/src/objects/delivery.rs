//! Inbound webhook delivery objects.
//!
//! A delivery is a batch of entries, one per platform account, each carrying
//! an array of `{field, value}` changes. Parsing is permissive: unknown
//! fields are ignored at the envelope level and preserved in `extra` maps on
//! the typed change values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The body of a webhook delivery POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default, alias = "entries")]
    pub entry: Vec<DeliveryEntry>,
}

/// One entry of a delivery, scoped to a single platform account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEntry {
    /// Platform identifier of the account the changes belong to.
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// A single `{field, value}` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

/// Kinds of change the pipeline stores and dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Comments,
    Mentions,
    Messages,
    StoryInsights,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Comments,
        EventType::Mentions,
        EventType::Messages,
        EventType::StoryInsights,
    ];

    /// Map a change `field` to its event type. Unknown fields yield `None`.
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "comments" => Some(EventType::Comments),
            "mentions" => Some(EventType::Mentions),
            "messages" => Some(EventType::Messages),
            "story_insights" => Some(EventType::StoryInsights),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Comments => "comments",
            EventType::Mentions => "mentions",
            EventType::Messages => "messages",
            EventType::StoryInsights => "story_insights",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform user reference (`{id, username}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A media reference attached to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    #[serde(default)]
    pub media_product_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentValue {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<PlatformUser>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionValue {
    #[serde(default)]
    pub comment_id: Option<String>,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Direct message change. The platform has shipped both a `from`-style and
/// a `sender`/`recipient`-style shape; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageValue {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<PlatformUser>,
    #[serde(default)]
    pub sender: Option<PlatformUser>,
    #[serde(default)]
    pub recipient: Option<PlatformUser>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageValue {
    /// Text of the message, for either payload shape.
    pub fn text(&self) -> Option<&str> {
        match self.message.as_ref()? {
            Value::String(text) => Some(text),
            Value::Object(obj) => obj.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryInsightsValue {
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view of a change value, selected by its event type.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    Comment(CommentValue),
    Mention(MentionValue),
    Message(MessageValue),
    StoryInsights(StoryInsightsValue),
}

impl ChangeValue {
    /// Parse a raw change value into the variant matching `event_type`.
    pub fn parse(event_type: EventType, value: &Value) -> Result<Self, serde_json::Error> {
        let value = value.clone();
        Ok(match event_type {
            EventType::Comments => ChangeValue::Comment(serde_json::from_value(value)?),
            EventType::Mentions => ChangeValue::Mention(serde_json::from_value(value)?),
            EventType::Messages => ChangeValue::Message(serde_json::from_value(value)?),
            EventType::StoryInsights => ChangeValue::StoryInsights(serde_json::from_value(value)?),
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            ChangeValue::Comment(_) => EventType::Comments,
            ChangeValue::Mention(_) => EventType::Mentions,
            ChangeValue::Message(_) => EventType::Messages,
            ChangeValue::StoryInsights(_) => EventType::StoryInsights,
        }
    }

    /// Identifier of the human actor who triggered the change, if the
    /// payload names one.
    pub fn source_user_id(&self) -> Option<&str> {
        match self {
            ChangeValue::Comment(c) => c.from.as_ref().map(|u| u.id.as_str()),
            ChangeValue::Message(m) => m
                .sender
                .as_ref()
                .or(m.from.as_ref())
                .map(|u| u.id.as_str()),
            ChangeValue::Mention(_) | ChangeValue::StoryInsights(_) => None,
        }
    }

    /// Extra platform identifiers that may name the owning account, beyond
    /// the entry id. Message changes address the account as `recipient`.
    pub fn subject_hints(&self) -> Vec<&str> {
        match self {
            ChangeValue::Message(m) => m.recipient.iter().map(|u| u.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_delivery_with_unknown_fields() {
        let body = json!({
            "object": "instagram",
            "entry": [{
                "id": "17841400000000001",
                "time": 1_700_000_000,
                "changes": [{"field": "comments", "value": {"id": "c1", "text": "hi"}}],
                "unexpected": true
            }],
            "extra": "ignored"
        });
        let delivery: WebhookDelivery = serde_json::from_value(body).unwrap();
        assert_eq!(delivery.entry.len(), 1);
        assert_eq!(delivery.entry[0].changes[0].field, "comments");
    }

    #[test]
    fn accepts_entries_alias() {
        let delivery: WebhookDelivery =
            serde_json::from_value(json!({"entries": [{"id": "1", "changes": []}]})).unwrap();
        assert_eq!(delivery.entry[0].id, "1");
    }

    #[test]
    fn comment_value_keeps_extra_fields() {
        let value = json!({
            "id": "c1",
            "text": "great post",
            "from": {"id": "u1", "username": "alice"},
            "media": {"id": "m1", "media_product_type": "FEED"},
            "like_count": 3
        });
        let parsed = ChangeValue::parse(EventType::Comments, &value).unwrap();
        let ChangeValue::Comment(comment) = &parsed else {
            panic!("expected comment");
        };
        assert_eq!(comment.text.as_deref(), Some("great post"));
        assert_eq!(comment.extra.get("like_count"), Some(&json!(3)));
        assert_eq!(parsed.source_user_id(), Some("u1"));
    }

    #[test]
    fn message_text_and_hints_cover_both_shapes() {
        let nested = json!({
            "sender": {"id": "u2"},
            "recipient": {"id": "acct"},
            "message": {"mid": "m", "text": "hello"}
        });
        let parsed = ChangeValue::parse(EventType::Messages, &nested).unwrap();
        let ChangeValue::Message(message) = &parsed else {
            panic!("expected message");
        };
        assert_eq!(message.text(), Some("hello"));
        assert_eq!(parsed.source_user_id(), Some("u2"));
        assert_eq!(parsed.subject_hints(), vec!["acct"]);

        let flat = json!({"id": "m2", "from": {"id": "u3"}, "message": "hey"});
        let ChangeValue::Message(message) = ChangeValue::parse(EventType::Messages, &flat).unwrap()
        else {
            panic!("expected message");
        };
        assert_eq!(message.text(), Some("hey"));
    }

    #[test]
    fn comment_without_id_is_rejected() {
        assert!(ChangeValue::parse(EventType::Comments, &json!({"text": "x"})).is_err());
    }

    #[test]
    fn event_type_field_mapping() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::from_field(event_type.as_str()), Some(event_type));
        }
        assert_eq!(EventType::from_field("live_comments"), None);
    }
}
