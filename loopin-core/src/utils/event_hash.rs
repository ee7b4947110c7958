//! Idempotency hash for webhook changes.
//!
//! The hash is SHA-256 over the JSON encoding of `{account_id, field,
//! value}`. `serde_json` keeps object keys in a `BTreeMap`, so keys come
//! out sorted at every depth and a redelivery whose keys arrive in a
//! different order still collides with the original.

use serde_json::{Value, json};
use uuid::Uuid;

/// Compute the hex-encoded idempotency hash of a change.
pub fn event_hash(account_id: Uuid, field: &str, value: &Value) -> String {
    let canonical = json!({
        "account_id": account_id,
        "field": field,
        "value": value,
    })
    .to_string();

    let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
    hex::encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let account = Uuid::new_v4();
        let a: Value = serde_json::from_str(
            r#"{"id":"c1","text":"hi","from":{"id":"u1","username":"alice"}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"from":{"username":"alice","id":"u1"},"text":"hi","id":"c1"}"#,
        )
        .unwrap();
        assert_eq!(event_hash(account, "comments", &a), event_hash(account, "comments", &b));
    }

    #[test]
    fn every_component_feeds_the_hash() {
        let account = Uuid::new_v4();
        let value = serde_json::json!({"id": "c1"});
        let base = event_hash(account, "comments", &value);

        assert_ne!(base, event_hash(Uuid::new_v4(), "comments", &value));
        assert_ne!(base, event_hash(account, "mentions", &value));
        assert_ne!(
            base,
            event_hash(account, "comments", &serde_json::json!({"id": "c2"}))
        );
    }

    #[test]
    fn array_order_is_significant() {
        let account = Uuid::nil();
        assert_ne!(
            event_hash(account, "f", &serde_json::json!([1, 2])),
            event_hash(account, "f", &serde_json::json!([2, 1]))
        );
    }

    #[test]
    fn hash_covers_sorted_compact_json() {
        let account = Uuid::nil();
        let value = serde_json::json!({"text": "hi", "id": "c1"});
        let expected = ring::digest::digest(
            &ring::digest::SHA256,
            br#"{"account_id":"00000000-0000-0000-0000-000000000000","field":"comments","value":{"id":"c1","text":"hi"}}"#,
        );
        assert_eq!(
            event_hash(account, "comments", &value),
            hex::encode(expected.as_ref())
        );
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = event_hash(Uuid::nil(), "comments", &Value::Null);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
