//! Queue job and dead-letter wire schemas.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Payload of a webhook job. The job id is the event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJobPayload {
    pub event_id: Uuid,
}

/// Record written to the dead-letter queue once a job exhausts its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterPayload {
    pub original_queue: String,
    pub event_id: Uuid,
    pub job_id: String,
    pub attempts_made: u32,
    pub failed_reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_uses_camel_case_schema() {
        let payload = DeadLetterPayload {
            original_queue: "webhook-events".to_string(),
            event_id: Uuid::nil(),
            job_id: Uuid::nil().to_string(),
            attempts_made: 3,
            failed_reason: "boom".to_string(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&payload).unwrap();
        for key in [
            "originalQueue",
            "eventId",
            "jobId",
            "attemptsMade",
            "failedReason",
            "timestamp",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
