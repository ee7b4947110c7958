use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use loopin_sdk::objects::{AdminDeadLetterResponse, DeadLetterPayload};
use time::OffsetDateTime;
use uuid::Uuid;

/// A job that exhausted its retries. Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    /// Name of the dead-letter queue the record was written to.
    pub queue_name: String,
    pub original_queue: String,
    pub event_id: Uuid,
    pub job_id: String,
    pub attempts_made: i32,
    pub failed_reason: String,
    pub failed_at: OffsetDateTime,
}

impl DeadLetterRecord {
    pub fn payload(&self) -> DeadLetterPayload {
        DeadLetterPayload {
            original_queue: self.original_queue.clone(),
            event_id: self.event_id,
            job_id: self.job_id.clone(),
            attempts_made: u32::try_from(self.attempts_made).unwrap_or_default(),
            failed_reason: self.failed_reason.clone(),
            timestamp: self.failed_at,
        }
    }
}

impl From<DeadLetterRecord> for AdminDeadLetterResponse {
    fn from(record: DeadLetterRecord) -> Self {
        Self {
            id: record.id,
            original_queue: record.original_queue,
            event_id: record.event_id,
            job_id: record.job_id,
            attempts_made: u32::try_from(record.attempts_made).unwrap_or_default(),
            failed_reason: record.failed_reason,
            timestamp: record.failed_at.unix_timestamp(),
        }
    }
}

const DEAD_LETTER_COLUMNS: &str =
    "id, queue_name, original_queue, event_id, job_id, attempts_made, failed_reason, failed_at";

#[derive(Debug, Clone)]
pub struct InsertDeadLetter {
    pub queue_name: String,
    pub payload: DeadLetterPayload,
}

impl Processor<InsertDeadLetter> for DatabaseProcessor {
    type Output = DeadLetterRecord;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDeadLetter")]
    async fn process(&self, insert: InsertDeadLetter) -> Result<DeadLetterRecord, sqlx::Error> {
        let InsertDeadLetter {
            queue_name,
            payload,
        } = insert;
        let sql = format!(
            "INSERT INTO dead_letters \
             (id, queue_name, original_queue, event_id, job_id, attempts_made, failed_reason, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {DEAD_LETTER_COLUMNS}"
        );
        sqlx::query_as::<_, DeadLetterRecord>(&sql)
            .bind(Uuid::now_v7())
            .bind(queue_name)
            .bind(payload.original_queue)
            .bind(payload.event_id)
            .bind(payload.job_id)
            .bind(i32::try_from(payload.attempts_made).unwrap_or(i32::MAX))
            .bind(payload.failed_reason)
            .bind(payload.timestamp)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Newest first.
pub struct ListDeadLetters {
    pub queue_name: String,
    pub limit: i64,
}

impl Processor<ListDeadLetters> for DatabaseProcessor {
    type Output = Vec<DeadLetterRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDeadLetters")]
    async fn process(&self, query: ListDeadLetters) -> Result<Vec<DeadLetterRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters \
             WHERE queue_name = $1 \
             ORDER BY failed_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, DeadLetterRecord>(&sql)
            .bind(query.queue_name)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetDeadLetterById {
    pub id: Uuid,
}

impl Processor<GetDeadLetterById> for DatabaseProcessor {
    type Output = Option<DeadLetterRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDeadLetterById")]
    async fn process(&self, query: GetDeadLetterById) -> Result<Option<DeadLetterRecord>, sqlx::Error> {
        let sql = format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = $1");
        sqlx::query_as::<_, DeadLetterRecord>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}
