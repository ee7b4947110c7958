//! Durable queue jobs.
//!
//! A job row is keyed by `(queue_name, id)` where `id` is the webhook event
//! id, so enqueueing the same event twice finds the existing row. Retry
//! arithmetic (attempt counting, backoff) is done by the caller; these
//! queries only persist the result.
//!
//! Every claim stamps a `lease_token`. Renewal, completion and failure
//! only touch a row whose token still matches, so a worker whose lease ran
//! out cannot overwrite the state written by the next holder.

use crate::entities::JobStatus;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct QueueJobRow {
    pub queue_name: String,
    pub id: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_ms: i64,
    pub status: JobStatus,
    pub run_at: OffsetDateTime,
    pub locked_until: Option<OffsetDateTime>,
    pub lease_token: Option<Uuid>,
    pub last_error: Option<String>,
}

const JOB_COLUMNS: &str = "queue_name, id, attempts_made, max_attempts, backoff_ms, status, \
     run_at, locked_until, lease_token, last_error";

#[derive(Debug, Clone)]
/// Enqueue a job unless one with the same id is already waiting, delayed,
/// active or completed.
///
/// A `failed` job (retries exhausted) is re-armed with a fresh attempt
/// budget; that is the operator replay path. Returns `true` when the row
/// was created or re-armed.
pub struct EnqueueJob {
    pub queue_name: String,
    pub id: String,
    pub max_attempts: i32,
    pub backoff_ms: i64,
}

impl Processor<EnqueueJob> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:EnqueueJob")]
    async fn process(&self, insert: EnqueueJob) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_jobs (queue_name, id, max_attempts, backoff_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (queue_name, id) DO UPDATE
            SET attempts_made = 0,
                max_attempts = EXCLUDED.max_attempts,
                backoff_ms = EXCLUDED.backoff_ms,
                status = 'waiting',
                run_at = now(),
                locked_until = NULL,
                lease_token = NULL,
                last_error = NULL
            WHERE webhook_jobs.status = 'failed'
            "#,
        )
        .bind(insert.queue_name)
        .bind(insert.id)
        .bind(insert.max_attempts)
        .bind(insert.backoff_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Claim up to `limit` runnable jobs and lease them until `lease_until`
/// under `lease_token`.
///
/// Runnable means `waiting`/`delayed` with `run_at` in the past, or
/// `active` with an expired lease (the previous holder died). Reclaiming
/// an expired lease counts as a failed attempt; the caller parks jobs that
/// come back with their budget spent.
pub struct ClaimJobs {
    pub queue_name: String,
    pub limit: i64,
    pub lease_until: OffsetDateTime,
    pub lease_token: Uuid,
    pub expired_reason: String,
}

impl Processor<ClaimJobs> for DatabaseProcessor {
    type Output = Vec<QueueJobRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimJobs")]
    async fn process(&self, claim: ClaimJobs) -> Result<Vec<QueueJobRow>, sqlx::Error> {
        let sql = format!(
            "UPDATE webhook_jobs \
             SET attempts_made = attempts_made + CASE WHEN status = 'active' THEN 1 ELSE 0 END, \
                 last_error = CASE WHEN status = 'active' THEN $5 ELSE last_error END, \
                 status = 'active', \
                 locked_until = $3, \
                 lease_token = $4 \
             WHERE (queue_name, id) IN ( \
                 SELECT queue_name, id FROM webhook_jobs \
                 WHERE queue_name = $1 \
                   AND ( \
                     (status IN ('waiting', 'delayed') AND run_at <= now()) \
                     OR (status = 'active' AND locked_until <= now()) \
                   ) \
                 ORDER BY run_at ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        sqlx::query_as::<_, QueueJobRow>(&sql)
            .bind(claim.queue_name)
            .bind(claim.limit)
            .bind(claim.lease_until)
            .bind(claim.lease_token)
            .bind(claim.expired_reason)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Move the lease of a running job to `lease_until`. Returns `false` when
/// the lease is no longer held under `lease_token`.
pub struct ExtendJobLease {
    pub queue_name: String,
    pub id: String,
    pub lease_token: Uuid,
    pub lease_until: OffsetDateTime,
}

impl Processor<ExtendJobLease> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ExtendJobLease")]
    async fn process(&self, update: ExtendJobLease) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET locked_until = $4
            WHERE queue_name = $1 AND id = $2 AND lease_token = $3 AND status = 'active'
            "#,
        )
        .bind(update.queue_name)
        .bind(update.id)
        .bind(update.lease_token)
        .bind(update.lease_until)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Returns `false` when the lease is no longer held under `lease_token`.
pub struct CompleteJob {
    pub queue_name: String,
    pub id: String,
    pub lease_token: Uuid,
}

impl Processor<CompleteJob> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CompleteJob")]
    async fn process(&self, update: CompleteJob) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET status = 'completed', locked_until = NULL, lease_token = NULL, last_error = NULL
            WHERE queue_name = $1 AND id = $2 AND lease_token = $3 AND status = 'active'
            "#,
        )
        .bind(update.queue_name)
        .bind(update.id)
        .bind(update.lease_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Persist a failed attempt. `status` is `delayed` (with the next `run_at`)
/// or `failed` once the attempt budget is spent. Returns `false` when the
/// lease is no longer held under `lease_token`.
pub struct RecordJobFailure {
    pub queue_name: String,
    pub id: String,
    pub lease_token: Uuid,
    pub attempts_made: i32,
    pub status: JobStatus,
    pub run_at: OffsetDateTime,
    pub error: String,
}

impl Processor<RecordJobFailure> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordJobFailure")]
    async fn process(&self, update: RecordJobFailure) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_jobs
            SET attempts_made = $4,
                status = $5,
                run_at = $6,
                locked_until = NULL,
                lease_token = NULL,
                last_error = $7
            WHERE queue_name = $1 AND id = $2 AND lease_token = $3 AND status = 'active'
            "#,
        )
        .bind(update.queue_name)
        .bind(update.id)
        .bind(update.lease_token)
        .bind(update.attempts_made)
        .bind(update.status)
        .bind(update.run_at)
        .bind(update.error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
