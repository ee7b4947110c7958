use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Atomically bump the counter stored under `key`.
///
/// The expiry is only written when the window is created; later increments
/// keep it. An expired row with the same key starts over from one.
pub struct IncrementRateWindow {
    pub key: String,
    pub ttl_ms: i64,
}

impl Processor<IncrementRateWindow> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IncrementRateWindow")]
    async fn process(&self, update: IncrementRateWindow) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO rate_windows (key, count, expires_at)
            VALUES ($1, 1, now() + $2::bigint * interval '1 millisecond')
            ON CONFLICT (key) DO UPDATE
            SET count = CASE
                    WHEN rate_windows.expires_at <= now() THEN 1
                    ELSE rate_windows.count + 1
                END,
                expires_at = CASE
                    WHEN rate_windows.expires_at <= now() THEN EXCLUDED.expires_at
                    ELSE rate_windows.expires_at
                END
            RETURNING count
            "#,
        )
        .bind(update.key)
        .bind(update.ttl_ms)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Current count of an unexpired window, or zero.
pub struct GetRateWindow {
    pub key: String,
}

impl Processor<GetRateWindow> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRateWindow")]
    async fn process(&self, query: GetRateWindow) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count FROM rate_windows WHERE key = $1 AND expires_at > now()",
        )
        .bind(query.key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PruneExpiredRateWindows;

impl Processor<PruneExpiredRateWindows> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PruneExpiredRateWindows")]
    async fn process(&self, _: PruneExpiredRateWindows) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rate_windows WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
