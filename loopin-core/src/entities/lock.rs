use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Take `key` for `token` unless an unexpired holder exists. Expiry is
/// computed from the database clock.
///
/// Returns `true` when this call now holds the lock.
pub struct AcquireLock {
    pub key: String,
    pub token: String,
    pub ttl_ms: i64,
}

impl Processor<AcquireLock> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:AcquireLock")]
    async fn process(&self, acquire: AcquireLock) -> Result<bool, sqlx::Error> {
        let acquired = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO distributed_locks (key, token, expires_at)
            VALUES ($1, $2, now() + $3::bigint * interval '1 millisecond')
            ON CONFLICT (key) DO UPDATE
            SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
            WHERE distributed_locks.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(acquire.key)
        .bind(acquire.token)
        .bind(acquire.ttl_ms)
        .fetch_optional(&self.pool)
        .await?;
        Ok(acquired.is_some())
    }
}

#[derive(Debug, Clone)]
/// Delete `key` only while it still carries `token`.
///
/// Returns `true` when a row was removed.
pub struct ReleaseLock {
    pub key: String,
    pub token: String,
}

impl Processor<ReleaseLock> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReleaseLock")]
    async fn process(&self, release: ReleaseLock) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE key = $1 AND token = $2")
            .bind(release.key)
            .bind(release.token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PruneExpiredLocks;

impl Processor<PruneExpiredLocks> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PruneExpiredLocks")]
    async fn process(&self, _: PruneExpiredLocks) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
