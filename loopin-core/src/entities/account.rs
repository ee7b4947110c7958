use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use uuid::Uuid;

/// A connected platform account, the subject events are attributed to.
///
/// Account CRUD lives elsewhere; the webhook pipeline only reads this table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlatformAccount {
    pub id: Uuid,
    /// Platform user id of the account.
    pub platform_user_id: String,
    /// Page id some deliveries use instead of the user id.
    pub platform_page_id: Option<String>,
}

impl PlatformAccount {
    pub fn matches(&self, platform_id: &str) -> bool {
        self.platform_user_id == platform_id
            || self.platform_page_id.as_deref() == Some(platform_id)
    }
}

#[derive(Debug, Clone)]
/// Find the connected account named by any of `platform_ids`.
pub struct FindAccountByPlatformIds {
    pub platform_ids: Vec<String>,
}

impl Processor<FindAccountByPlatformIds> for DatabaseProcessor {
    type Output = Option<PlatformAccount>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindAccountByPlatformIds")]
    async fn process(
        &self,
        query: FindAccountByPlatformIds,
    ) -> Result<Option<PlatformAccount>, sqlx::Error> {
        if query.platform_ids.is_empty() {
            return Ok(None);
        }
        sqlx::query_as::<_, PlatformAccount>(
            r#"
            SELECT id, platform_user_id, platform_page_id
            FROM platform_accounts
            WHERE is_connected = true
              AND (platform_user_id = ANY($1) OR platform_page_id = ANY($1))
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(query.platform_ids)
        .fetch_optional(&self.pool)
        .await
    }
}
