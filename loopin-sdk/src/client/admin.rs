//! Admin API client (operator tooling → Loopin server).
//!
//! All requests carry the plaintext admin secret in the
//! `Loopin-Admin-Authorization` header.

use reqwest::Client;
use url::Url;
use uuid::Uuid;

use super::{ClientError, parse_response};
use crate::objects::admin::{
    AdminDeadLetterResponse, AdminWebhookEventResponse, ListDeadLettersQuery, ListEventsQuery,
    ReplayResponse,
};
use crate::signature::ADMIN_AUTH_HEADER;

/// Typed HTTP client for the Loopin **Admin API**.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    base_url: Url,
    admin_secret: String,
}

impl AdminClient {
    /// Create a new `AdminClient`.
    ///
    /// * `base_url` – root URL of the Loopin server.
    /// * `admin_secret` – the plaintext admin secret.
    pub fn new(base_url: Url, admin_secret: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            admin_secret: admin_secret.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `GET /api/v1/admin/events` – list stored webhook events.
    pub async fn list_events(
        &self,
        query: &ListEventsQuery,
    ) -> Result<Vec<AdminWebhookEventResponse>, ClientError> {
        let url = self.base_url.join("/api/v1/admin/events")?;
        let resp = self
            .http
            .get(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret)
            .query(query)
            .send()
            .await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/admin/events/{event_id}` – fetch one stored event.
    pub async fn get_event(&self, event_id: Uuid) -> Result<AdminWebhookEventResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/admin/events/{event_id}"))?;
        let resp = self
            .http
            .get(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret)
            .send()
            .await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/admin/dead-letters` – list dead-letter records.
    pub async fn list_dead_letters(
        &self,
        query: &ListDeadLettersQuery,
    ) -> Result<Vec<AdminDeadLetterResponse>, ClientError> {
        let url = self.base_url.join("/api/v1/admin/dead-letters")?;
        let resp = self
            .http
            .get(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret)
            .query(query)
            .send()
            .await?;
        parse_response(resp).await
    }

    /// `POST /api/v1/admin/dead-letters/{record_id}/replay` – re-dispatch the
    /// event behind a dead-letter record.
    pub async fn replay_dead_letter(&self, record_id: Uuid) -> Result<ReplayResponse, ClientError> {
        let url = self
            .base_url
            .join(&format!("/api/v1/admin/dead-letters/{record_id}/replay"))?;
        let resp = self
            .http
            .post(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret)
            .send()
            .await?;
        parse_response(resp).await
    }
}
