//! Platform-facing webhook endpoints.
//!
//! - `GET  /webhooks` – subscription verification handshake
//! - `POST /webhooks` – signed event delivery

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use loopin_sdk::objects::WebhookDelivery;
use std::collections::HashMap;

use crate::api::extractors::SignedDelivery;
use crate::state::AppState;

/// Query of the verification handshake. The platform sends dotted
/// `hub.*` names; the bare names are accepted too, and lose when both are
/// present.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifyQuery {
    pub mode: Option<String>,
    pub verify_token: Option<String>,
    pub challenge: Option<String>,
}

impl VerifyQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let pick = |name: &str| {
            params
                .get(&format!("hub.{name}"))
                .or_else(|| params.get(name))
                .cloned()
        };
        Self {
            mode: pick("mode"),
            verify_token: pick("verify_token"),
            challenge: pick("challenge"),
        }
    }
}

/// `GET /webhooks`: echo the challenge when mode and token match.
pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = VerifyQuery::from_params(&params);
    let webhook = state.config.webhook.read().await;
    let accepted = webhook.accepts_verification(
        query.mode.as_deref().unwrap_or_default(),
        query.verify_token.as_deref().unwrap_or_default(),
    );
    drop(webhook);

    if accepted {
        tracing::info!("Webhook subscription verified");
        (StatusCode::OK, query.challenge.unwrap_or_default()).into_response()
    } else {
        tracing::warn!(mode = ?query.mode, "Webhook verification refused");
        StatusCode::FORBIDDEN.into_response()
    }
}

#[derive(Debug)]
pub enum DeliveryError {
    MalformedPayload(serde_json::Error),
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        match self {
            DeliveryError::MalformedPayload(e) => {
                tracing::warn!(error = %e, "Malformed webhook payload");
                (StatusCode::BAD_REQUEST, "malformed payload").into_response()
            }
        }
    }
}

/// `POST /webhooks`: store and dispatch every change of a verified
/// delivery.
///
/// Per-change outcomes never change the response: once the body is
/// authentic and well-formed the platform gets a 200.
pub async fn receive_delivery(
    State(state): State<AppState>,
    SignedDelivery(body): SignedDelivery,
) -> Result<impl IntoResponse, DeliveryError> {
    let delivery: WebhookDelivery =
        serde_json::from_slice(&body).map_err(DeliveryError::MalformedPayload)?;

    let report = state.ingest.ingest(&delivery).await;
    if report.outcomes.is_empty() {
        tracing::debug!(object = ?delivery.object, "Delivery carried no changes");
    }

    Ok(StatusCode::OK)
}
