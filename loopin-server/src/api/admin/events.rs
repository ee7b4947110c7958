use axum::{
    Json,
    extract::{Path, Query},
    response::IntoResponse,
};
use loopin_core::store::EventFilter;
use loopin_sdk::objects::{AdminWebhookEventResponse, ListEventsQuery};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, clamp_limit};

/// `GET /events`: newest stored events, optionally filtered.
pub async fn list_events(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let events = state
        .events
        .list(EventFilter {
            processed: query.processed,
            account_id: query.account_id,
            limit: clamp_limit(query.limit),
        })
        .await?;

    let response: Vec<AdminWebhookEventResponse> = events.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `GET /events/{event_id}`: one stored event.
pub async fn get_event(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, AdminApiError> {
    let event = state
        .events
        .get(event_id)
        .await?
        .ok_or(AdminApiError::NotFound)?;

    Ok(Json(AdminWebhookEventResponse::from(event)))
}
