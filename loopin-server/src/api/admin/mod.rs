//! Admin API handlers.
//!
//! These endpoints are called by operator tooling and require the
//! `Loopin-Admin-Authorization` header with the plaintext admin secret.
//!
//! # Endpoints
//!
//! - `GET  /events`                          – list stored events (filterable)
//! - `GET  /events/{event_id}`               – show one stored event
//! - `GET  /dead-letters`                    – list dead-letter records
//! - `POST /dead-letters/{record_id}/replay` – re-dispatch a dead-lettered event

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use loopin_core::processors::DispatchError;
use loopin_core::queue::QueueError;
use loopin_core::store::StoreError;

use crate::state::AppState;

mod events;
mod replay;

/// Build the Admin API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(events::list_events))
        .route("/events/{event_id}", get(events::get_event))
        .route("/dead-letters", get(replay::list_dead_letters))
        .route(
            "/dead-letters/{record_id}/replay",
            post(replay::replay_dead_letter),
        )
}

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

pub(crate) fn clamp_limit(limit: Option<u32>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize
}

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

/// Errors that can occur in Admin API handlers.
#[derive(Debug)]
pub(crate) enum AdminApiError {
    Store(StoreError),
    Queue(QueueError),
    Dispatch(DispatchError),
    NotFound,
}

impl From<StoreError> for AdminApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<QueueError> for AdminApiError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<DispatchError> for AdminApiError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AdminApiError::Store(e) => {
                tracing::error!(error = %e, "Admin API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AdminApiError::Queue(e) => {
                tracing::error!(error = %e, "Admin API queue error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AdminApiError::Dispatch(e) => {
                tracing::error!(error = %e, "Admin API dispatch error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AdminApiError::NotFound => {
                (StatusCode::NOT_FOUND, "resource not found").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 500);
        assert_eq!(clamp_limit(Some(20)), 20);
    }
}
