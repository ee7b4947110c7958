use axum::{
    Json,
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use loopin_core::processors::DispatchOutcome;
use loopin_sdk::objects::{
    AdminDeadLetterResponse, ListDeadLettersQuery, ReplayOutcome, ReplayResponse,
};
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

use super::{AdminApiError, clamp_limit};

/// `GET /dead-letters`: newest dead-letter records first.
pub async fn list_dead_letters(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<ListDeadLettersQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let records = state.dead_letters.list(clamp_limit(query.limit)).await?;

    let response: Vec<AdminDeadLetterResponse> = records.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `POST /dead-letters/{record_id}/replay`: hand the event behind a
/// dead-letter record back to the dispatcher.
///
/// The record stays in place; it is the permanent trace of the failure.
pub async fn replay_dead_letter(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
    Path(record_id): Path<Uuid>,
) -> Result<impl IntoResponse, AdminApiError> {
    let record = state
        .dead_letters
        .get(record_id)
        .await?
        .ok_or(AdminApiError::NotFound)?;

    let event = state
        .events
        .get(record.event_id)
        .await?
        .ok_or(AdminApiError::NotFound)?;

    let outcome = if event.processed {
        ReplayOutcome::AlreadyProcessed
    } else {
        state.events.clear_error(event.id).await?;
        match state.dispatcher.dispatch(&event).await? {
            DispatchOutcome::Enqueued => ReplayOutcome::Enqueued,
            DispatchOutcome::AlreadyQueued => ReplayOutcome::AlreadyQueued,
            DispatchOutcome::Processed => ReplayOutcome::Processed,
            DispatchOutcome::Failed(_) => ReplayOutcome::Failed,
        }
    };

    tracing::info!(
        record_id = %record_id,
        event_id = %event.id,
        outcome = ?outcome,
        "Dead letter replayed"
    );

    let status = match outcome {
        ReplayOutcome::Enqueued => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(ReplayResponse {
            event_id: event.id,
            outcome,
        }),
    ))
}
