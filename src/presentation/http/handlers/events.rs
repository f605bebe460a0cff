//! Internal collaborator endpoints.
//!
//! The REST service calls these after committing a mutation. Both return
//! `202 Accepted` once the event is handed to the router; delivery itself is
//! fire-and-forget.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::domain::{PublishRequest, Snowflake};
use crate::shared::error::AppError;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Sessions the dispatch was queued to
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub sessions: usize,
}

/// `POST /internal/events`
pub async fn publish_event(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let outcome = state.gateway.publish_request(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            delivered: outcome.delivered,
        }),
    ))
}

/// `POST /internal/users/{user_id}/invalidate`
pub async fn invalidate_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<InvalidateResponse>), AppError> {
    let user_id: Snowflake = user_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid user id".into()))?;
    let sessions = state.gateway.invalidate_user(user_id);
    Ok((StatusCode::ACCEPTED, Json(InvalidateResponse { sessions })))
}
