//! Update check handlers.

use crate::api::AppState;
use crate::error::Error;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /state - Current engine status
#[utoipa::path(
    get,
    path = "/api/v1/state",
    tag = "update",
    responses(
        (status = 200, description = "Current state, offer and verdict", body = crate::engine::EngineStatus),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_state(State(state): State<AppState>) -> Response {
    match state.engine.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /update - Update on offer
#[utoipa::path(
    get,
    path = "/api/v1/update",
    tag = "update",
    responses(
        (status = 200, description = "Update on offer", body = crate::types::UpdateCandidate),
        (status = 404, description = "No update is on offer", body = crate::error::ApiError)
    )
)]
pub async fn get_update(State(state): State<AppState>) -> Response {
    match state.engine.update_candidate().await {
        Some(candidate) => (StatusCode::OK, Json(candidate.as_ref().clone())).into_response(),
        None => Error::NotFound("no update is on offer".to_string()).into_response(),
    }
}

/// GET /changelog - Release notes for the update on offer
#[utoipa::path(
    get,
    path = "/api/v1/changelog",
    tag = "update",
    responses(
        (status = 200, description = "Release notes", body = crate::types::ChangelogEntry),
        (status = 404, description = "No release notes for the update on offer", body = crate::error::ApiError)
    )
)]
pub async fn get_changelog(State(state): State<AppState>) -> Response {
    match state.engine.changelog().await {
        Some(entry) => (StatusCode::OK, Json(entry.as_ref().clone())).into_response(),
        None => Error::NotFound("no changelog for the update on offer".to_string())
            .into_response(),
    }
}

/// POST /check - Start an update check
#[utoipa::path(
    post,
    path = "/api/v1/check",
    tag = "update",
    responses(
        (status = 202, description = "Check started"),
        (status = 409, description = "A download or install is in progress", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn check_for_updates(State(state): State<AppState>) -> Response {
    match state.engine.check_for_updates().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "checking"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /configuration/refresh - Re-fetch the remote configuration
#[utoipa::path(
    post,
    path = "/api/v1/configuration/refresh",
    tag = "update",
    responses(
        (status = 200, description = "Refreshed configuration", body = crate::types::RemoteConfiguration),
        (status = 409, description = "A check, download or install is in progress", body = crate::error::ApiError),
        (status = 422, description = "Configuration document unusable", body = crate::error::ApiError),
        (status = 502, description = "Update server unreachable", body = crate::error::ApiError)
    )
)]
pub async fn refresh_configuration(State(state): State<AppState>) -> Response {
    match state.engine.refresh_configuration().await {
        Ok(remote) => (StatusCode::OK, Json(remote)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /reset - Return to idle
#[utoipa::path(
    post,
    path = "/api/v1/reset",
    tag = "update",
    responses(
        (status = 204, description = "Engine reset"),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn reset(State(state): State<AppState>) -> Response {
    match state.engine.reset().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
