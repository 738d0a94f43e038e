//! Artifact download and install handlers.

use super::{InstallFailureRequest, InstallResponse};
use crate::api::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// POST /download - Start downloading the update on offer
#[utoipa::path(
    post,
    path = "/api/v1/download",
    tag = "download",
    responses(
        (status = 202, description = "Download started"),
        (status = 404, description = "No update is on offer", body = crate::error::ApiError),
        (status = 409, description = "Not in a state that allows downloading", body = crate::error::ApiError)
    )
)]
pub async fn start_download(State(state): State<AppState>) -> Response {
    match state.engine.start_download().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "downloading"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /download - Cancel the download, keeping the offer
#[utoipa::path(
    delete,
    path = "/api/v1/download",
    tag = "download",
    responses(
        (status = 204, description = "Download cancelled"),
        (status = 409, description = "No download to cancel", body = crate::error::ApiError)
    )
)]
pub async fn cancel_download(State(state): State<AppState>) -> Response {
    match state.engine.cancel_download().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /download/pause - Pause the download
#[utoipa::path(
    post,
    path = "/api/v1/download/pause",
    tag = "download",
    responses(
        (status = 204, description = "Download paused"),
        (status = 409, description = "No download running", body = crate::error::ApiError)
    )
)]
pub async fn pause_download(State(state): State<AppState>) -> Response {
    match state.engine.pause_download().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /download/resume - Restart a paused download
#[utoipa::path(
    post,
    path = "/api/v1/download/resume",
    tag = "download",
    responses(
        (status = 202, description = "Download restarted"),
        (status = 409, description = "Download is not paused", body = crate::error::ApiError)
    )
)]
pub async fn resume_download(State(state): State<AppState>) -> Response {
    match state.engine.resume_download().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "downloading"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /install - Hand the artifact to the installer
#[utoipa::path(
    post,
    path = "/api/v1/install",
    tag = "download",
    responses(
        (status = 200, description = "Artifact ready to apply", body = InstallResponse),
        (status = 404, description = "Artifact missing", body = crate::error::ApiError),
        (status = 409, description = "Nothing downloaded", body = crate::error::ApiError)
    )
)]
pub async fn request_install(State(state): State<AppState>) -> Response {
    match state.engine.request_install().await {
        Ok(path) => (
            StatusCode::OK,
            Json(InstallResponse {
                path: path.to_string_lossy().into_owned(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /install/failure - Report that the installer failed
#[utoipa::path(
    post,
    path = "/api/v1/install/failure",
    tag = "download",
    request_body(content = InstallFailureRequest, description = "Failure reported by the installer"),
    responses(
        (status = 204, description = "Failure recorded"),
        (status = 409, description = "No install in progress", body = crate::error::ApiError)
    )
)]
pub async fn report_install_failure(
    State(state): State<AppState>,
    Json(request): Json<InstallFailureRequest>,
) -> Response {
    match state.engine.report_install_failure(request.message).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
