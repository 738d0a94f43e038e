//! System handlers: health, OpenAPI, event streams.

use crate::api::AppState;
use crate::types::FetchEvent;
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// GET /events - Server-sent state changes
///
/// Each SSE event is named after the state event that caused the transition
/// and carries the full `StateChange` as JSON.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.subscribe())
        .filter_map(|result| to_sse(result, |change| change.event.name()));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /events/fetch - Server-sent fetch progress
#[utoipa::path(
    get,
    path = "/api/v1/events/fetch",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent fetch events (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn fetch_event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.subscribe_fetch_events())
        .filter_map(|result| to_sse(result, fetch_event_name));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn fetch_event_name(event: &FetchEvent) -> &'static str {
    match event {
        FetchEvent::Started { .. } => "started",
        FetchEvent::Progress { .. } => "progress",
        FetchEvent::Success { .. } => "success",
        FetchEvent::Failure { .. } => "failure",
    }
}

/// Turn a broadcast item into an SSE event; lagging clients get an `error` event
fn to_sse<T: Serialize>(
    result: Result<T, BroadcastStreamRecvError>,
    name: impl Fn(&T) -> &'static str,
) -> Option<Result<SseEvent, Infallible>> {
    match result {
        Ok(item) => match serde_json::to_string(&item) {
            Ok(data) => Some(Ok(SseEvent::default().event(name(&item)).data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event to JSON");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    }
}
