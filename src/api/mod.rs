//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for triggering update checks,
//! driving the artifact download and following state changes.

use crate::{Config, Result, UpdateEngine};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Update
/// - `GET /state` - Current state, offer, verdict and kill-switch
/// - `GET /update` - Update on offer
/// - `GET /changelog` - Release notes for the update on offer
/// - `POST /check` - Start an update check
/// - `POST /configuration/refresh` - Re-fetch the remote configuration
/// - `POST /reset` - Return to idle
///
/// ## Download
/// - `POST /download` - Start downloading the update on offer
/// - `DELETE /download` - Cancel the download
/// - `POST /download/pause` - Pause the download
/// - `POST /download/resume` - Resume a paused download
/// - `POST /install` - Hand the artifact to the installer
/// - `POST /install/failure` - Report that installing failed
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent state changes
/// - `GET /events/fetch` - Server-sent fetch progress
pub fn create_router(engine: UpdateEngine, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let router = Router::new()
        // Update
        .route("/state", get(routes::get_state))
        .route("/update", get(routes::get_update))
        .route("/changelog", get(routes::get_changelog))
        .route("/check", post(routes::check_for_updates))
        .route(
            "/configuration/refresh",
            post(routes::refresh_configuration),
        )
        .route("/reset", post(routes::reset))
        // Download
        .route(
            "/download",
            post(routes::start_download).delete(routes::cancel_download),
        )
        .route("/download/pause", post(routes::pause_download))
        .route("/download/resume", post(routes::resume_download))
        .route("/install", post(routes::request_install))
        .route("/install/failure", post(routes::report_install_failure))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .route("/events/fetch", get(routes::fetch_event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// An empty list or `"*"` allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops, either due to an error or because the
/// surrounding task is aborted.
///
/// # Example
///
/// ```no_run
/// use ota_hub::{Config, UpdateEngine};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = UpdateEngine::new(Config::default()).await?;
/// let config = engine.get_config();
///
/// // Start API server (blocks until shutdown)
/// ota_hub::api::start_api_server(engine, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(engine: UpdateEngine, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
