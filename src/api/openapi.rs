//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the ota-hub REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the ota-hub REST API
///
/// Served at `/api/v1/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ota-hub REST API",
        version = "0.1.0",
        description = "OpenAPI 3.1 compliant REST API for checking, downloading and installing over-the-air updates",
        contact(
            name = "ota-hub",
            url = "https://github.com/jvz-devx/ota-hub"
        ),
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790/api/v1", description = "Local development server")
    ),
    paths(
        // Update
        crate::api::routes::get_state,
        crate::api::routes::get_update,
        crate::api::routes::get_changelog,
        crate::api::routes::check_for_updates,
        crate::api::routes::refresh_configuration,
        crate::api::routes::reset,

        // Download
        crate::api::routes::start_download,
        crate::api::routes::cancel_download,
        crate::api::routes::pause_download,
        crate::api::routes::resume_download,
        crate::api::routes::request_install,
        crate::api::routes::report_install_failure,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
        crate::api::routes::fetch_event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::BuildType,
        crate::types::BuildDescriptor,
        crate::types::UpdateCandidate,
        crate::types::ChangelogEntry,
        crate::types::RemoteConfiguration,
        crate::types::ComponentKind,
        crate::types::TaskKind,
        crate::types::FailureContext,
        crate::types::UpdateState,
        crate::types::StateEvent,
        crate::types::StateChange,

        // Resolution
        crate::resolver::Verdict,
        crate::resolver::Reason,
        crate::engine::EngineStatus,

        // API request/response types from routes
        crate::api::routes::InstallResponse,
        crate::api::routes::InstallFailureRequest,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "update", description = "Update checks - Trigger checks, inspect the offer and its release notes"),
        (name = "download", description = "Artifact download - Start, pause, resume and cancel, then hand off to the installer"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, event streams"),
    )
)]
pub struct ApiDoc;
