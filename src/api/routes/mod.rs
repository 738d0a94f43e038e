//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`update`] - Checks, offer, changelog, configuration refresh, reset
//! - [`download`] - Artifact download and install hand-off
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod download;
mod system;
mod update;

// Re-export all handlers so `routes::function_name` works
pub use download::*;
pub use system::*;
pub use update::*;

// ============================================================================
// Request/Response Types (shared across handlers)
// ============================================================================

/// Response body for POST /install
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct InstallResponse {
    /// Local path of the artifact to apply
    pub path: String,
}

/// Request body for POST /install/failure
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct InstallFailureRequest {
    /// What the installer reported
    pub message: String,
}
