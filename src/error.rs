//! Error types for ota-hub
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Transport, Parse, Config, etc.)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::ComponentKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for ota-hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ota-hub
///
/// Each variant carries enough context to diagnose the failure from a log line alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "server.base_url")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Fetching a component or artifact failed at the transport level
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A fetched component document could not be turned into a component
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A fetch was cancelled or superseded before it completed
    #[error("fetch of {kind} was cancelled")]
    Cancelled {
        /// Which task was cancelled (e.g., "updates", "artifact")
        kind: String,
    },

    /// The state machine rejected an event in its current state
    #[error("cannot apply {event} while {from}")]
    InvalidTransition {
        /// Name of the state the machine was in
        from: String,
        /// Name of the rejected event
        event: String,
    },

    /// The installed build properties could not be read
    #[error("build properties error: {0}")]
    Properties(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested resource is not available
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Network error outside of a component fetch (client construction, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Transport-level failures while fetching a remote resource
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// No response or no data within the configured timeout
    #[error("timed out after {secs}s waiting for {url}")]
    Timeout {
        /// Requested URL
        url: String,
        /// Timeout that elapsed, in seconds
        secs: u64,
    },

    /// The request could not be sent or the body could not be read
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
        /// Whether the failure looks transient (connect failure, reset)
        transient: bool,
    },

    /// Writing the downloaded data to disk failed
    #[error("failed to write {path}: {reason}")]
    Write {
        /// Local destination path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Failures turning a fetched document into a component
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The document is not valid JSON, or its top-level shape is wrong
    #[error("invalid {kind} document: {reason}")]
    Document {
        /// Component kind being parsed
        kind: ComponentKind,
        /// What was wrong with the document
        reason: String,
    },

    /// The document held no usable entry for this component
    #[error("no valid {kind} entry in document")]
    Empty {
        /// Component kind being parsed
        kind: ComponentKind,
    },

    /// A single entry is missing required fields or carries invalid values
    #[error("malformed {kind} entry at index {index}: {reason}")]
    Malformed {
        /// Component kind being parsed
        kind: ComponentKind,
        /// Position of the entry in the array
        index: usize,
        /// What was wrong with the entry
        reason: String,
    },
}

/// API error response format
///
/// Returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "invalid_transition",
///     "message": "cannot apply download_requested while idle",
///     "details": {
///       "state": "idle",
///       "event": "download_requested"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_transition")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - operation not allowed in the current state
            Error::InvalidTransition { .. } => 409,
            Error::Cancelled { .. } => 409,

            // 422 Unprocessable Entity - remote data was unusable
            Error::Parse(_) => 422,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Properties(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - update server misbehaved
            Error::Transport(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Transport(e) => match e {
                TransportError::Status { .. } => "http_status",
                TransportError::Timeout { .. } => "timeout",
                TransportError::Request { .. } => "request_failed",
                TransportError::Write { .. } => "write_failed",
            },
            Error::Parse(e) => match e {
                ParseError::Document { .. } => "invalid_document",
                ParseError::Empty { .. } => "empty_document",
                ParseError::Malformed { .. } => "malformed_entry",
            },
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Properties(_) => "properties_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InvalidTransition { from, event } => Some(serde_json::json!({
                "state": from,
                "event": event,
            })),
            Error::Transport(TransportError::Status { url, status }) => Some(serde_json::json!({
                "url": url,
                "status": status,
            })),
            Error::Parse(ParseError::Malformed { kind, index, .. }) => Some(serde_json::json!({
                "component": kind.canonical_name(),
                "index": index,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
