//! # ota-hub
//!
//! Update resolution and orchestration engine for over-the-air system updates.
//!
//! ## Design Philosophy
//!
//! ota-hub is designed to be:
//! - **Correct under partial failure** - Stale caches, disabled servers and
//!   superseded fetches never leave the state machine stuck
//! - **Sensible defaults** - Works out of the box against a catalog server
//! - **Library-first** - No UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to state changes, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use ota_hub::{Config, UpdateEngine, UpdateState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.server.base_url = "https://ota.example.com/api/".to_string();
//!
//!     let engine = UpdateEngine::new(config).await?;
//!
//!     // Subscribe to state changes
//!     let mut changes = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(change) = changes.recv().await {
//!             println!("{} -> {}", change.previous, change.current);
//!         }
//!     });
//!
//!     engine.check_for_updates().await?;
//!     if engine.state().await == UpdateState::Available {
//!         engine.start_download().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Parsed remote components and their cache
pub mod components;
/// Configuration types
pub mod config;
/// Status persistence layer
pub mod db;
/// Update engine (decomposed into focused submodules)
mod engine;
/// Error types
pub mod error;
/// Single-slot fetch scheduling for metadata and artifacts
pub mod orchestrator;
/// Installed build identity
pub mod properties;
/// Update availability decisions
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Periodic update checks
pub mod scheduler;
/// Update state machine
pub mod state_machine;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use components::{Component, ComponentStore};
pub use config::{Config, PolicyConfig, ServerConfig};
pub use db::{Database, StatusStore};
pub use engine::{EngineStatus, UpdateEngine};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, ParseError, Result, ToHttpStatus, TransportError,
};
pub use orchestrator::{DownloadOrchestrator, FetchHandle, FetchOutcome, HttpTransport, Transport};
pub use properties::{BuildProperties, PropertiesFile, StaticProperties};
pub use resolver::{Reason, Verdict, evaluate, resolve};
pub use scheduler::UpdateScheduler;
pub use state_machine::{ListenerHandle, StateListener, UpdateStateMachine};
pub use types::{
    BuildDescriptor, BuildType, ChangelogEntry, ComponentKind, FetchEvent, RemoteConfiguration,
    StateChange, StateEvent, TaskKind, UpdateCandidate, UpdateState, VersionNumber,
};

/// Helper function to run the engine with periodic checks and graceful signal handling.
///
/// Starts the [`UpdateScheduler`], waits for a termination signal, stops the
/// scheduler and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use ota_hub::{Config, UpdateEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let engine = UpdateEngine::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: UpdateEngine) -> Result<()> {
    let stop = tokio_util::sync::CancellationToken::new();
    let scheduler = tokio::spawn(UpdateScheduler::new(engine.clone()).run(stop.clone()));

    wait_for_signal().await;

    stop.cancel();
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "Update scheduler task ended abnormally");
    }
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
