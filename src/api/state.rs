//! Application state for the API server

use crate::{Config, UpdateEngine};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the engine is itself a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The engine every handler drives
    pub engine: UpdateEngine,

    /// Configuration the server was started with
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: UpdateEngine, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
