//! Update engine wiring the components together.
//!
//! The `UpdateEngine` struct and its methods are organized by concern:
//! - [`check`] - Update check cycle and configuration refresh
//! - [`download`] - Artifact download and install hand-off
//! - [`lifecycle`] - Startup restore, reset and shutdown

mod check;
mod download;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::components::ComponentStore;
use crate::config::Config;
use crate::db::{Database, StatusStore};
use crate::error::{Error, Result};
use crate::orchestrator::{DownloadOrchestrator, Endpoints, HttpTransport, Transport};
use crate::properties::{BuildProperties, PropertiesFile};
use crate::resolver::Verdict;
use crate::state_machine::{ListenerHandle, StateListener, UpdateStateMachine};
use crate::types::{
    ChangelogEntry, FetchEvent, RemoteConfiguration, StateChange, UpdateCandidate, UpdateState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Bookkeeping for work the engine has started
///
/// Held while deciding on and applying a state event, so a check cycle or a
/// download finishing late cannot interleave with a newer request.
#[derive(Default)]
pub(crate) struct Control {
    /// Number of the newest check cycle; older cycles stop applying events
    pub(crate) cycle: u64,
    /// Counter for artifact downloads
    pub(crate) next_download: u64,
    /// Download in flight, if any
    pub(crate) download: Option<ActiveDownload>,
}

/// An artifact download the engine is waiting on
pub(crate) struct ActiveDownload {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
}

/// Result of the latest resolution
#[derive(Default)]
pub(crate) struct Resolution {
    /// Verdict of the last evaluated candidate
    pub(crate) verdict: Option<Verdict>,
    /// Candidate currently on offer
    pub(crate) offered: Option<Arc<UpdateCandidate>>,
}

/// Point-in-time view of the engine
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EngineStatus {
    /// Current update state
    pub state: UpdateState,
    /// Update on offer, if any
    pub update: Option<UpdateCandidate>,
    /// Why the last candidate was or was not offered
    pub verdict: Option<Verdict>,
    /// Latest remote configuration
    pub configuration: Option<RemoteConfiguration>,
    /// Last known kill-switch value, kept across restarts
    pub ota_enabled_cache: Option<bool>,
    /// When an update check was last requested
    pub last_update_check: Option<DateTime<Utc>>,
    /// Local path of the downloaded artifact
    pub artifact_path: Option<String>,
    /// Whether the session before this one ended without a clean shutdown
    pub unclean_previous_session: bool,
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct UpdateEngine {
    /// Status persistence
    /// Public for integration tests to inspect persisted values
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Source of the installed build, read fresh for every resolution
    pub(crate) properties: Arc<dyn BuildProperties>,
    /// Latest parsed remote components
    pub(crate) components: Arc<ComponentStore>,
    /// Single-slot fetch scheduler
    pub(crate) orchestrator: DownloadOrchestrator,
    /// Owner of the update state
    pub(crate) machine: Arc<UpdateStateMachine>,
    /// In-flight work
    pub(crate) control: Arc<Mutex<Control>>,
    /// Latest resolution
    pub(crate) resolution: Arc<RwLock<Resolution>>,
    /// Cleared on shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Recorded by restore, before this session marks itself as running
    pub(crate) unclean_previous_session: Arc<AtomicBool>,
}

impl UpdateEngine {
    /// Create a new engine
    ///
    /// This opens the status database, reads the installed build from the
    /// configured properties file and restores the previous session: cached
    /// components are reloaded and the persisted update state is normalized.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let transport = HttpTransport::new(&config.server)?;
        let properties = PropertiesFile::new(config.properties_path.clone());

        Self::with_parts(config, Arc::new(db), Arc::new(transport), Arc::new(properties)).await
    }

    /// Create an engine from explicit collaborators
    ///
    /// Hosts use this to supply their own transport or build identity.
    pub async fn with_parts(
        config: Config,
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        properties: Arc<dyn BuildProperties>,
    ) -> Result<Self> {
        for dir in [&config.fetch.cache_dir, &config.fetch.download_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        let device_id = match &config.server.device_id {
            Some(device_id) => device_id.clone(),
            None => properties.installed().await?.device_id,
        };
        let endpoints = Endpoints::new(&config.server, device_id)?;

        let components = Arc::new(ComponentStore::new());
        let orchestrator = DownloadOrchestrator::new(
            transport,
            components.clone(),
            endpoints,
            config.fetch.clone(),
        );
        let machine = Arc::new(UpdateStateMachine::new(db.clone()));

        let engine = Self {
            db,
            config: Arc::new(config),
            properties,
            components,
            orchestrator,
            machine,
            control: Arc::new(Mutex::new(Control::default())),
            resolution: Arc::new(RwLock::new(Resolution::default())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            unclean_previous_session: Arc::new(AtomicBool::new(false)),
        };

        engine.restore().await?;
        Ok(engine)
    }

    /// Current update state
    pub async fn state(&self) -> UpdateState {
        self.machine.state().await
    }

    /// Subscribe to state changes
    ///
    /// Multiple subscribers are supported. Each receives every transition in
    /// order; a subscriber more than 1000 transitions behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.machine.subscribe()
    }

    /// Subscribe to fetch progress and completion events
    pub fn subscribe_fetch_events(&self) -> broadcast::Receiver<FetchEvent> {
        self.orchestrator.subscribe()
    }

    /// Register a state listener; it is removed when the handle is dropped
    pub fn register_listener(&self, listener: Arc<dyn StateListener>) -> ListenerHandle {
        self.machine.register_listener(listener)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Update currently on offer
    pub async fn update_candidate(&self) -> Option<Arc<UpdateCandidate>> {
        self.resolution.read().await.offered.clone()
    }

    /// Release notes for the update on offer
    ///
    /// Notes that belong to a different build are not returned.
    pub async fn changelog(&self) -> Option<Arc<ChangelogEntry>> {
        let candidate = self.update_candidate().await?;
        self.components
            .changelog()
            .await
            .filter(|entry| entry.describes(&candidate))
    }

    /// Latest remote configuration
    pub async fn configuration(&self) -> Option<Arc<RemoteConfiguration>> {
        self.components.configuration().await
    }

    /// Verdict of the last resolution
    pub async fn last_verdict(&self) -> Option<Verdict> {
        self.resolution.read().await.verdict
    }

    /// When an update check was last requested
    pub async fn last_update_check(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .db
            .last_update_check()
            .await?
            .and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    /// Collect the engine's current view in one value
    pub async fn status(&self) -> Result<EngineStatus> {
        let (verdict, update) = {
            let resolution = self.resolution.read().await;
            (
                resolution.verdict,
                resolution.offered.as_deref().cloned(),
            )
        };

        Ok(EngineStatus {
            state: self.state().await,
            update,
            verdict,
            configuration: self.configuration().await.as_deref().copied(),
            ota_enabled_cache: self.db.ota_enabled_cache().await?,
            last_update_check: self.last_update_check().await?,
            artifact_path: self.db.artifact_path().await?,
            unclean_previous_session: self.previous_session_was_unclean(),
        })
    }

    /// Whether the previous session ended without [`shutdown`](Self::shutdown)
    ///
    /// Always `false` for the first session on a database.
    pub fn previous_session_was_unclean(&self) -> bool {
        self.unclean_previous_session.load(Ordering::SeqCst)
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let engine = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(engine, config).await })
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}
