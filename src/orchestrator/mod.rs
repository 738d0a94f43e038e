//! Download orchestration
//!
//! [`DownloadOrchestrator`] runs at most one fetch at a time. Starting a new
//! fetch cancels whatever is in flight, and the cancelled fetch reports
//! `Failure(cancelled)` instead of a result. Metadata fetches wait out a quiet
//! period first, so bursts of requests collapse into the last one.
//!
//! Every fetch writes to a generation-tagged `.part` file and is renamed into
//! place only if it is still current, under the same lock that supersedes it.
//! A cached component therefore never holds a partial or out-of-order document.

use crate::components::{Component, ComponentStore, cache_file};
use crate::config::{FetchConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::retry::fetch_with_retry;
use crate::types::{ComponentKind, FetchEvent, TaskKind, UpdateCandidate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

mod transport;

pub use transport::{HttpTransport, ProgressFn, Transport};

/// Minimum byte distance between two progress events
const PROGRESS_STEP_BYTES: u64 = 1024 * 1024;

/// Server endpoint layout
///
/// Components live directly below the base URL; the update candidate is
/// per-device under `updates/<device>`.
#[derive(Clone, Debug)]
pub struct Endpoints {
    base: Url,
    device_id: String,
}

impl Endpoints {
    /// Build the endpoint layout for `device_id`
    pub fn new(config: &ServerConfig, device_id: impl Into<String>) -> Result<Self> {
        let mut base_url = config.base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL {:?}: {}", config.base_url, e),
            key: Some("server.base_url".to_string()),
        })?;

        Ok(Self {
            base,
            device_id: device_id.into(),
        })
    }

    /// Device the update endpoint is built for
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// URL of a component document
    pub fn component_url(&self, kind: ComponentKind) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| Error::Config {
                message: format!("{} cannot be used as a base URL", self.base),
                key: Some("server.base_url".to_string()),
            })?;
            segments.pop_if_empty().push(kind.canonical_name());
            if kind == ComponentKind::Update {
                segments.push(&self.device_id);
            }
        }
        Ok(url)
    }
}

/// Identifies one fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    /// What is being fetched
    pub kind: TaskKind,
    /// Orchestrator-wide sequence number of the fetch
    pub generation: u64,
}

/// How a fetch ended
#[derive(Debug)]
pub enum FetchOutcome {
    /// The file is in place; metadata fetches also carry the parsed component
    Success {
        /// Final local path
        path: PathBuf,
        /// Parsed component, `None` for artifacts
        component: Option<Component>,
    },
    /// The fetch, or parsing its result, failed
    Failed(Error),
    /// Cancelled or superseded before completing
    Cancelled,
}

impl FetchOutcome {
    /// Whether the fetch was cancelled or superseded
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchOutcome::Cancelled)
    }
}

/// Handle to a running fetch
pub struct FetchHandle {
    ticket: FetchTicket,
    token: CancellationToken,
    outcome: oneshot::Receiver<FetchOutcome>,
}

impl FetchHandle {
    /// Identity of the fetch
    pub fn ticket(&self) -> FetchTicket {
        self.ticket
    }

    /// Cancel the fetch; its outcome becomes [`FetchOutcome::Cancelled`]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this fetch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the fetch to finish
    pub async fn outcome(self) -> FetchOutcome {
        self.outcome.await.unwrap_or(FetchOutcome::Cancelled)
    }
}

struct ActiveFetch {
    ticket: FetchTicket,
    token: CancellationToken,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveFetch>,
    next_generation: u64,
    latest: HashMap<TaskKind, u64>,
}

/// Single-slot fetch scheduler
#[derive(Clone)]
pub struct DownloadOrchestrator {
    transport: Arc<dyn Transport>,
    store: Arc<ComponentStore>,
    endpoints: Endpoints,
    settings: Arc<FetchConfig>,
    slot: Arc<Mutex<Slot>>,
    event_tx: broadcast::Sender<FetchEvent>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator that stores parsed components in `store`
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ComponentStore>,
        endpoints: Endpoints,
        settings: FetchConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            transport,
            store,
            endpoints,
            settings: Arc::new(settings),
            slot: Arc::new(Mutex::new(Slot::default())),
            event_tx,
        }
    }

    /// Subscribe to fetch progress and completion events
    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.event_tx.subscribe()
    }

    /// Endpoint layout in use
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Start fetching a component document
    ///
    /// Any fetch in flight, of any kind, is superseded. The transfer starts
    /// after the quiet period, unless it is superseded in the meantime.
    pub async fn fetch(&self, kind: ComponentKind) -> Result<FetchHandle> {
        let url = self.endpoints.component_url(kind)?;
        let destination = cache_file(&self.settings.cache_dir, kind);
        Ok(self
            .start(kind.into(), url, destination, self.settings.quiet_period)
            .await)
    }

    /// Start downloading the artifact of `candidate`, superseding any fetch in flight
    pub async fn download_artifact(&self, candidate: &UpdateCandidate) -> Result<FetchHandle> {
        let url = Url::parse(&candidate.download_url).map_err(|e| Error::Config {
            message: format!("invalid download URL {:?}: {}", candidate.download_url, e),
            key: None,
        })?;
        let destination = self.artifact_path(candidate);
        Ok(self
            .start(TaskKind::Artifact, url, destination, Duration::ZERO)
            .await)
    }

    /// Where the artifact of `candidate` is stored
    pub fn artifact_path(&self, candidate: &UpdateCandidate) -> PathBuf {
        self.settings.download_dir.join(&candidate.file_name)
    }

    /// The fetch currently in flight, if any
    pub async fn active(&self) -> Option<FetchTicket> {
        self.slot.lock().await.active.as_ref().map(|a| a.ticket)
    }

    /// Whether `ticket` is the newest fetch of its kind
    pub async fn is_latest(&self, ticket: FetchTicket) -> bool {
        self.slot.lock().await.latest.get(&ticket.kind) == Some(&ticket.generation)
    }

    /// Cancel the fetch in flight; returns whether there was one
    pub async fn cancel_active(&self) -> bool {
        match self.slot.lock().await.active.take() {
            Some(active) => {
                tracing::debug!(kind = %active.ticket.kind, generation = active.ticket.generation, "Cancelling fetch");
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    async fn start(
        &self,
        kind: TaskKind,
        url: Url,
        destination: PathBuf,
        delay: Duration,
    ) -> FetchHandle {
        let token = CancellationToken::new();
        let ticket = {
            let mut slot = self.slot.lock().await;
            if let Some(previous) = slot.active.take() {
                tracing::debug!(
                    superseded = %previous.ticket.kind,
                    generation = previous.ticket.generation,
                    by = %kind,
                    "Superseding in-flight fetch"
                );
                previous.token.cancel();
            }
            slot.next_generation += 1;
            let ticket = FetchTicket {
                kind,
                generation: slot.next_generation,
            };
            slot.latest.insert(kind, ticket.generation);
            slot.active = Some(ActiveFetch {
                ticket,
                token: token.clone(),
            });
            ticket
        };

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            let outcome = this
                .run(ticket, &url, &destination, delay, &task_token)
                .await;
            this.release(ticket).await;
            this.publish(ticket, &outcome);
            // Nobody waiting is fine; the event already went out
            let _ = tx.send(outcome);
        });

        FetchHandle {
            ticket,
            token,
            outcome: rx,
        }
    }

    async fn run(
        &self,
        ticket: FetchTicket,
        url: &Url,
        destination: &Path,
        delay: Duration,
        token: &CancellationToken,
    ) -> FetchOutcome {
        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if token.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        let _ = self.event_tx.send(FetchEvent::Started {
            kind: ticket.kind,
            generation: ticket.generation,
        });
        tracing::info!(kind = %ticket.kind, generation = ticket.generation, url = %url, "Fetch started");

        if let Some(parent) = destination.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return FetchOutcome::Failed(Error::Io(e));
        }
        if let Err(e) = remove_if_exists(destination).await {
            return FetchOutcome::Failed(Error::Io(e));
        }

        let part = part_path(destination, ticket.generation);
        let last_reported = AtomicU64::new(0);
        let events = self.event_tx.clone();
        let progress = move |bytes: u64, total: Option<u64>| {
            let previous = last_reported.load(Ordering::Relaxed);
            let finished = total == Some(bytes);
            if bytes == 0 || finished || bytes.saturating_sub(previous) >= PROGRESS_STEP_BYTES {
                last_reported.store(bytes, Ordering::Relaxed);
                let _ = events.send(FetchEvent::Progress {
                    kind: ticket.kind,
                    generation: ticket.generation,
                    bytes,
                    total,
                });
            }
        };

        let transfer = fetch_with_retry(&self.settings.retry, || {
            self.transport.fetch(url, &part, &progress)
        });

        let result = tokio::select! {
            _ = token.cancelled() => None,
            result = transfer => Some(result),
        };

        match result {
            None => {
                discard(&part).await;
                FetchOutcome::Cancelled
            }
            Some(Err(e)) => {
                discard(&part).await;
                FetchOutcome::Failed(Error::Transport(e))
            }
            Some(Ok(bytes)) => {
                tracing::debug!(kind = %ticket.kind, bytes, "Transfer finished, committing");
                self.commit(ticket, &part, destination, token).await
            }
        }
    }

    /// Move the finished file into place and parse it, unless superseded meanwhile
    async fn commit(
        &self,
        ticket: FetchTicket,
        part: &Path,
        destination: &Path,
        token: &CancellationToken,
    ) -> FetchOutcome {
        // Superseding happens under this lock, so holding it makes the check and the
        // rename atomic with respect to newer fetches.
        let _slot = self.slot.lock().await;
        if token.is_cancelled() {
            discard(part).await;
            return FetchOutcome::Cancelled;
        }

        if let Err(e) = tokio::fs::rename(part, destination).await {
            discard(part).await;
            return FetchOutcome::Failed(Error::Io(e));
        }

        match ticket.kind.component() {
            Some(kind) => match self.store.ingest_file(kind, destination).await {
                Ok(component) => FetchOutcome::Success {
                    path: destination.to_path_buf(),
                    component: Some(component),
                },
                Err(e) => FetchOutcome::Failed(e),
            },
            None => FetchOutcome::Success {
                path: destination.to_path_buf(),
                component: None,
            },
        }
    }

    async fn release(&self, ticket: FetchTicket) {
        let mut slot = self.slot.lock().await;
        if slot.active.as_ref().is_some_and(|a| a.ticket == ticket) {
            slot.active = None;
        }
    }

    fn publish(&self, ticket: FetchTicket, outcome: &FetchOutcome) {
        let event = match outcome {
            FetchOutcome::Success { path, .. } => {
                tracing::info!(kind = %ticket.kind, generation = ticket.generation, path = %path.display(), "Fetch succeeded");
                FetchEvent::Success {
                    kind: ticket.kind,
                    generation: ticket.generation,
                    path: path.clone(),
                }
            }
            FetchOutcome::Failed(e) => {
                tracing::warn!(kind = %ticket.kind, generation = ticket.generation, error = %e, "Fetch failed");
                FetchEvent::Failure {
                    kind: ticket.kind,
                    generation: ticket.generation,
                    cancelled: false,
                    error: e.to_string(),
                }
            }
            FetchOutcome::Cancelled => {
                tracing::debug!(kind = %ticket.kind, generation = ticket.generation, "Fetch cancelled");
                FetchEvent::Failure {
                    kind: ticket.kind,
                    generation: ticket.generation,
                    cancelled: true,
                    error: "cancelled".to_string(),
                }
            }
        };
        let _ = self.event_tx.send(event);
    }
}

fn part_path(destination: &Path, generation: u64) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{generation}.part"));
    destination.with_file_name(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
