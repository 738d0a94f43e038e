//! Update lifecycle state machine
//!
//! All transitions go through [`UpdateStateMachine::apply`], which holds one
//! lock across the decision, the durable write and the broadcast. Listeners
//! therefore see transitions in the order they were applied and never see a
//! state that was not persisted first.

use crate::db::StatusStore;
use crate::error::{Error, Result};
use crate::types::{FailureContext, StateChange, StateEvent, TaskKind, UpdateState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, broadcast, mpsc};

/// Transition table
///
/// Returns the next state, or `None` when `event` is not accepted in `current`.
/// Returning `current` unchanged is a legal no-op.
pub fn next_state(current: &UpdateState, event: &StateEvent) -> Option<UpdateState> {
    use StateEvent as E;
    use UpdateState as S;

    let next = match (current, event) {
        (_, E::Reset) => S::Idle,

        (S::Idle | S::Available | S::Unavailable | S::Error { .. }, E::CheckRequested) => {
            S::Checking
        }
        // A new request restarts the running cycle
        (S::Checking, E::CheckRequested) => S::Checking,

        (S::Checking, E::ConfigFetchFailed { message }) => failure(TaskKind::Config, message),
        (S::Checking, E::ConfigParsed { enabled: false }) => S::Unavailable,
        (S::Checking, E::ConfigParsed { enabled: true }) => S::Checking,
        (S::Checking, E::UpdateFetchFailed { message }) => failure(TaskKind::Update, message),
        (S::Checking, E::UpdateParsed { available: true }) => S::Available,
        (S::Checking, E::UpdateParsed { available: false }) => S::Unavailable,

        (S::Available | S::Suspended, E::DownloadRequested) => S::Downloading,
        (S::Downloading, E::DownloadPaused) => S::Suspended,
        (S::Downloading | S::Suspended, E::DownloadFailed { cancelled: true, .. }) => S::Available,
        (
            S::Downloading,
            E::DownloadFailed {
                cancelled: false,
                message,
            },
        ) => failure(TaskKind::Artifact, message),
        (S::Downloading, E::DownloadCompleted) => S::Downloaded,

        (S::Downloaded, E::InstallRequested) => S::Installing,
        (S::Installing, E::InstallFailed { message }) => failure(TaskKind::Artifact, message),

        _ => return None,
    };
    Some(next)
}

fn failure(kind: TaskKind, message: &str) -> UpdateState {
    UpdateState::Error {
        failure: FailureContext {
            kind,
            cancelled: false,
            message: message.to_string(),
        },
    }
}

/// Bring a persisted state back to something meaningful after a restart
///
/// Work that was in flight when the process stopped did not survive it.
pub fn normalize_restored(state: UpdateState) -> UpdateState {
    match state {
        UpdateState::Checking => UpdateState::Unavailable,
        UpdateState::Downloading | UpdateState::Suspended => UpdateState::Available,
        other => other,
    }
}

/// Receives every state change
pub trait StateListener: Send + Sync {
    /// Called once per transition, in order
    fn on_state_changed(&self, change: &StateChange);
}

impl<F> StateListener for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_changed(&self, change: &StateChange) {
        self(change)
    }
}

/// Per-listener queues, fed by [`UpdateStateMachine::apply`]
///
/// Queues are unbounded so a slow listener delays its own deliveries but
/// never loses one.
#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<StateChange>>,
}

type SharedRegistry = Arc<std::sync::Mutex<ListenerRegistry>>;

fn lock_registry(registry: &SharedRegistry) -> std::sync::MutexGuard<'_, ListenerRegistry> {
    // The registry holds no invariant a panicking holder could break
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a listener registered; dropping it unregisters the listener
///
/// Changes already queued for the listener are still delivered.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    registry: SharedRegistry,
}

impl ListenerHandle {
    /// Unregister the listener
    pub fn unregister(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        lock_registry(&self.registry).senders.remove(&self.id);
    }
}

struct Current {
    state: UpdateState,
    sequence: u64,
}

/// The single authority on the update state
pub struct UpdateStateMachine {
    current: Mutex<Current>,
    store: Arc<dyn StatusStore>,
    event_tx: broadcast::Sender<StateChange>,
    listeners: SharedRegistry,
}

impl UpdateStateMachine {
    /// Create a machine in [`UpdateState::Idle`] backed by `store`
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            current: Mutex::new(Current {
                state: UpdateState::Idle,
                sequence: 0,
            }),
            store,
            event_tx,
            listeners: SharedRegistry::default(),
        }
    }

    /// Current state
    pub async fn state(&self) -> UpdateState {
        self.current.lock().await.state.clone()
    }

    /// Load the persisted state, normalizing interrupted work
    ///
    /// A missing or unreadable value restores to [`UpdateState::Unavailable`].
    pub async fn restore(&self) -> Result<UpdateState> {
        let mut current = self.current.lock().await;

        let persisted = match self.store.current_state().await {
            Ok(Some(raw)) => match serde_json::from_str::<UpdateState>(&raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(error = %e, "Persisted update state is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted update state");
                None
            }
        };

        let restored = persisted
            .clone()
            .map(normalize_restored)
            .unwrap_or(UpdateState::Unavailable);

        if persisted.as_ref() != Some(&restored) {
            self.persist(&restored).await?;
        }

        tracing::info!(
            persisted = persisted.as_ref().map(UpdateState::name).unwrap_or("none"),
            restored = restored.name(),
            "Restored update state"
        );
        current.state = restored.clone();
        Ok(restored)
    }

    /// Apply an event
    ///
    /// Rejected events return [`Error::InvalidTransition`] and change nothing.
    /// Transitions to the same state are accepted but neither persisted nor broadcast.
    pub async fn apply(&self, event: StateEvent) -> Result<UpdateState> {
        let mut current = self.current.lock().await;

        let Some(next) = next_state(&current.state, &event) else {
            tracing::debug!(
                state = current.state.name(),
                event = event.name(),
                "Rejected state event"
            );
            return Err(Error::InvalidTransition {
                from: current.state.name().to_string(),
                event: event.name().to_string(),
            });
        };

        if next == current.state {
            tracing::debug!(state = next.name(), event = event.name(), "State unchanged");
            return Ok(next);
        }

        self.persist(&next).await?;

        let previous = std::mem::replace(&mut current.state, next.clone());
        current.sequence += 1;

        tracing::info!(
            from = previous.name(),
            to = next.name(),
            event = event.name(),
            sequence = current.sequence,
            "Update state changed"
        );

        let change = StateChange {
            sequence: current.sequence,
            previous,
            current: next.clone(),
            event,
            at: Utc::now(),
        };

        // Still under the state lock, so every queue receives changes in sequence order
        lock_registry(&self.listeners)
            .senders
            .retain(|_, tx| tx.send(change.clone()).is_ok());

        // No receivers is not an error
        let _ = self.event_tx.send(change);

        Ok(next)
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.event_tx.subscribe()
    }

    /// Register a callback listener
    ///
    /// The listener runs on its own task and is called exactly once per
    /// transition, in transition order. It stays registered until the
    /// returned handle is dropped. Must be called from within a Tokio runtime.
    pub fn register_listener(&self, listener: Arc<dyn StateListener>) -> ListenerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<StateChange>();
        let id = {
            let mut registry = lock_registry(&self.listeners);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.senders.insert(id, tx);
            id
        };

        // Ends once the handle removed the sender and the queue is drained
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                listener.on_state_changed(&change);
            }
        });

        ListenerHandle {
            id,
            registry: self.listeners.clone(),
        }
    }

    async fn persist(&self, state: &UpdateState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        self.store.set_current_state(&serialized).await.map_err(|e| {
            tracing::error!(state = state.name(), error = %e, "Failed to persist update state");
            e
        })
    }
}
