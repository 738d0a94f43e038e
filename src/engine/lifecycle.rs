//! Startup restore, reset and shutdown coordination.

use crate::db::StatusStore;
use crate::error::Result;
use crate::types::{StateEvent, UpdateState};
use std::path::Path;
use std::sync::atomic::Ordering;

use super::UpdateEngine;

impl UpdateEngine {
    /// Restore the previous session
    ///
    /// Reloads cached components, restores the persisted state and re-establishes
    /// the offer it refers to. The very first session on a database starts in
    /// `Idle`; later sessions fall back to `Unavailable` when nothing usable
    /// was persisted. A restored offer whose candidate or artifact is
    /// gone is dropped with a reset to `Idle`.
    pub(crate) async fn restore(&self) -> Result<()> {
        let first_session = self.db.is_first_session().await?;
        // Must be read before set_clean_start marks this session as running
        let unclean = !first_session && self.db.was_unclean_shutdown().await?;
        if unclean {
            tracing::warn!("Previous session did not shut down cleanly");
        }
        self.unclean_previous_session.store(unclean, Ordering::SeqCst);
        self.db.set_clean_start().await?;

        let loaded = self
            .components
            .warm_from_cache(&self.config.fetch.cache_dir)
            .await;
        tracing::debug!(components = ?loaded, "Loaded cached components");

        if first_session {
            tracing::info!("First session, starting idle");
            return Ok(());
        }

        let state = self.machine.restore().await?;
        let needs_offer = matches!(
            state,
            UpdateState::Available | UpdateState::Downloaded | UpdateState::Installing
        );
        if !needs_offer {
            return Ok(());
        }

        let Some(candidate) = self.components.update_candidate().await else {
            tracing::warn!(state = state.name(), "Restored state refers to an update that is no longer cached");
            self.machine.apply(StateEvent::Reset).await?;
            return Ok(());
        };

        if state != UpdateState::Available {
            let artifact = self.db.artifact_path().await?;
            let present = match &artifact {
                Some(path) => tokio::fs::try_exists(Path::new(path))
                    .await
                    .unwrap_or(false),
                None => false,
            };
            if !present {
                tracing::warn!(state = state.name(), artifact = ?artifact, "Downloaded artifact is missing");
                self.db.set_artifact_path(None).await?;
                self.machine.apply(StateEvent::Reset).await?;
                return Ok(());
            }
        }

        tracing::info!(
            state = state.name(),
            version = %candidate.version,
            "Restored update offer"
        );
        self.resolution.write().await.offered = Some(candidate);
        Ok(())
    }

    /// Return to `Idle`, abandoning any check or download in flight
    pub async fn reset(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        control.cycle += 1;
        if let Some(active) = control.download.take() {
            active.token.cancel();
        }
        self.orchestrator.cancel_active().await;

        {
            let mut resolution = self.resolution.write().await;
            resolution.verdict = None;
            resolution.offered = None;
        }
        self.machine.apply(StateEvent::Reset).await?;
        tracing::info!("Update engine reset");
        Ok(())
    }

    /// Gracefully shut down the engine
    ///
    /// Stops accepting requests, cancels the fetch in flight and marks the
    /// shutdown as clean. The state is left as it is; the next session
    /// normalizes interrupted work when it restores.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        {
            let mut control = self.control.lock().await;
            // Running cycles stop applying events
            control.cycle += 1;
            if let Some(active) = control.download.take() {
                active.token.cancel();
            }
        }
        if self.orchestrator.cancel_active().await {
            tracing::info!("Cancelled fetch in flight");
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
