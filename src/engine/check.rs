//! Update check cycle and configuration refresh.
//!
//! A cycle fetches the remote configuration, then the update candidate, and
//! resolves the candidate against the installed build. Fetches run one at a
//! time through the orchestrator, so a newer cycle supersedes the fetch of an
//! older one. Every fetch is started, and every event applied, under the
//! control lock after checking the cycle number, so an older cycle can neither
//! supersede a newer one nor move the machine.

use crate::components::Component;
use crate::db::StatusStore;
use crate::error::{Error, ParseError, Result};
use crate::orchestrator::FetchOutcome;
use crate::resolver::{Reason, Verdict, evaluate};
use crate::types::{ComponentKind, RemoteConfiguration, StateEvent, UpdateCandidate, UpdateState};
use std::sync::Arc;

use super::UpdateEngine;

/// What a component fetch produced, from the cycle's point of view
enum Fetched {
    Parsed(Component),
    /// Transferred, but no usable entry; the stored component was kept
    Empty,
    Cancelled,
    Failed(Error),
}

impl UpdateEngine {
    /// Start an update check
    ///
    /// Moves the machine to `Checking`, records the check time and runs the
    /// cycle in the background. Calling this while a check is running restarts
    /// the cycle. Fails with [`Error::InvalidTransition`] while a download or
    /// install is in progress.
    pub async fn check_for_updates(&self) -> Result<()> {
        self.ensure_accepting()?;

        let cycle = {
            let mut control = self.control.lock().await;
            self.machine.apply(StateEvent::CheckRequested).await?;
            control.cycle += 1;
            control.cycle
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.db.set_last_update_check(now_ms).await {
            tracing::warn!(error = %e, "Failed to record update check time");
        }

        tracing::info!(cycle, "Update check started");
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_check_cycle(cycle).await {
                tracing::error!(cycle, error = %e, "Update check cycle failed");
            }
        });

        Ok(())
    }

    /// Fetch the remote configuration outside of a check cycle
    ///
    /// Updates the stored configuration and the cached kill-switch value. If
    /// the kill-switch turned off while an update is on offer, a check cycle is
    /// started so the offer is withdrawn.
    pub async fn refresh_configuration(&self) -> Result<RemoteConfiguration> {
        self.ensure_accepting()?;

        // Started under the control lock so a check requested meanwhile supersedes it
        let handle = {
            let control = self.control.lock().await;
            let state = self.machine.state().await;
            if control.download.is_some()
                || matches!(
                    state,
                    UpdateState::Checking | UpdateState::Downloading | UpdateState::Installing
                )
            {
                return Err(Error::InvalidTransition {
                    from: state.name().to_string(),
                    event: "configuration_refresh".to_string(),
                });
            }
            self.orchestrator.fetch(ComponentKind::Config).await?
        };

        let remote = match fetched(handle.outcome().await) {
            Fetched::Parsed(Component::Config(remote)) => remote,
            Fetched::Parsed(other) => {
                return Err(Error::Other(format!(
                    "expected configuration, got {}",
                    other.kind()
                )));
            }
            Fetched::Empty => self
                .components
                .configuration()
                .await
                .as_deref()
                .copied()
                .ok_or(Error::Parse(ParseError::Empty {
                    kind: ComponentKind::Config,
                }))?,
            Fetched::Cancelled => {
                return Err(Error::Cancelled {
                    kind: ComponentKind::Config.to_string(),
                });
            }
            Fetched::Failed(e) => return Err(e),
        };

        self.remember_kill_switch(remote.ota_enabled).await;
        tracing::info!(
            ota_enabled = remote.ota_enabled,
            whitelist_only = remote.whitelist_only,
            "Remote configuration refreshed"
        );

        if !remote.ota_enabled && self.machine.state().await == UpdateState::Available {
            tracing::info!("Updates were disabled remotely, re-checking");
            self.check_for_updates().await?;
        }

        Ok(remote)
    }

    async fn run_check_cycle(&self, cycle: u64) -> Result<()> {
        // Configuration first: the kill-switch decides whether the update is looked at at all
        let remote = match self.fetch_in_cycle(cycle, ComponentKind::Config).await {
            Fetched::Parsed(Component::Config(remote)) => remote,
            Fetched::Parsed(other) => {
                return Err(Error::Other(format!(
                    "expected configuration, got {}",
                    other.kind()
                )));
            }
            Fetched::Empty => match self.components.configuration().await {
                Some(cached) => {
                    tracing::warn!(cycle, "Configuration document was empty, using previous value");
                    *cached
                }
                None => {
                    tracing::warn!(cycle, "Configuration document was empty, treating updates as disabled");
                    RemoteConfiguration::default()
                }
            },
            Fetched::Cancelled => {
                tracing::debug!(cycle, "Configuration fetch superseded");
                return Ok(());
            }
            Fetched::Failed(e) => {
                self.apply_in_cycle(
                    cycle,
                    StateEvent::ConfigFetchFailed {
                        message: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        self.remember_kill_switch(remote.ota_enabled).await;

        if !remote.ota_enabled {
            // Never consult the resolver while the kill-switch is off
            let applied = self
                .apply_and_resolve(
                    cycle,
                    StateEvent::ConfigParsed { enabled: false },
                    Some(Verdict {
                        available: false,
                        reason: Reason::Disabled,
                    }),
                    None,
                )
                .await?;
            if applied {
                tracing::info!(cycle, "Updates are disabled remotely");
            }
            return Ok(());
        }

        if !self
            .apply_in_cycle(cycle, StateEvent::ConfigParsed { enabled: true })
            .await?
        {
            return Ok(());
        }

        let candidate = match self.fetch_in_cycle(cycle, ComponentKind::Update).await {
            Fetched::Parsed(Component::Update(candidate)) => Some(candidate),
            Fetched::Parsed(other) => {
                return Err(Error::Other(format!(
                    "expected update, got {}",
                    other.kind()
                )));
            }
            Fetched::Empty => {
                tracing::info!(cycle, "Server offers no update for this device");
                None
            }
            Fetched::Cancelled => {
                tracing::debug!(cycle, "Update fetch superseded");
                return Ok(());
            }
            Fetched::Failed(e) => {
                self.apply_in_cycle(
                    cycle,
                    StateEvent::UpdateFetchFailed {
                        message: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let Some(candidate) = candidate else {
            self.apply_and_resolve(
                cycle,
                StateEvent::UpdateParsed { available: false },
                None,
                None,
            )
            .await?;
            return Ok(());
        };

        let installed = match self.properties.installed().await {
            Ok(installed) => installed,
            Err(e) => {
                self.apply_in_cycle(
                    cycle,
                    StateEvent::UpdateFetchFailed {
                        message: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let verdict = evaluate(
            &installed,
            &candidate.descriptor(&installed.device_id),
            &self.config.policy,
            &remote,
        );
        tracing::info!(
            cycle,
            installed = %installed.version.as_str(),
            candidate = %candidate.version.as_str(),
            available = verdict.available,
            reason = ?verdict.reason,
            "Resolved update candidate"
        );

        let offered = verdict.available.then(|| Arc::new(candidate));
        let applied = self
            .apply_and_resolve(
                cycle,
                StateEvent::UpdateParsed {
                    available: verdict.available,
                },
                Some(verdict),
                offered,
            )
            .await?;

        if applied && verdict.available {
            self.fetch_changelog(cycle).await;
        }

        Ok(())
    }

    /// Fetch release notes for a fresh offer; failures only cost the notes
    async fn fetch_changelog(&self, cycle: u64) {
        // Started under the control lock so a download requested meanwhile supersedes it,
        // never the other way round
        let handle = {
            let control = self.control.lock().await;
            if control.cycle != cycle
                || control.download.is_some()
                || self.machine.state().await != UpdateState::Available
            {
                return;
            }
            match self.orchestrator.fetch(ComponentKind::Changelog).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(cycle, error = %e, "Could not start changelog fetch");
                    return;
                }
            }
        };

        match handle.outcome().await {
            FetchOutcome::Success { .. } => tracing::debug!(cycle, "Changelog updated"),
            FetchOutcome::Cancelled => tracing::debug!(cycle, "Changelog fetch superseded"),
            FetchOutcome::Failed(e) => {
                tracing::warn!(cycle, error = %e, "Changelog unavailable")
            }
        }
    }

    /// Fetch a component for `cycle`, unless a newer cycle took over
    async fn fetch_in_cycle(&self, cycle: u64, kind: ComponentKind) -> Fetched {
        let handle = {
            let control = self.control.lock().await;
            if control.cycle != cycle {
                return Fetched::Cancelled;
            }
            match self.orchestrator.fetch(kind).await {
                Ok(handle) => handle,
                Err(e) => return Fetched::Failed(e),
            }
        };
        fetched(handle.outcome().await)
    }

    /// Apply `event` if `cycle` is still the newest cycle; returns whether it was applied
    async fn apply_in_cycle(&self, cycle: u64, event: StateEvent) -> Result<bool> {
        let control = self.control.lock().await;
        if control.cycle != cycle {
            tracing::debug!(cycle, newest = control.cycle, event = event.name(), "Dropping event of superseded cycle");
            return Ok(false);
        }
        self.machine.apply(event).await?;
        Ok(true)
    }

    /// Like [`apply_in_cycle`](Self::apply_in_cycle), also publishing the resolution
    async fn apply_and_resolve(
        &self,
        cycle: u64,
        event: StateEvent,
        verdict: Option<Verdict>,
        offered: Option<Arc<UpdateCandidate>>,
    ) -> Result<bool> {
        let control = self.control.lock().await;
        if control.cycle != cycle {
            tracing::debug!(cycle, newest = control.cycle, event = event.name(), "Dropping event of superseded cycle");
            return Ok(false);
        }

        {
            let mut resolution = self.resolution.write().await;
            resolution.verdict = verdict;
            resolution.offered = offered;
        }
        self.machine.apply(event).await?;
        Ok(true)
    }

    async fn remember_kill_switch(&self, enabled: bool) {
        if let Err(e) = self.db.set_ota_enabled_cache(enabled).await {
            tracing::warn!(error = %e, "Failed to cache kill-switch value");
        }
    }
}

fn fetched(outcome: FetchOutcome) -> Fetched {
    match outcome {
        FetchOutcome::Success {
            component: Some(component),
            ..
        } => Fetched::Parsed(component),
        FetchOutcome::Success {
            component: None, ..
        } => Fetched::Failed(Error::Other("metadata fetch produced no component".to_string())),
        FetchOutcome::Failed(Error::Parse(ParseError::Empty { .. })) => Fetched::Empty,
        FetchOutcome::Failed(e) => Fetched::Failed(e),
        FetchOutcome::Cancelled => Fetched::Cancelled,
    }
}
