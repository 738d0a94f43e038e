//! Artifact download lifecycle and install hand-off.

use crate::db::StatusStore;
use crate::error::{Error, Result};
use crate::orchestrator::{FetchHandle, FetchOutcome};
use crate::types::{StateEvent, UpdateState};
use std::path::PathBuf;

use super::{ActiveDownload, UpdateEngine};

impl UpdateEngine {
    /// Start downloading the update on offer
    ///
    /// Moves `Available` to `Downloading`. The transfer runs in the background;
    /// completion moves the machine to `Downloaded`, a transport failure to `Error`.
    pub async fn start_download(&self) -> Result<()> {
        self.begin_download(false).await
    }

    /// Restart a paused download from the beginning
    pub async fn resume_download(&self) -> Result<()> {
        self.begin_download(true).await
    }

    async fn begin_download(&self, resuming: bool) -> Result<()> {
        self.ensure_accepting()?;

        let mut control = self.control.lock().await;
        let state = self.machine.state().await;
        if resuming && state != UpdateState::Suspended {
            return Err(Error::InvalidTransition {
                from: state.name().to_string(),
                event: StateEvent::DownloadRequested.name().to_string(),
            });
        }

        let candidate = self
            .update_candidate()
            .await
            .ok_or_else(|| Error::NotFound("no update is on offer".to_string()))?;

        self.machine.apply(StateEvent::DownloadRequested).await?;
        if let Err(e) = self.db.set_artifact_path(None).await {
            tracing::warn!(error = %e, "Failed to clear previous artifact path");
        }

        let handle = match self.orchestrator.download_artifact(&candidate).await {
            Ok(handle) => handle,
            Err(e) => {
                self.machine
                    .apply(StateEvent::DownloadFailed {
                        cancelled: false,
                        message: e.to_string(),
                    })
                    .await?;
                return Err(e);
            }
        };

        control.next_download += 1;
        let generation = control.next_download;
        control.download = Some(ActiveDownload {
            generation,
            token: handle.cancellation_token(),
        });
        drop(control);

        tracing::info!(
            file = %candidate.file_name,
            size = candidate.file_size_bytes,
            resuming,
            "Artifact download started"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.finish_download(generation, handle).await {
                tracing::error!(generation, error = %e, "Failed to record download result");
            }
        });

        Ok(())
    }

    async fn finish_download(&self, generation: u64, handle: FetchHandle) -> Result<()> {
        let outcome = handle.outcome().await;

        let mut control = self.control.lock().await;
        if control
            .download
            .as_ref()
            .is_none_or(|active| active.generation != generation)
        {
            // Paused, cancelled or reset; whoever stopped it already moved the machine
            tracing::debug!(generation, "Ignoring result of detached download");
            return Ok(());
        }
        control.download = None;

        match outcome {
            FetchOutcome::Success { path, .. } => {
                let recorded = path.to_string_lossy();
                match self.db.set_artifact_path(Some(&*recorded)).await {
                    Ok(()) => {
                        self.machine.apply(StateEvent::DownloadCompleted).await?;
                        tracing::info!(path = %path.display(), "Artifact downloaded");
                    }
                    // Without the record the artifact cannot be handed to the installer later
                    Err(e) => {
                        self.machine
                            .apply(StateEvent::DownloadFailed {
                                cancelled: false,
                                message: format!("failed to record artifact: {e}"),
                            })
                            .await?;
                    }
                }
            }
            FetchOutcome::Cancelled => {
                self.machine
                    .apply(StateEvent::DownloadFailed {
                        cancelled: true,
                        message: "download cancelled".to_string(),
                    })
                    .await?;
            }
            FetchOutcome::Failed(e) => {
                self.machine
                    .apply(StateEvent::DownloadFailed {
                        cancelled: false,
                        message: e.to_string(),
                    })
                    .await?;
            }
        }

        Ok(())
    }

    /// Pause the running download
    ///
    /// The transfer is cancelled and its partial file removed; resuming starts over.
    pub async fn pause_download(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        self.machine.apply(StateEvent::DownloadPaused).await?;
        if let Some(active) = control.download.take() {
            active.token.cancel();
        }
        tracing::info!("Artifact download paused");
        Ok(())
    }

    /// Abandon the running or paused download; the update stays on offer
    pub async fn cancel_download(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        self.machine
            .apply(StateEvent::DownloadFailed {
                cancelled: true,
                message: "download cancelled".to_string(),
            })
            .await?;
        if let Some(active) = control.download.take() {
            active.token.cancel();
        }
        tracing::info!("Artifact download cancelled");
        Ok(())
    }

    /// Hand the downloaded artifact to the installer
    ///
    /// Moves `Downloaded` to `Installing` and returns the artifact path. Applying
    /// it is up to the caller; report failures with
    /// [`report_install_failure`](Self::report_install_failure).
    pub async fn request_install(&self) -> Result<PathBuf> {
        let _control = self.control.lock().await;
        let state = self.machine.state().await;
        if state != UpdateState::Downloaded {
            return Err(Error::InvalidTransition {
                from: state.name().to_string(),
                event: StateEvent::InstallRequested.name().to_string(),
            });
        }

        let path = self
            .db
            .artifact_path()
            .await?
            .map(PathBuf::from)
            .ok_or_else(|| Error::NotFound("no downloaded artifact recorded".to_string()))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::NotFound(format!(
                "artifact {} no longer exists",
                path.display()
            )));
        }

        self.machine.apply(StateEvent::InstallRequested).await?;
        tracing::info!(path = %path.display(), "Artifact handed to installer");
        Ok(path)
    }

    /// Record that the installer could not apply the artifact
    pub async fn report_install_failure(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        tracing::warn!(reason = %message, "Installer reported failure");
        let _control = self.control.lock().await;
        self.machine
            .apply(StateEvent::InstallFailed { message })
            .await?;
        Ok(())
    }
}
