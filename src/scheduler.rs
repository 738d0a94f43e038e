//! Periodic update checks
//!
//! The scheduler triggers [`UpdateEngine::check_for_updates`] once per check
//! interval, measured from the last recorded check so restarts do not reset
//! the clock. A cycle that ends in `Error` arms a one-shot retry after the
//! shorter retry interval.
//!
//! # Example
//!
//! ```no_run
//! use ota_hub::{Config, UpdateEngine};
//! use ota_hub::scheduler::UpdateScheduler;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = UpdateEngine::new(Config::default()).await?;
//! let shutdown = CancellationToken::new();
//!
//! let scheduler = UpdateScheduler::new(engine.clone());
//! tokio::spawn(scheduler.run(shutdown.clone()));
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::db::StatusStore;
use crate::error::Error;
use crate::types::{StateChange, UpdateState};
use crate::UpdateEngine;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs update checks on the configured schedule
pub struct UpdateScheduler {
    engine: UpdateEngine,
}

/// How a triggered check ended, as far as scheduling is concerned
#[derive(Debug, PartialEq, Eq)]
enum CycleEnd {
    Settled,
    Failed,
    TimedOut,
    Shutdown,
}

impl UpdateScheduler {
    /// Creates a scheduler for `engine`
    pub fn new(engine: UpdateEngine) -> Self {
        Self { engine }
    }

    /// Starts the scheduling loop
    ///
    /// Returns when `shutdown` is cancelled or the engine stops accepting work.
    /// Does nothing if periodic checks are disabled.
    pub async fn run(self, shutdown: CancellationToken) {
        let schedule = self.engine.config.schedule.clone();
        if !schedule.enabled {
            info!("Periodic update checks disabled");
            return;
        }
        info!(
            interval_secs = schedule.check_interval.as_secs(),
            retry_secs = schedule.retry_interval.as_secs(),
            "Update scheduler started"
        );

        let cycle_limit = cycle_deadline(&self.engine.config);
        let mut retry_pending = false;

        loop {
            let last_check = match self.engine.db.last_update_check().await {
                Ok(last) => last,
                Err(e) => {
                    warn!(error = %e, "Failed to read last check time, checking now");
                    None
                }
            };
            let delay = compute_delay(
                last_check,
                chrono::Utc::now().timestamp_millis(),
                schedule.check_interval,
                retry_pending.then_some(schedule.retry_interval),
            );
            debug!(delay_secs = delay.as_secs(), retry_pending, "Next update check scheduled");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
            if !self.engine.accepting_new.load(Ordering::SeqCst) {
                break;
            }

            retry_pending = false;
            let mut changes = self.engine.subscribe();
            match self.engine.check_for_updates().await {
                Ok(()) => match wait_for_cycle(&mut changes, &shutdown, cycle_limit).await {
                    CycleEnd::Settled => {}
                    CycleEnd::Failed => {
                        info!("Update check failed, retry scheduled");
                        retry_pending = true;
                    }
                    CycleEnd::TimedOut => {
                        // A new request restarts a cycle stuck in Checking
                        warn!(
                            limit_secs = cycle_limit.as_secs(),
                            "Update check did not finish in time, retry scheduled"
                        );
                        retry_pending = true;
                    }
                    CycleEnd::Shutdown => break,
                },
                Err(Error::ShuttingDown) => break,
                Err(Error::InvalidTransition { from, .. }) => {
                    debug!(state = %from, "Skipping scheduled check");
                    retry_pending = true;
                }
                Err(e) => {
                    warn!(error = %e, "Scheduled update check could not start");
                    retry_pending = true;
                }
            }
        }

        info!("Update scheduler shutting down");
    }
}

/// Longest a check cycle can legitimately stay in `Checking`
///
/// Covers the quiet period plus the configuration and update fetches, each
/// with every retry timing out and the longest jittered backoff between them.
fn cycle_deadline(config: &Config) -> Duration {
    let retry = &config.fetch.retry;
    let per_fetch = config
        .server
        .request_timeout
        .saturating_mul(retry.max_attempts.saturating_add(1))
        .saturating_add(retry.max_delay.saturating_mul(2).saturating_mul(retry.max_attempts));
    config.fetch.quiet_period.saturating_add(per_fetch.saturating_mul(2))
}

/// Wait until the running check leaves `Checking`, or `limit` elapses
async fn wait_for_cycle(
    changes: &mut broadcast::Receiver<StateChange>,
    shutdown: &CancellationToken,
    limit: Duration,
) -> CycleEnd {
    let deadline = sleep(limit);
    tokio::pin!(deadline);

    loop {
        let change = tokio::select! {
            _ = shutdown.cancelled() => return CycleEnd::Shutdown,
            _ = &mut deadline => return CycleEnd::TimedOut,
            change = changes.recv() => change,
        };
        match change {
            Ok(change) if change.previous == UpdateState::Checking => {
                return match change.current {
                    UpdateState::Error { .. } => CycleEnd::Failed,
                    _ => CycleEnd::Settled,
                };
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Scheduler lagged behind state changes");
            }
            Err(broadcast::error::RecvError::Closed) => return CycleEnd::Shutdown,
        }
    }
}

/// Time until the next check is due
///
/// A pending retry wins over the regular schedule. Without a recorded check
/// the next one is due immediately; a last check in the future (clock moved
/// back) waits at most one interval.
pub fn compute_delay(
    last_check_ms: Option<i64>,
    now_ms: i64,
    interval: Duration,
    retry: Option<Duration>,
) -> Duration {
    if let Some(retry) = retry {
        return retry;
    }
    let Some(last) = last_check_ms else {
        return Duration::ZERO;
    };

    let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    let due = last.saturating_add(interval_ms);
    let remaining = due.saturating_sub(now_ms).clamp(0, interval_ms);
    Duration::from_millis(remaining as u64)
}
