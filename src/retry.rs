//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient failures.
//! It implements exponential backoff with optional jitter to prevent thundering herd.
//!
//! Transport failures implement [`IsRetryable`], so a fetch can be wrapped directly:
//!
//! ```no_run
//! use ota_hub::config::RetryConfig;
//! use ota_hub::error::TransportError;
//! use ota_hub::retry::fetch_with_retry;
//!
//! # async fn example() -> Result<(), TransportError> {
//! let config = RetryConfig::default();
//! let bytes = fetch_with_retry(&config, || async {
//!     // Issue the request here
//!     Ok::<u64, TransportError>(0)
//! })
//! .await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (authentication failed, disk full, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            // Server-side trouble and throttling are worth another attempt
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Timeout { .. } => true,
            TransportError::Request { transient, .. } => *transient,
            // Local disk problems will not fix themselves
            TransportError::Write { .. } => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// Delays grow by `backoff_multiplier` up to `max_delay`. Returns the successful
/// result or the last error.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Fetch succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::warn!(error = %error, "Fetch failed with non-retryable error");
            return Err(error);
        }
        if attempt >= config.max_attempts {
            tracing::warn!(
                error = %error,
                attempts = attempt + 1,
                "Fetch failed after all retry attempts"
            );
            return Err(error);
        }

        attempt += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::debug!(
            error = %error,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Transient fetch failure, retrying"
        );
        tokio::time::sleep(wait).await;

        delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Spread `delay` uniformly over `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
