//! Database layer for ota-hub
//!
//! Handles SQLite persistence of the small amount of status the engine keeps
//! across restarts: the last check time, the current update state, the cached
//! kill-switch value and the path of a downloaded artifact.
//!
//! ## Submodules
//!
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`state`] - Runtime state key/value access and shutdown tracking

use crate::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

mod migrations;
mod state;

/// Keys of the persisted status values
pub mod keys {
    /// Epoch milliseconds of the last requested update check
    pub const LAST_UPDATE_CHECK: &str = "last_update_check_epoch_ms";
    /// Serialized [`UpdateState`](crate::types::UpdateState)
    pub const CURRENT_STATE: &str = "current_state";
    /// Last seen value of the remote kill-switch
    pub const OTA_ENABLED_CACHE: &str = "ota_enabled_cache";
    /// Local path of the downloaded update artifact
    pub const ARTIFACT_PATH: &str = "artifact_path";
}

/// Durable key/value status storage
///
/// Values are strings; the provided methods add typed access for the keys in
/// [`keys`]. Every write must be durable once the call returns.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read a value
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set_value(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value
    async fn remove_value(&self, key: &str) -> Result<()>;

    /// Epoch milliseconds of the last requested update check
    async fn last_update_check(&self) -> Result<Option<i64>> {
        Ok(self
            .get_value(keys::LAST_UPDATE_CHECK)
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    /// Record the time of an update check
    async fn set_last_update_check(&self, epoch_ms: i64) -> Result<()> {
        self.set_value(keys::LAST_UPDATE_CHECK, &epoch_ms.to_string())
            .await
    }

    /// Serialized update state, if one was ever written
    async fn current_state(&self) -> Result<Option<String>> {
        self.get_value(keys::CURRENT_STATE).await
    }

    /// Persist the serialized update state
    async fn set_current_state(&self, serialized: &str) -> Result<()> {
        self.set_value(keys::CURRENT_STATE, serialized).await
    }

    /// Last seen kill-switch value
    async fn ota_enabled_cache(&self) -> Result<Option<bool>> {
        Ok(self
            .get_value(keys::OTA_ENABLED_CACHE)
            .await?
            .map(|raw| raw == "true"))
    }

    /// Remember the kill-switch value
    async fn set_ota_enabled_cache(&self, enabled: bool) -> Result<()> {
        self.set_value(keys::OTA_ENABLED_CACHE, if enabled { "true" } else { "false" })
            .await
    }

    /// Path of the downloaded artifact
    async fn artifact_path(&self) -> Result<Option<String>> {
        self.get_value(keys::ARTIFACT_PATH).await
    }

    /// Remember (or forget, with `None`) the downloaded artifact
    async fn set_artifact_path(&self, path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => self.set_value(keys::ARTIFACT_PATH, path).await,
            None => self.remove_value(keys::ARTIFACT_PATH).await,
        }
    }
}

/// Database handle for ota-hub
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
