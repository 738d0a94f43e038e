//! Runtime state: key/value status and shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{Database, StatusStore};

const CLEAN_SHUTDOWN: &str = "clean_shutdown";

impl Database {
    /// Read a runtime state value
    pub async fn get_state_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read {}: {}",
                    key, e
                )))
            })
    }

    /// Insert or replace a runtime state value
    pub async fn set_state_value(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write {}: {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Delete a runtime state value; deleting a missing key is not an error
    pub async fn remove_state_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM runtime_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete {}: {}",
                    key, e
                )))
            })?;

        Ok(())
    }

    /// Check if the last shutdown was unclean
    ///
    /// True when the last session never reached [`set_clean_shutdown`](Self::set_clean_shutdown),
    /// including on a fresh database.
    ///
    /// After [`set_clean_start`](Self::set_clean_start) this describes the running
    /// session and reads `true` until shutdown.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.get_state_value(CLEAN_SHUTDOWN).await?;
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Whether no session has ever started on this database
    ///
    /// Only meaningful before [`set_clean_start`](Self::set_clean_start) is called.
    pub async fn is_first_session(&self) -> Result<bool> {
        Ok(self.get_state_value(CLEAN_SHUTDOWN).await?.is_none())
    }

    /// Mark that the engine is running
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_state_value(CLEAN_SHUTDOWN, "false").await
    }

    /// Mark that the engine stopped gracefully
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_state_value(CLEAN_SHUTDOWN, "true").await
    }
}

#[async_trait]
impl StatusStore for Database {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.get_state_value(key).await
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.set_state_value(key, value).await
    }

    async fn remove_value(&self, key: &str) -> Result<()> {
        self.remove_state_value(key).await
    }
}
