//! Configuration types for ota-hub

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for [`UpdateEngine`](crate::UpdateEngine)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Update server location and HTTP client settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Fetch behavior (quiet period, local directories, retries)
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Local update policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Periodic check scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Build properties file describing the installed build
    #[serde(default = "default_properties_path")]
    pub properties_path: PathBuf,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fetch: FetchConfig::default(),
            policy: PolicyConfig::default(),
            schedule: ScheduleConfig::default(),
            persistence: PersistenceConfig::default(),
            properties_path: default_properties_path(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing sections take their defaults
    pub async fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that cannot be expressed in the types
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.server.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL {:?}: {}", self.server.base_url, e),
            key: Some("server.base_url".to_string()),
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("{} cannot be used as a base URL", base),
                key: Some("server.base_url".to_string()),
            });
        }

        if let Some(device_id) = &self.server.device_id
            && device_id.trim().is_empty()
        {
            return Err(Error::Config {
                message: "device id must not be empty".to_string(),
                key: Some("server.device_id".to_string()),
            });
        }

        if self.server.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request timeout must be greater than zero".to_string(),
                key: Some("server.request_timeout".to_string()),
            });
        }

        if self.schedule.check_interval.is_zero() {
            return Err(Error::Config {
                message: "check interval must be greater than zero".to_string(),
                key: Some("schedule.check_interval".to_string()),
            });
        }

        if self.fetch.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be at least 1.0".to_string(),
                key: Some("fetch.retry.backoff_multiplier".to_string()),
            });
        }

        Ok(())
    }
}

/// Update server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the update server; components live directly below it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Device identifier used for the update endpoint (default: read from build properties)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Timeout for a response or for any single chunk of a body (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            device_id: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Fetch behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Delay before a metadata fetch starts; a newer request during it supersedes the old one
    /// (default: 4000 ms)
    #[serde(default = "default_quiet_period", with = "duration_ms_serde")]
    pub quiet_period: Duration,

    /// Directory holding the cached component documents (default: "./cache")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding downloaded update artifacts (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Retry behavior for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            quiet_period: default_quiet_period(),
            cache_dir: default_cache_dir(),
            download_dir: default_download_dir(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Local update policy
///
/// All flags default to off: no downgrades, no beta builds, not whitelisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Offer builds older than the installed one
    #[serde(default)]
    pub allow_downgrade: bool,

    /// Offer beta and alpha builds
    #[serde(default)]
    pub allow_beta_updates: bool,

    /// Device is on the server whitelist
    #[serde(default)]
    pub whitelisted: bool,
}

/// Periodic check configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Run periodic checks (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between checks (default: 24 hours)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Time until a one-shot re-check after a failed cycle (default: 2 hours)
    #[serde(default = "default_retry_interval", with = "duration_serde")]
    pub retry_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_check_interval(),
            retry_interval: default_retry_interval(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./ota-hub.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("ota-hub/{}", env!("CARGO_PKG_VERSION"))
}

fn default_quiet_period() -> Duration {
    Duration::from_millis(4000)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_properties_path() -> PathBuf {
    PathBuf::from("/system/build.prop")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./ota-hub.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_check_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration helper for sub-second settings
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
