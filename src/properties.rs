//! Installed build identity
//!
//! The installed build is described by a `key=value` properties file (the
//! `build.prop` layout). [`BuildProperties`] is the seam the engine reads it
//! through, so hosts can plug in their own source.

use crate::error::{Error, Result};
use crate::types::{BuildDescriptor, BuildType, VersionNumber};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Property keys describing the installed build
pub mod keys {
    /// Dotted version number
    pub const VERSION: &str = "ro.aospa.version.minor";
    /// Build number within the version line
    pub const VERSION_CODE: &str = "ro.aospa.version.code";
    /// Build time in seconds since the epoch
    pub const BUILD_DATE_UTC: &str = "ro.build.date.utc";
    /// Release channel
    pub const BUILD_VARIANT: &str = "ro.aospa.build.variant";
    /// Device identifier
    pub const DEVICE: &str = "ro.aospa.device";
    /// Platform version
    pub const PLATFORM_VERSION: &str = "ro.build.version.release";
    /// Security patch level
    pub const SECURITY_PATCH: &str = "ro.build.version.security_patch";
}

/// Source of the installed build descriptor
///
/// Read fresh for every resolution; implementations should not cache.
#[async_trait]
pub trait BuildProperties: Send + Sync {
    /// Describe the currently installed build
    async fn installed(&self) -> Result<BuildDescriptor>;
}

/// Reads the installed build from a properties file on disk
#[derive(Clone, Debug)]
pub struct PropertiesFile {
    path: PathBuf,
}

impl PropertiesFile {
    /// Create a reader for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the properties file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all properties from the file
    pub async fn load(&self) -> Result<HashMap<String, String>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Properties(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(parse_properties(&content))
    }
}

#[async_trait]
impl BuildProperties for PropertiesFile {
    async fn installed(&self) -> Result<BuildDescriptor> {
        let properties = self.load().await?;
        descriptor_from_properties(&properties)
    }
}

/// Fixed build descriptor, for hosts that already know their identity
#[derive(Clone, Debug)]
pub struct StaticProperties(pub BuildDescriptor);

#[async_trait]
impl BuildProperties for StaticProperties {
    async fn installed(&self) -> Result<BuildDescriptor> {
        Ok(self.0.clone())
    }
}

/// Parse `key=value` lines, skipping blanks and `#` comments
///
/// Later occurrences of a key override earlier ones.
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Build a descriptor from parsed properties
///
/// Version, build date and device are required. A missing version code counts
/// as 0 and a missing variant as a release build.
pub fn descriptor_from_properties(properties: &HashMap<String, String>) -> Result<BuildDescriptor> {
    let required = |key: &str| {
        properties
            .get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Properties(format!("missing property {key}")))
    };

    let version: VersionNumber = required(keys::VERSION)?
        .parse()
        .map_err(|e| Error::Properties(format!("{}: {}", keys::VERSION, e)))?;

    let build_timestamp: i64 = required(keys::BUILD_DATE_UTC)?
        .parse()
        .map_err(|e| Error::Properties(format!("{}: {}", keys::BUILD_DATE_UTC, e)))?;

    let device_id = required(keys::DEVICE)?.clone();

    let version_code = match properties.get(keys::VERSION_CODE) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| Error::Properties(format!("{}: {}", keys::VERSION_CODE, e)))?,
        _ => 0,
    };

    let build_type = properties
        .get(keys::BUILD_VARIANT)
        .map(|label| BuildType::from_label(label))
        .unwrap_or_default();

    Ok(BuildDescriptor {
        version,
        version_code,
        build_timestamp,
        build_type,
        device_id,
    })
}
