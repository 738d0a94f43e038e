//! Remote component parsing and storage
//!
//! Every component document has the same shape: a JSON object with one
//! top-level array named after the component (`ota_configuration`,
//! `changelog`, `updates`). Entries are decoded leniently; malformed entries
//! are skipped and the last valid one wins.

use crate::error::{Error, ParseError, Result};
use crate::types::{
    BuildType, ChangelogEntry, ComponentKind, RemoteConfiguration, UpdateCandidate, VersionNumber,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A parsed remote component
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    /// Remote configuration
    Config(RemoteConfiguration),
    /// Release notes
    Changelog(ChangelogEntry),
    /// Update candidate
    Update(UpdateCandidate),
}

impl Component {
    /// Kind of this component
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Config(_) => ComponentKind::Config,
            Component::Changelog(_) => ComponentKind::Changelog,
            Component::Update(_) => ComponentKind::Update,
        }
    }
}

#[derive(Default)]
struct Slots {
    config: Option<Arc<RemoteConfiguration>>,
    changelog: Option<Arc<ChangelogEntry>>,
    update: Option<Arc<UpdateCandidate>>,
}

/// Latest successfully parsed value of each component
///
/// A slot is only replaced by a successful parse; failures leave the previous
/// value in place. Readers get a snapshot that later replacements never mutate.
#[derive(Default)]
pub struct ComponentStore {
    slots: RwLock<Slots>,
}

impl ComponentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw component document without storing it
    pub fn parse(kind: ComponentKind, raw: &[u8]) -> std::result::Result<Component, ParseError> {
        parse_component(kind, raw)
    }

    /// Parse a document and, on success, make it the current value for `kind`
    pub async fn ingest(
        &self,
        kind: ComponentKind,
        raw: &[u8],
    ) -> std::result::Result<Component, ParseError> {
        let component = parse_component(kind, raw)?;
        self.replace(component.clone()).await;
        tracing::debug!(component = %kind, "Stored parsed component");
        Ok(component)
    }

    /// Read a cached document from disk and ingest it
    pub async fn ingest_file(&self, kind: ComponentKind, path: &Path) -> Result<Component> {
        let raw = tokio::fs::read(path).await?;
        Ok(self.ingest(kind, &raw).await?)
    }

    /// Load whichever cached documents exist in `cache_dir`
    ///
    /// Returns the kinds that were loaded. Missing or unparseable files are skipped.
    pub async fn warm_from_cache(&self, cache_dir: &Path) -> Vec<ComponentKind> {
        let mut loaded = Vec::new();
        for kind in ComponentKind::ALL {
            let path = cache_file(cache_dir, kind);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match self.ingest_file(kind, &path).await {
                Ok(_) => loaded.push(kind),
                Err(e) => {
                    tracing::warn!(component = %kind, path = %path.display(), error = %e, "Ignoring unusable cached component")
                }
            }
        }
        loaded
    }

    async fn replace(&self, component: Component) {
        let mut slots = self.slots.write().await;
        match component {
            Component::Config(value) => slots.config = Some(Arc::new(value)),
            Component::Changelog(value) => slots.changelog = Some(Arc::new(value)),
            Component::Update(value) => slots.update = Some(Arc::new(value)),
        }
    }

    /// Current value for `kind`, if one was ever parsed
    pub async fn get(&self, kind: ComponentKind) -> Option<Component> {
        let slots = self.slots.read().await;
        match kind {
            ComponentKind::Config => slots.config.as_deref().cloned().map(Component::Config),
            ComponentKind::Changelog => {
                slots.changelog.as_deref().cloned().map(Component::Changelog)
            }
            ComponentKind::Update => slots.update.as_deref().cloned().map(Component::Update),
        }
    }

    /// Current remote configuration
    pub async fn configuration(&self) -> Option<Arc<RemoteConfiguration>> {
        self.slots.read().await.config.clone()
    }

    /// Current release notes
    pub async fn changelog(&self) -> Option<Arc<ChangelogEntry>> {
        self.slots.read().await.changelog.clone()
    }

    /// Current update candidate
    pub async fn update_candidate(&self) -> Option<Arc<UpdateCandidate>> {
        self.slots.read().await.update.clone()
    }
}

/// Local cache location of a component document
pub fn cache_file(cache_dir: &Path, kind: ComponentKind) -> std::path::PathBuf {
    cache_dir.join(format!("{}.json", kind.canonical_name()))
}

/// Parse a raw component document
///
/// Null entries are ignored, malformed entries are logged and skipped, and the
/// last valid entry is returned. A missing array or an array without a valid
/// entry yields [`ParseError::Empty`].
pub fn parse_component(
    kind: ComponentKind,
    raw: &[u8],
) -> std::result::Result<Component, ParseError> {
    let document: Value = serde_json::from_slice(raw).map_err(|e| ParseError::Document {
        kind,
        reason: e.to_string(),
    })?;

    let object = document.as_object().ok_or_else(|| ParseError::Document {
        kind,
        reason: "top level is not an object".to_string(),
    })?;

    let entries = match object.get(kind.canonical_name()) {
        None | Some(Value::Null) => return Err(ParseError::Empty { kind }),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ParseError::Document {
                kind,
                reason: format!("{} is not an array", kind.canonical_name()),
            });
        }
    };

    let mut latest = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.is_null() {
            continue;
        }
        match decode_entry(kind, index, entry) {
            Ok(component) => latest = Some(component),
            Err(e) => tracing::warn!(component = %kind, index, error = %e, "Skipping malformed entry"),
        }
    }

    latest.ok_or(ParseError::Empty { kind })
}

/// Decode a single array entry
pub fn decode_entry(
    kind: ComponentKind,
    index: usize,
    entry: &Value,
) -> std::result::Result<Component, ParseError> {
    let malformed = |reason: String| ParseError::Malformed {
        kind,
        index,
        reason,
    };

    match kind {
        ComponentKind::Config => {
            let wire = WireConfig::deserialize(entry).map_err(|e| malformed(e.to_string()))?;
            Ok(Component::Config(RemoteConfiguration {
                ota_enabled: wire.enabled,
                whitelist_only: wire.whitelist_only,
            }))
        }
        ComponentKind::Changelog => {
            let wire = WireChangelog::deserialize(entry).map_err(|e| malformed(e.to_string()))?;
            let version = wire
                .version
                .map(|raw| raw.parse::<VersionNumber>())
                .transpose()
                .map_err(malformed)?;
            Ok(Component::Changelog(ChangelogEntry {
                id: wire.id,
                version,
                build_type: wire
                    .build_type
                    .as_deref()
                    .map(BuildType::from_label)
                    .unwrap_or_default(),
                body: wire.body,
            }))
        }
        ComponentKind::Update => {
            let wire = WireUpdate::deserialize(entry).map_err(|e| malformed(e.to_string()))?;
            wire.into_candidate().map(Component::Update).map_err(malformed)
        }
    }
}

#[derive(Deserialize)]
struct WireConfig {
    #[serde(deserialize_with = "lenient::flag")]
    enabled: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    whitelist_only: bool,
}

#[derive(Deserialize)]
struct WireChangelog {
    #[serde(default, alias = "md5", deserialize_with = "lenient::opt_text")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    version: Option<String>,
    #[serde(default)]
    build_type: Option<String>,
    #[serde(rename = "changelog_main", alias = "changelog")]
    body: String,
}

#[derive(Deserialize)]
struct WireUpdate {
    #[serde(default, alias = "name")]
    filename: Option<String>,
    #[serde(alias = "build", deserialize_with = "lenient::int")]
    datetime: i64,
    #[serde(deserialize_with = "lenient::uint")]
    size: u64,
    url: String,
    #[serde(alias = "md5", deserialize_with = "lenient::text")]
    id: String,
    #[serde(deserialize_with = "lenient::text")]
    version: String,
    #[serde(default, deserialize_with = "lenient::opt_uint")]
    version_code: Option<u64>,
    #[serde(default)]
    build_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    android_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    android_spl: Option<String>,
    #[serde(default)]
    changelog_device: Option<String>,
}

impl WireUpdate {
    fn into_candidate(self) -> std::result::Result<UpdateCandidate, String> {
        if self.datetime < 0 {
            return Err(format!("negative build timestamp {}", self.datetime));
        }

        let version: VersionNumber = self.version.parse()?;

        let url = url::Url::parse(self.url.trim())
            .map_err(|e| format!("invalid download url {:?}: {}", self.url, e))?;

        let file_name = match self.filename.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => safe_file_name(name)
                .ok_or_else(|| format!("unusable file name {name:?}"))?,
            _ => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(safe_file_name)
                .unwrap_or_else(|| format!("{}.zip", self.id)),
        };

        Ok(UpdateCandidate {
            file_name,
            download_url: url.to_string(),
            file_size_bytes: self.size,
            timestamp: self.datetime,
            id: self.id,
            version,
            version_code: self.version_code.unwrap_or(0),
            build_type: self
                .build_type
                .as_deref()
                .map(BuildType::from_label)
                .unwrap_or_default(),
            android_version: self.android_version,
            android_spl: self.android_spl,
            device_changelog: self.changelog_device.filter(|notes| !notes.is_empty()),
        })
    }
}

/// Last path component of `name`, rejecting empty names and dot entries
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        base => Some(base.to_string()),
    }
}

/// Deserializers for server fields that may arrive as numbers or strings
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    pub fn int<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Scalar::deserialize(deserializer)? {
            Scalar::Int(value) => Ok(value),
            Scalar::Float(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
                Ok(value as i64)
            }
            Scalar::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected an integer, got {text:?}"))),
            _ => Err(D::Error::custom("expected an integer")),
        }
    }

    pub fn uint<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = int(deserializer)?;
        u64::try_from(value).map_err(|_| D::Error::custom(format!("negative value {value}")))
    }

    pub fn opt_uint<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<serde_json::Value>::deserialize(deserializer)? {
            None => Ok(None),
            Some(value) => uint(value).map(Some).map_err(D::Error::custom),
        }
    }

    /// Strings stay as they are; numbers keep their JSON spelling
    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(text) => Ok(text),
            serde_json::Value::Number(number) => Ok(number.to_string()),
            other => Err(D::Error::custom(format!("expected a string, got {other}"))),
        }
    }

    pub fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<serde_json::Value>::deserialize(deserializer)? {
            None => Ok(None),
            Some(value) => text(value).map(Some).map_err(D::Error::custom),
        }
    }

    /// `true` or a case-insensitive `"true"`; every other value is false
    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Scalar::deserialize(deserializer)? {
            Scalar::Bool(value) => value,
            Scalar::Text(text) => text.trim().eq_ignore_ascii_case("true"),
            _ => false,
        })
    }
}
