//! Core types for ota-hub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Dotted version number such as `2.0` or `14.10.1`
///
/// Versions compare component-wise as unsigned integers, with missing trailing
/// components treated as zero. `14.10` is newer than `14.9`, and `2` equals `2.0`.
/// The original text is kept for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionNumber {
    raw: String,
    parts: Vec<u64>,
}

impl VersionNumber {
    /// Numeric components of the version, most significant first
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// Version text as it was received
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::str::FromStr for VersionNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err("version is empty".to_string());
        }

        let parts = raw
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| format!("invalid version component {part:?} in {raw:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }
}

impl TryFrom<String> for VersionNumber {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionNumber> for String {
    fn from(version: VersionNumber) -> Self {
        version.raw
    }
}

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| {
                let a = self.parts.get(i).copied().unwrap_or(0);
                let b = other.parts.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionNumber {}

/// Release channel of a build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    /// Stable release
    #[default]
    Release,
    /// Beta channel, only offered to opted-in devices
    Beta,
    /// Alpha channel, only offered to opted-in devices
    Alpha,
}

impl BuildType {
    /// Interpret a build type label, falling back to `Release` for anything unknown
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "beta" => BuildType::Beta,
            "alpha" => BuildType::Alpha,
            _ => BuildType::Release,
        }
    }

    /// Whether builds of this type require the beta opt-in
    pub fn is_prerelease(&self) -> bool {
        !matches!(self, BuildType::Release)
    }

    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Release => "release",
            BuildType::Beta => "beta",
            BuildType::Alpha => "alpha",
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a build, either the installed one or a remote candidate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BuildDescriptor {
    /// Dotted version number
    #[schema(value_type = String, example = "2.0")]
    pub version: VersionNumber,
    /// Monotonic build number within a version line
    pub version_code: u64,
    /// Build time in seconds since the Unix epoch
    pub build_timestamp: i64,
    /// Release channel
    pub build_type: BuildType,
    /// Device identifier the build targets
    pub device_id: String,
}

/// A downloadable update offered by the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UpdateCandidate {
    /// File name used for the local artifact
    pub file_name: String,
    /// Where the artifact is downloaded from
    pub download_url: String,
    /// Artifact size in bytes
    pub file_size_bytes: u64,
    /// Build time in seconds since the Unix epoch
    pub timestamp: i64,
    /// Server-side identifier (or checksum) of the build
    pub id: String,
    /// Dotted version number
    #[schema(value_type = String, example = "2.1")]
    pub version: VersionNumber,
    /// Build number, 0 when the server does not publish one
    pub version_code: u64,
    /// Release channel
    pub build_type: BuildType,
    /// Platform version the build is based on
    pub android_version: Option<String>,
    /// Security patch level of the build
    pub android_spl: Option<String>,
    /// Device-specific release notes
    pub device_changelog: Option<String>,
}

impl UpdateCandidate {
    /// Descriptor used to compare this candidate against the installed build
    pub fn descriptor(&self, device_id: &str) -> BuildDescriptor {
        BuildDescriptor {
            version: self.version.clone(),
            version_code: self.version_code,
            build_timestamp: self.timestamp,
            build_type: self.build_type,
            device_id: device_id.to_string(),
        }
    }
}

/// Release notes for a build
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChangelogEntry {
    /// Identifier of the build the notes belong to
    pub id: Option<String>,
    /// Version the notes belong to
    #[schema(value_type = Option<String>, example = "2.1")]
    pub version: Option<VersionNumber>,
    /// Release channel of the build
    pub build_type: BuildType,
    /// Notes body
    pub body: String,
}

impl ChangelogEntry {
    /// Whether these notes describe the given candidate
    ///
    /// Matches on id when both sides carry one, otherwise on version.
    /// Notes without either are treated as generic and always match.
    pub fn describes(&self, candidate: &UpdateCandidate) -> bool {
        match (&self.id, &self.version) {
            (Some(id), _) => id == &candidate.id,
            (None, Some(version)) => version == &candidate.version,
            (None, None) => true,
        }
    }
}

/// Remote kill-switch and policy flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RemoteConfiguration {
    /// Global kill-switch; when false no update is ever offered
    pub ota_enabled: bool,
    /// Only whitelisted devices may receive updates
    pub whitelist_only: bool,
}

/// Remote component kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Remote configuration (`ota_configuration`)
    Config,
    /// Release notes (`changelog`)
    Changelog,
    /// Update candidate (`updates`)
    Update,
}

impl ComponentKind {
    /// All component kinds, in check-cycle order
    pub const ALL: [ComponentKind; 3] = [
        ComponentKind::Config,
        ComponentKind::Update,
        ComponentKind::Changelog,
    ];

    /// Name used for the top-level JSON key, the endpoint and the cache file
    pub fn canonical_name(&self) -> &'static str {
        match self {
            ComponentKind::Config => "ota_configuration",
            ComponentKind::Changelog => "changelog",
            ComponentKind::Update => "updates",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Kinds of work the download orchestrator performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Remote configuration fetch
    Config,
    /// Changelog fetch
    Changelog,
    /// Update candidate fetch
    Update,
    /// Update artifact download
    Artifact,
}

impl TaskKind {
    /// Component fetched by this task, if it is a metadata fetch
    pub fn component(&self) -> Option<ComponentKind> {
        match self {
            TaskKind::Config => Some(ComponentKind::Config),
            TaskKind::Changelog => Some(ComponentKind::Changelog),
            TaskKind::Update => Some(ComponentKind::Update),
            TaskKind::Artifact => None,
        }
    }

    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Config => "config",
            TaskKind::Changelog => "changelog",
            TaskKind::Update => "update",
            TaskKind::Artifact => "artifact",
        }
    }
}

impl From<ComponentKind> for TaskKind {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Config => TaskKind::Config,
            ComponentKind::Changelog => TaskKind::Changelog,
            ComponentKind::Update => TaskKind::Update,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the machine entered the error state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FailureContext {
    /// Which task failed
    pub kind: TaskKind,
    /// Whether the failure was a cancellation
    pub cancelled: bool,
    /// Human-readable failure description
    pub message: String,
}

/// Update state as seen by the user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateState {
    /// Nothing has happened yet
    Idle,
    /// A check cycle is running
    Checking,
    /// An update is available for download
    Available,
    /// No update is available
    Unavailable,
    /// The update artifact is downloading
    Downloading,
    /// The update artifact is on disk
    Downloaded,
    /// The artifact has been handed to the installer
    Installing,
    /// A check or download failed
    Error {
        /// What failed
        failure: FailureContext,
    },
    /// The artifact download was paused
    Suspended,
}

impl UpdateState {
    /// Lowercase state name
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available => "available",
            UpdateState::Unavailable => "unavailable",
            UpdateState::Downloading => "downloading",
            UpdateState::Downloaded => "downloaded",
            UpdateState::Installing => "installing",
            UpdateState::Error { .. } => "error",
            UpdateState::Suspended => "suspended",
        }
    }

    /// Shorthand for an error state
    pub fn error(kind: TaskKind, message: impl Into<String>) -> Self {
        UpdateState::Error {
            failure: FailureContext {
                kind,
                cancelled: false,
                message: message.into(),
            },
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs accepted by the update state machine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateEvent {
    /// A check cycle was requested
    CheckRequested,
    /// The remote configuration could not be fetched or parsed
    ConfigFetchFailed {
        /// Failure description
        message: String,
    },
    /// The remote configuration was parsed
    ConfigParsed {
        /// Value of the kill-switch
        enabled: bool,
    },
    /// The update candidate could not be fetched
    UpdateFetchFailed {
        /// Failure description
        message: String,
    },
    /// The update candidate was parsed and evaluated
    UpdateParsed {
        /// Whether the candidate should be offered
        available: bool,
    },
    /// The user asked to download (or resume) the artifact
    DownloadRequested,
    /// The user paused the artifact download
    DownloadPaused,
    /// The artifact download failed or was cancelled
    DownloadFailed {
        /// Whether the failure was a cancellation
        cancelled: bool,
        /// Failure description
        message: String,
    },
    /// The artifact download finished
    DownloadCompleted,
    /// The artifact was handed to the installer
    InstallRequested,
    /// The installer reported a failure
    InstallFailed {
        /// Failure description
        message: String,
    },
    /// Return to the initial state
    Reset,
}

impl StateEvent {
    /// Snake-case event name
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::CheckRequested => "check_requested",
            StateEvent::ConfigFetchFailed { .. } => "config_fetch_failed",
            StateEvent::ConfigParsed { .. } => "config_parsed",
            StateEvent::UpdateFetchFailed { .. } => "update_fetch_failed",
            StateEvent::UpdateParsed { .. } => "update_parsed",
            StateEvent::DownloadRequested => "download_requested",
            StateEvent::DownloadPaused => "download_paused",
            StateEvent::DownloadFailed { .. } => "download_failed",
            StateEvent::DownloadCompleted => "download_completed",
            StateEvent::InstallRequested => "install_requested",
            StateEvent::InstallFailed { .. } => "install_failed",
            StateEvent::Reset => "reset",
        }
    }
}

/// A state transition, broadcast to every subscriber
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StateChange {
    /// Monotonic transition counter
    pub sequence: u64,
    /// State before the transition
    pub previous: UpdateState,
    /// State after the transition
    pub current: UpdateState,
    /// Event that caused the transition
    pub event: StateEvent,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Progress and completion notifications from the download orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchEvent {
    /// The transfer started (after any quiet period)
    Started {
        /// Task being fetched
        kind: TaskKind,
        /// Generation of the fetch
        generation: u64,
    },
    /// Bytes received so far
    Progress {
        /// Task being fetched
        kind: TaskKind,
        /// Generation of the fetch
        generation: u64,
        /// Bytes written so far
        bytes: u64,
        /// Total size, when the server reports it
        total: Option<u64>,
    },
    /// The fetched file is in place
    Success {
        /// Task that was fetched
        kind: TaskKind,
        /// Generation of the fetch
        generation: u64,
        /// Final local path
        path: PathBuf,
    },
    /// The fetch did not produce a usable file
    Failure {
        /// Task that failed
        kind: TaskKind,
        /// Generation of the fetch
        generation: u64,
        /// Whether the fetch was cancelled or superseded
        cancelled: bool,
        /// Failure description
        error: String,
    },
}

impl FetchEvent {
    /// Task the event belongs to
    pub fn kind(&self) -> TaskKind {
        match self {
            FetchEvent::Started { kind, .. }
            | FetchEvent::Progress { kind, .. }
            | FetchEvent::Success { kind, .. }
            | FetchEvent::Failure { kind, .. } => *kind,
        }
    }

    /// Generation of the fetch the event belongs to
    pub fn generation(&self) -> u64 {
        match self {
            FetchEvent::Started { generation, .. }
            | FetchEvent::Progress { generation, .. }
            | FetchEvent::Success { generation, .. }
            | FetchEvent::Failure { generation, .. } => *generation,
        }
    }
}
