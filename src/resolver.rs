//! Update availability decisions
//!
//! [`resolve`] compares two build descriptors and nothing else. [`evaluate`]
//! layers the remote kill-switch and the local policy on top of it. Both are
//! pure and total.

use crate::config::PolicyConfig;
use crate::types::{BuildDescriptor, RemoteConfiguration};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use utoipa::ToSchema;

/// Why a candidate was or was not offered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Older version, offered because downgrades are allowed
    Downgrade,
    /// Same version with a newer build date
    Incremental,
    /// Newer version
    NewVersion,
    /// Nothing newer than the installed build
    UpToDate,
    /// Updates are switched off remotely
    Disabled,
    /// Server only serves whitelisted devices and this one is not
    WhitelistOnly,
    /// Pre-release build and the device has not opted in
    BetaOptOut,
}

/// Outcome of comparing a candidate with the installed build
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Verdict {
    /// Whether the candidate should be offered
    pub available: bool,
    /// Why
    pub reason: Reason,
}

impl Verdict {
    fn offer(reason: Reason) -> Self {
        Self {
            available: true,
            reason,
        }
    }

    fn withhold(reason: Reason) -> Self {
        Self {
            available: false,
            reason,
        }
    }
}

/// Decide whether `candidate` is an update for `installed`
///
/// First match wins: an older version is offered only when `allow_downgrade`
/// is set; otherwise the candidate must be strictly newer by build date, and
/// either the same version (a hotfix) or a newer one. Equal build dates never
/// make a candidate available.
pub fn resolve(
    installed: &BuildDescriptor,
    candidate: &BuildDescriptor,
    allow_downgrade: bool,
) -> Verdict {
    let newer_build = candidate.build_timestamp > installed.build_timestamp;
    match candidate.version.cmp(&installed.version) {
        Ordering::Less if allow_downgrade => Verdict::offer(Reason::Downgrade),
        Ordering::Equal if newer_build => Verdict::offer(Reason::Incremental),
        Ordering::Greater if newer_build => Verdict::offer(Reason::NewVersion),
        _ => Verdict::withhold(Reason::UpToDate),
    }
}

/// Full availability decision for a candidate
///
/// The kill-switch wins over everything, then the whitelist, then [`resolve`].
/// Pre-release builds found by [`resolve`] are withheld unless the device opted
/// into beta updates; explicit downgrades are exempt from the opt-in.
pub fn evaluate(
    installed: &BuildDescriptor,
    candidate: &BuildDescriptor,
    policy: &PolicyConfig,
    remote: &RemoteConfiguration,
) -> Verdict {
    if !remote.ota_enabled {
        return Verdict::withhold(Reason::Disabled);
    }
    if remote.whitelist_only && !policy.whitelisted {
        return Verdict::withhold(Reason::WhitelistOnly);
    }

    let verdict = resolve(installed, candidate, policy.allow_downgrade);
    if verdict.available
        && verdict.reason != Reason::Downgrade
        && candidate.build_type.is_prerelease()
        && !policy.allow_beta_updates
    {
        return Verdict::withhold(Reason::BetaOptOut);
    }
    verdict
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildType;

    fn build(version: &str, code: u64, ts: i64) -> BuildDescriptor {
        BuildDescriptor {
            version: version.parse().unwrap(),
            version_code: code,
            build_timestamp: ts,
            build_type: BuildType::Release,
            device_id: "guacamole".into(),
        }
    }

    fn enabled() -> RemoteConfiguration {
        RemoteConfiguration {
            ota_enabled: true,
            whitelist_only: false,
        }
    }

    #[test]
    fn newer_version_is_available() {
        let verdict = resolve(&build("2.0", 20, 1000), &build("2.1", 0, 2000), false);
        assert_eq!(verdict, Verdict::offer(Reason::NewVersion));
    }

    #[test]
    fn timestamp_regression_blocks_newer_version() {
        let installed = build("2.0", 20, 5000);
        assert_eq!(
            resolve(&installed, &build("2.1", 21, 10), false),
            Verdict::withhold(Reason::UpToDate)
        );
        assert!(!resolve(&installed, &build("2.1", 21, 5000), false).available);
    }

    #[test]
    fn structured_comparison_beats_float_comparison() {
        let verdict = resolve(&build("14.9", 0, 0), &build("14.10", 0, 1), false);
        assert_eq!(verdict.reason, Reason::NewVersion);
    }

    #[test]
    fn same_version_newer_date_is_incremental() {
        let installed = build("2.0", 20, 1000);
        assert_eq!(
            resolve(&installed, &build("2.0", 20, 1001), false),
            Verdict::offer(Reason::Incremental)
        );
        // A higher build number alone is not enough
        assert!(!resolve(&installed, &build("2.0", 21, 1000), false).available);
    }

    #[test]
    fn identical_build_is_not_available() {
        let installed = build("2.0", 20, 1000);
        let verdict = resolve(&installed, &installed, false);
        assert_eq!(verdict, Verdict::withhold(Reason::UpToDate));
        assert!(!resolve(&installed, &installed, true).available);
    }

    #[test]
    fn same_version_older_build_is_not_available() {
        let verdict = resolve(&build("2.0", 20, 1000), &build("2.0", 19, 900), false);
        assert!(!verdict.available);
    }

    #[test]
    fn older_version_requires_downgrade_opt_in() {
        let installed = build("2.0", 20, 1000);
        let older = build("1.9", 99, 9999);
        assert!(!resolve(&installed, &older, false).available);
        assert!(!resolve(&installed, &build("1.9", 1, 10), false).available);
        assert_eq!(
            resolve(&installed, &older, true),
            Verdict::offer(Reason::Downgrade)
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let installed = build("2.0", 20, 1000);
        let candidate = build("2.0", 21, 999);
        let first = resolve(&installed, &candidate, false);
        for _ in 0..10 {
            assert_eq!(resolve(&installed, &candidate, false), first);
        }
    }

    #[test]
    fn kill_switch_overrides_everything() {
        let policy = PolicyConfig {
            allow_downgrade: true,
            allow_beta_updates: true,
            whitelisted: true,
        };
        let remote = RemoteConfiguration {
            ota_enabled: false,
            whitelist_only: false,
        };
        let verdict = evaluate(
            &build("2.0", 20, 1000),
            &build("9.0", 90, 9000),
            &policy,
            &remote,
        );
        assert_eq!(verdict, Verdict::withhold(Reason::Disabled));
    }

    #[test]
    fn whitelist_only_excludes_other_devices() {
        let remote = RemoteConfiguration {
            ota_enabled: true,
            whitelist_only: true,
        };
        let installed = build("2.0", 20, 1000);
        let candidate = build("2.1", 21, 2000);

        let outsider = evaluate(&installed, &candidate, &PolicyConfig::default(), &remote);
        assert_eq!(outsider.reason, Reason::WhitelistOnly);

        let insider = PolicyConfig {
            whitelisted: true,
            ..PolicyConfig::default()
        };
        assert!(evaluate(&installed, &candidate, &insider, &remote).available);
    }

    #[test]
    fn beta_builds_need_opt_in() {
        let installed = build("2.0", 20, 1000);
        let mut beta = build("2.1", 21, 2000);
        beta.build_type = BuildType::Beta;

        let withheld = evaluate(&installed, &beta, &PolicyConfig::default(), &enabled());
        assert_eq!(withheld, Verdict::withhold(Reason::BetaOptOut));

        let opted_in = PolicyConfig {
            allow_beta_updates: true,
            ..PolicyConfig::default()
        };
        assert_eq!(
            evaluate(&installed, &beta, &opted_in, &enabled()).reason,
            Reason::NewVersion
        );
    }

    #[test]
    fn downgrade_to_prerelease_ignores_beta_opt_in() {
        let installed = build("2.0", 20, 1000);
        let mut older_beta = build("1.9", 19, 900);
        older_beta.build_type = BuildType::Beta;

        let policy = PolicyConfig {
            allow_downgrade: true,
            ..PolicyConfig::default()
        };
        assert_eq!(
            evaluate(&installed, &older_beta, &policy, &enabled()).reason,
            Reason::Downgrade
        );
    }
}
