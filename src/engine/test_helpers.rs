//! Shared test helpers for creating UpdateEngine instances in tests.

use crate::config::Config;
use crate::db::Database;
use crate::engine::UpdateEngine;
use crate::orchestrator::HttpTransport;
use crate::properties::StaticProperties;
use crate::types::{BuildDescriptor, BuildType, UpdateState};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Device the test build targets
pub(crate) const DEVICE: &str = "guacamole";

/// Installed build: 2.0, build 20, built at t=1000
pub(crate) fn installed() -> BuildDescriptor {
    BuildDescriptor {
        version: "2.0".parse().unwrap(),
        version_code: 20,
        build_timestamp: 1000,
        build_type: BuildType::Release,
        device_id: DEVICE.to_string(),
    }
}

/// Configuration with everything inside `root`, short quiet period, no retries
pub(crate) fn test_config(root: &Path, base_url: &str) -> Config {
    let mut config = Config::default();
    config.server.base_url = base_url.to_string();
    config.server.request_timeout = Duration::from_secs(5);
    config.fetch.quiet_period = Duration::from_millis(20);
    config.fetch.cache_dir = root.join("cache");
    config.fetch.download_dir = root.join("downloads");
    config.fetch.retry.max_attempts = 0;
    config.persistence.database_path = root.join("ota-hub.db");
    config.schedule.enabled = false;
    config
}

/// Build an engine over `config` with the test build installed
pub(crate) async fn engine_with_config(config: Config) -> UpdateEngine {
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let transport = HttpTransport::new(&config.server).unwrap();
    UpdateEngine::with_parts(
        config,
        Arc::new(db),
        Arc::new(transport),
        Arc::new(StaticProperties(installed())),
    )
    .await
    .unwrap()
}

/// Helper to create a test UpdateEngine talking to `server`.
/// Returns the engine and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine(server: &MockServer) -> (UpdateEngine, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), &server.uri());
    let engine = engine_with_config(config).await;
    (engine, temp_dir)
}

/// Configuration document with the given kill-switch
pub(crate) fn config_doc(enabled: bool) -> Value {
    json!({ "ota_configuration": [{ "enabled": enabled.to_string(), "whitelist_only": "false" }] })
}

/// Updates document offering version 2.1 built at t=2000, downloadable from `server`
pub(crate) fn updates_doc(server: &MockServer) -> Value {
    json!({
        "updates": [{
            "filename": "aospa-2.1-guacamole.zip",
            "datetime": 2000,
            "size": 500000000,
            "url": format!("{}/files/aospa-2.1-guacamole.zip", server.uri()),
            "id": "abc",
            "version": "2.1"
        }]
    })
}

/// Changelog document for the update in [`updates_doc`]
pub(crate) fn changelog_doc() -> Value {
    json!({ "changelog": [{ "id": "abc", "version": "2.1", "changelog_main": "Faster boot" }] })
}

/// Serve `body` as JSON at `route`
pub(crate) async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve a catalog that offers the 2.1 update with the given kill-switch
pub(crate) async fn mount_catalog(server: &MockServer, enabled: bool) {
    mount_json(server, "/ota_configuration", config_doc(enabled)).await;
    mount_json(server, &format!("/updates/{DEVICE}"), updates_doc(server)).await;
    mount_json(server, "/changelog", changelog_doc()).await;
}

/// Poll until the engine reaches a state matching `predicate`
pub(crate) async fn wait_for_state(
    engine: &UpdateEngine,
    predicate: impl Fn(&UpdateState) -> bool,
) -> UpdateState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = engine.state().await;
        if predicate(&state) {
            return state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for state, last state: {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
