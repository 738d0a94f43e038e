//! Common test utilities for ota-hub integration tests

#![allow(dead_code)]

use ota_hub::{Config, UpdateEngine, UpdateState};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Device every test build targets
pub const DEVICE: &str = "guacamole";

/// Write a `build.prop` describing the installed build into `dir`
pub fn write_build_prop(dir: &Path, version: &str, build_date: i64, variant: &str) -> PathBuf {
    let path = dir.join("build.prop");
    let content = format!(
        "# installed build\n\
         ro.aospa.version.minor={version}\n\
         ro.aospa.version.code=20\n\
         ro.build.date.utc={build_date}\n\
         ro.aospa.build.variant={variant}\n\
         ro.aospa.device={DEVICE}\n\
         ro.build.version.release=14\n"
    );
    std::fs::write(&path, content).expect("Failed to write build.prop");
    path
}

/// Configuration rooted at `root`, talking to `server`, without retries or schedule
pub fn test_config(root: &Path, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.server.base_url = server.uri();
    config.server.request_timeout = Duration::from_secs(5);
    config.fetch.quiet_period = Duration::from_millis(20);
    config.fetch.cache_dir = root.join("cache");
    config.fetch.download_dir = root.join("downloads");
    config.fetch.retry.max_attempts = 0;
    config.persistence.database_path = root.join("ota-hub.db");
    config.properties_path = root.join("build.prop");
    config.schedule.enabled = false;
    config
}

/// Engine over `config`; the build.prop must already exist
pub async fn create_engine(config: Config) -> UpdateEngine {
    UpdateEngine::new(config)
        .await
        .expect("Failed to create engine")
}

/// Updates entry for version 2.1 built at t=2000
pub fn update_entry(server: &MockServer) -> Value {
    json!({
        "filename": "aospa-2.1-guacamole.zip",
        "datetime": "2000",
        "size": 17,
        "url": format!("{}/files/aospa-2.1-guacamole.zip", server.uri()),
        "id": "abc",
        "version": "2.1",
        "android_version": "14"
    })
}

/// Serve `body` as JSON at `route`
pub async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve the remote configuration
pub async fn mount_config(server: &MockServer, enabled: bool, whitelist_only: bool) {
    mount_json(
        server,
        "/ota_configuration",
        json!({ "ota_configuration": [{
            "enabled": enabled.to_string(),
            "whitelist_only": whitelist_only.to_string()
        }] }),
    )
    .await;
}

/// Serve a single update entry
pub async fn mount_update(server: &MockServer, entry: Value) {
    mount_json(server, &format!("/updates/{DEVICE}"), json!({ "updates": [entry] })).await;
}

/// Serve release notes for the 2.1 update
pub async fn mount_changelog(server: &MockServer) {
    mount_json(
        server,
        "/changelog",
        json!({ "changelog": [{ "md5": "abc", "changelog": "Faster boot" }] }),
    )
    .await;
}

/// Serve the artifact of the 2.1 update
pub async fn mount_artifact(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/files/aospa-2.1-guacamole.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-update-payload".to_vec()))
        .mount(server)
        .await;
}

/// Poll until the engine reaches a state matching `predicate`
pub async fn wait_for_state(
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
