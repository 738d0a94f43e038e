use super::*;
use crate::config::RetryConfig;
use crate::error::{ParseError, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UPDATES: &str = r#"{"updates": [{"datetime": 2000, "size": 11, "url": "https://dl.example.org/aospa-2.1.zip",
    "id": "abc", "version": "2.1"}]}"#;
const CONFIG: &str = r#"{"ota_configuration": [{"enabled": "true", "whitelist_only": "false"}]}"#;

enum Scripted {
    Body(&'static str),
    Status(u16),
}

/// Serves scripted responses per URL, optionally slowly
struct ScriptedTransport {
    responses: std::sync::Mutex<HashMap<String, VecDeque<Scripted>>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(latency: Duration) -> Self {
        Self {
            responses: std::sync::Mutex::new(HashMap::new()),
            latency,
            calls: AtomicUsize::new(0),
        }
    }

    fn respond(self, url: &str, response: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: ProgressFn<'_>,
    ) -> std::result::Result<u64, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(url.as_str()).expect("unexpected url");
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front().unwrap() {
                    Scripted::Body(body) => Scripted::Body(*body),
                    Scripted::Status(status) => Scripted::Status(*status),
                }
            }
        };

        // Write something first so cancellation leaves a partial file behind
        tokio::fs::write(destination, b"partial").await.unwrap();
        tokio::time::sleep(self.latency).await;

        match next {
            Scripted::Body(body) => {
                tokio::fs::write(destination, body).await.unwrap();
                progress(body.len() as u64, Some(body.len() as u64));
                Ok(body.len() as u64)
            }
            Scripted::Status(status) => Err(TransportError::Status {
                url: url.to_string(),
                status,
            }),
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    cache_dir: PathBuf,
    download_dir: PathBuf,
    store: Arc<ComponentStore>,
    orchestrator: DownloadOrchestrator,
}

fn server_config(base_url: &str) -> ServerConfig {
    ServerConfig {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

fn fixture(transport: Arc<dyn Transport>, quiet_period: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let download_dir = dir.path().join("downloads");
    let store = Arc::new(ComponentStore::new());
    let endpoints = Endpoints::new(&server_config("http://ota.test/api/"), "guacamole").unwrap();
    let settings = FetchConfig {
        quiet_period,
        cache_dir: cache_dir.clone(),
        download_dir: download_dir.clone(),
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    };
    let orchestrator = DownloadOrchestrator::new(transport, store.clone(), endpoints, settings);
    Fixture {
        _dir: dir,
        cache_dir,
        download_dir,
        store,
        orchestrator,
    }
}

fn leftover_parts(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".part"))
                .collect()
        })
        .unwrap_or_default()
}

fn candidate(url: &str) -> UpdateCandidate {
    UpdateCandidate {
        file_name: "aospa-2.1.zip".into(),
        download_url: url.into(),
        file_size_bytes: 11,
        timestamp: 2000,
        id: "abc".into(),
        version: "2.1".parse().unwrap(),
        version_code: 0,
        build_type: Default::default(),
        android_version: None,
        android_spl: None,
        device_changelog: None,
    }
}

#[test]
fn endpoints_follow_server_layout() {
    let endpoints = Endpoints::new(&server_config("https://ota.example.org/api"), "guacamole").unwrap();

    assert_eq!(
        endpoints.component_url(ComponentKind::Config).unwrap().as_str(),
        "https://ota.example.org/api/ota_configuration"
    );
    assert_eq!(
        endpoints.component_url(ComponentKind::Changelog).unwrap().as_str(),
        "https://ota.example.org/api/changelog"
    );
    assert_eq!(
        endpoints.component_url(ComponentKind::Update).unwrap().as_str(),
        "https://ota.example.org/api/updates/guacamole"
    );
}

#[test]
fn endpoints_escape_device_id() {
    let endpoints = Endpoints::new(&server_config("https://ota.example.org/"), "a b/c").unwrap();
    assert_eq!(
        endpoints.component_url(ComponentKind::Update).unwrap().as_str(),
        "https://ota.example.org/updates/a%20b%2Fc"
    );
}

#[test]
fn part_files_are_generation_tagged() {
    assert_eq!(
        part_path(Path::new("/cache/updates.json"), 7),
        PathBuf::from("/cache/updates.json.7.part")
    );
}

#[tokio::test]
async fn successful_fetch_parses_and_caches() {
    let transport = Arc::new(ScriptedTransport::new(Duration::ZERO).respond(
        "http://ota.test/api/updates/guacamole",
        Scripted::Body(UPDATES),
    ));
    let fx = fixture(transport, Duration::ZERO);

    let handle = fx.orchestrator.fetch(ComponentKind::Update).await.unwrap();
    let ticket = handle.ticket();
    let outcome = handle.outcome().await;

    let FetchOutcome::Success { path, component } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(path, fx.cache_dir.join("updates.json"));
    assert!(matches!(component, Some(Component::Update(ref c)) if c.id == "abc"));
    assert_eq!(fx.store.update_candidate().await.unwrap().id, "abc");
    assert!(fx.orchestrator.is_latest(ticket).await);
    assert!(fx.orchestrator.active().await.is_none());
    assert!(leftover_parts(&fx.cache_dir).is_empty());
}

#[tokio::test]
async fn request_during_quiet_period_supersedes_without_transfer() {
    let transport = Arc::new(
        ScriptedTransport::new(Duration::ZERO)
            .respond("http://ota.test/api/ota_configuration", Scripted::Body(CONFIG))
            .respond("http://ota.test/api/updates/guacamole", Scripted::Body(UPDATES)),
    );
    let fx = fixture(transport.clone(), Duration::from_millis(200));

    let first = fx.orchestrator.fetch(ComponentKind::Config).await.unwrap();
    let second = fx.orchestrator.fetch(ComponentKind::Update).await.unwrap();
    assert!(second.ticket().generation > first.ticket().generation);

    assert!(first.outcome().await.is_cancelled());
    assert!(matches!(second.outcome().await, FetchOutcome::Success { .. }));

    assert_eq!(transport.calls(), 1, "superseded fetch must not hit the server");
    assert!(fx.store.configuration().await.is_none());
}

#[tokio::test]
async fn superseded_transfer_is_discarded() {
    let transport = Arc::new(
        ScriptedTransport::new(Duration::from_millis(300))
            .respond("https://dl.example.org/aospa-2.1.zip", Scripted::Body("zip-payload"))
            .respond("http://ota.test/api/changelog", Scripted::Body(r#"{"changelog": [{"changelog_main": "x"}]}"#)),
    );
    let fx = fixture(transport, Duration::ZERO);

    let download = fx
        .orchestrator
        .download_artifact(&candidate("https://dl.example.org/aospa-2.1.zip"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let changelog = fx.orchestrator.fetch(ComponentKind::Changelog).await.unwrap();

    assert!(download.outcome().await.is_cancelled());
    assert!(matches!(changelog.outcome().await, FetchOutcome::Success { .. }));

    assert!(!fx.download_dir.join("aospa-2.1.zip").exists());
    assert!(leftover_parts(&fx.download_dir).is_empty());
}

#[tokio::test]
async fn cancel_active_stops_the_transfer() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_millis(300)).respond(
        "https://dl.example.org/aospa-2.1.zip",
        Scripted::Body("zip-payload"),
    ));
    let fx = fixture(transport, Duration::ZERO);

    let download = fx
        .orchestrator
        .download_artifact(&candidate("https://dl.example.org/aospa-2.1.zip"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(fx.orchestrator.cancel_active().await);
    assert!(download.outcome().await.is_cancelled());
    assert!(!fx.orchestrator.cancel_active().await);
    assert!(leftover_parts(&fx.download_dir).is_empty());
}

#[tokio::test]
async fn artifact_download_lands_in_download_dir() {
    let transport = Arc::new(ScriptedTransport::new(Duration::ZERO).respond(
        "https://dl.example.org/aospa-2.1.zip",
        Scripted::Body("zip-payload"),
    ));
    let fx = fixture(transport, Duration::from_secs(60));

    // Artifacts skip the quiet period
    let handle = fx
        .orchestrator
        .download_artifact(&candidate("https://dl.example.org/aospa-2.1.zip"))
        .await
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .unwrap();

    let FetchOutcome::Success { path, component } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(component.is_none());
    assert_eq!(path, fx.download_dir.join("aospa-2.1.zip"));
    assert_eq!(std::fs::read_to_string(path).unwrap(), "zip-payload");
}

#[tokio::test]
async fn unparseable_document_keeps_previous_component() {
    let transport = Arc::new(
        ScriptedTransport::new(Duration::ZERO)
            .respond("http://ota.test/api/updates/guacamole", Scripted::Body(UPDATES))
            .respond("http://ota.test/api/updates/guacamole", Scripted::Body(r#"{"updates": []}"#)),
    );
    let fx = fixture(transport, Duration::ZERO);

    let first = fx.orchestrator.fetch(ComponentKind::Update).await.unwrap();
    assert!(matches!(first.outcome().await, FetchOutcome::Success { .. }));

    let second = fx.orchestrator.fetch(ComponentKind::Update).await.unwrap();
    assert!(matches!(
        second.outcome().await,
        FetchOutcome::Failed(Error::Parse(ParseError::Empty { .. }))
    ));
    assert_eq!(fx.store.update_candidate().await.unwrap().id, "abc");
}

#[tokio::test]
async fn permanent_http_error_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(Duration::ZERO).respond(
        "http://ota.test/api/changelog",
        Scripted::Status(404),
    ));
    let fx = fixture(transport.clone(), Duration::ZERO);

    let handle = fx.orchestrator.fetch(ComponentKind::Changelog).await.unwrap();
    assert!(matches!(
        handle.outcome().await,
        FetchOutcome::Failed(Error::Transport(TransportError::Status { status: 404, .. }))
    ));
    assert_eq!(transport.calls(), 1);
    assert!(leftover_parts(&fx.cache_dir).is_empty());
}

#[tokio::test]
async fn transient_http_error_is_retried() {
    let transport = Arc::new(
        ScriptedTransport::new(Duration::ZERO)
            .respond("http://ota.test/api/ota_configuration", Scripted::Status(503))
            .respond("http://ota.test/api/ota_configuration", Scripted::Body(CONFIG)),
    );
    let fx = fixture(transport.clone(), Duration::ZERO);

    let handle = fx.orchestrator.fetch(ComponentKind::Config).await.unwrap();
    assert!(matches!(handle.outcome().await, FetchOutcome::Success { .. }));
    assert_eq!(transport.calls(), 2);
    assert!(fx.store.configuration().await.unwrap().ota_enabled);
}

#[tokio::test]
async fn events_report_lifecycle() {
    let transport = Arc::new(ScriptedTransport::new(Duration::ZERO).respond(
        "http://ota.test/api/ota_configuration",
        Scripted::Body(CONFIG),
    ));
    let fx = fixture(transport, Duration::ZERO);
    let mut events = fx.orchestrator.subscribe();

    let handle = fx.orchestrator.fetch(ComponentKind::Config).await.unwrap();
    let generation = handle.ticket().generation;
    handle.outcome().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.generation(), generation);
        assert_eq!(event.kind(), TaskKind::Config);
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(FetchEvent::Started { .. })));
    assert!(seen.iter().any(|e| matches!(e, FetchEvent::Progress { .. })));
    assert!(matches!(seen.last(), Some(FetchEvent::Success { .. })));
}

#[tokio::test]
async fn superseded_fetch_publishes_cancelled_failure() {
    let transport = Arc::new(
        ScriptedTransport::new(Duration::ZERO)
            .respond("http://ota.test/api/ota_configuration", Scripted::Body(CONFIG)),
    );
    let fx = fixture(transport, Duration::from_millis(200));
    let mut events = fx.orchestrator.subscribe();

    let first = fx.orchestrator.fetch(ComponentKind::Config).await.unwrap();
    let second = fx.orchestrator.fetch(ComponentKind::Config).await.unwrap();
    let first_generation = first.ticket().generation;
    assert!(!fx.orchestrator.is_latest(first.ticket()).await);

    first.outcome().await;
    second.outcome().await;

    let mut cancelled = false;
    while let Ok(event) = events.try_recv() {
        if let FetchEvent::Failure {
            generation,
            cancelled: true,
            ..
        } = event
        {
            assert_eq!(generation, first_generation);
            cancelled = true;
        }
    }
    assert!(cancelled);
}

#[tokio::test]
async fn http_transport_streams_body_to_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/updates/guacamole"))
        .respond_with(ResponseTemplate::new(200).set_body_string(UPDATES))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("updates.json");
    let transport = HttpTransport::new(&server_config(&server.uri())).unwrap();
    let url = Url::parse(&format!("{}/api/updates/guacamole", server.uri())).unwrap();

    let reported = AtomicU64::new(0);
    let progress = |bytes: u64, _total: Option<u64>| reported.store(bytes, Ordering::SeqCst);
    let written = transport.fetch(&url, &destination, &progress).await.unwrap();

    assert_eq!(written, UPDATES.len() as u64);
    assert_eq!(reported.load(Ordering::SeqCst), written);
    assert_eq!(std::fs::read_to_string(&destination).unwrap(), UPDATES);
}

#[tokio::test]
async fn http_transport_reports_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changelog"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let transport = HttpTransport::new(&server_config(&server.uri())).unwrap();
    let url = Url::parse(&format!("{}/changelog", server.uri())).unwrap();

    let result = transport
        .fetch(&url, &dir.path().join("changelog.json"), &|_: u64, _: Option<u64>| {})
        .await;
    assert!(matches!(
        result,
        Err(TransportError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn http_transport_times_out_on_stalled_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changelog"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        request_timeout: Duration::from_millis(200),
        ..server_config(&server.uri())
    };
    let transport = HttpTransport::new(&config).unwrap();
    let url = Url::parse(&format!("{}/changelog", server.uri())).unwrap();

    let result = transport
        .fetch(&url, &dir.path().join("changelog.json"), &|_: u64, _: Option<u64>| {})
        .await;
    assert!(matches!(result, Err(TransportError::Timeout { .. })));
}
