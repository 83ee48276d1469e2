use super::*;
use crate::auth::{IdentityProvider, InboundCredentials, TokenProbe};
use crate::config::AuthMode;
use crate::downloader::{DownloadRequest, Downloader};
use crate::error::DownloaderError;
use crate::types::{Artifact, AuthContext, Identity, ServerCoords, Wallet};
use crate::{Config, ExportService};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode, header};
use axum::response::Response;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;


const HOST: &str = "exports.test";

/// What the test downloader does when called
#[derive(Clone)]
enum Behavior {
    /// Write each `(name, content)` into the job directory
    Files(Vec<(&'static str, &'static str)>),
    /// Write `export.zip` and report an optional landing page or identifier
    Bag {
        landing_page: Option<&'static str>,
        persistent_id: Option<&'static str>,
    },
    /// Produce nothing, leaving a line in the job log
    Nothing,
    Fail(fn() -> DownloaderError),
    /// Sleep, then write `result.csv`
    Slow(Duration),
}

struct TestDownloader {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl TestDownloader {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for TestDownloader {
    async fn download(
        &self,
        request: DownloadRequest,
    ) -> std::result::Result<Vec<Artifact>, DownloaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Files(files) => {
                let mut artifacts = Vec::new();
                for (name, content) in files {
                    let path = request.output_dir.join(name);
                    tokio::fs::write(&path, content).await?;
                    artifacts.push(Artifact::local(*name, path));
                }
                Ok(artifacts)
            }
            Behavior::Bag {
                landing_page,
                persistent_id,
            } => {
                let path = request.output_dir.join("export.zip");
                tokio::fs::write(&path, b"PK\x05\x06bag").await?;
                Ok(vec![Artifact {
                    landing_page: landing_page.map(str::to_string),
                    persistent_id: persistent_id.map(str::to_string),
                    ..Artifact::local("export", path)
                }])
            }
            Behavior::Nothing => {
                request.log.warn("query returned no rows");
                Ok(Vec::new())
            }
            Behavior::Fail(make) => Err(make()),
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                let path = request.output_dir.join("result.csv");
                tokio::fs::write(&path, "id\n1\n").await?;
                Ok(vec![Artifact::local("result.csv", path)])
            }
        }
    }
}

struct StaticProbe(bool);

#[async_trait]
impl TokenProbe for StaticProbe {
    async fn is_live(&self, _server: &ServerCoords, _token: &str) -> bool {
        self.0
    }
}

/// `Authorization: Bearer <id>` names the requester; ids starting with
/// `nowallet-` come without a credential wallet
struct BearerIdentityProvider;

#[async_trait]
impl IdentityProvider for BearerIdentityProvider {
    async fn authenticate(&self, credentials: &InboundCredentials) -> AuthContext {
        match credentials.bearer_token() {
            Some(id) if id.starts_with("nowallet-") => {
                AuthContext::for_identity(Identity::new(id))
            }
            Some(id) => AuthContext::for_identity(Identity::new(id)).with_wallet(Wallet(json!({}))),
            None => AuthContext::anonymous(),
        }
    }
}

struct Harness {
    app: Router,
    downloader: Arc<TestDownloader>,
    config: Arc<Config>,
    _dir: TempDir,
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// All `.log` files written under the export root
    fn job_logs(&self) -> Vec<String> {
        walkdir::WalkDir::new(self.config.export_root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() == ".log")
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
            .collect()
    }
}

fn harness(behavior: Behavior) -> Harness {
    harness_with(behavior, true, |_| {})
}

fn harness_with(behavior: Behavior, probe_live: bool, configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config {
        storage_path: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.export.lock_timeout = Duration::from_millis(100);
    configure(&mut config);
    let config = Arc::new(config);

    let downloader = Arc::new(TestDownloader {
        behavior,
        calls: AtomicUsize::new(0),
    });
    let service = ExportService::new(
        config.clone(),
        downloader.clone(),
        Arc::new(StaticProbe(probe_live)),
    );
    let state = AppState::new(service, config.clone(), Arc::new(BearerIdentityProvider));

    Harness {
        app: create_router(state),
        downloader,
        config,
        _dir: dir,
    }
}

fn require_auth(config: &mut Config) {
    config.auth.mode = AuthMode::Webauthn;
}

fn spec() -> serde_json::Value {
    json!({
        "catalog": {
            "host": "catalog.example.org",
            "query_processors": [
                {"processor": "csv", "processor_params": {"query_path": "/entity/T", "output_path": "result"}}
            ]
        }
    })
}

fn post_export(uri: &str, body: impl Into<Body>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {id}"));
    }
    builder.body(body.into()).unwrap()
}

fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).header(header::HOST, HOST);
    if let Some(id) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {id}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Submit `spec()` and return the job path (`/export/<kind>/<key>`)
async fn create_job(h: &Harness, kind: &str, bearer: Option<&str>) -> String {
    let response = h
        .send(post_export(
            &format!("/export/{kind}"),
            spec().to_string(),
            bearer,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    job_path(&body_string(response).await, kind)
}

/// Job path from the last line of a uri-list body
fn job_path(uri_list: &str, kind: &str) -> String {
    let prefix = format!("http://{HOST}/export/{kind}/");
    let url = uri_list
        .lines()
        .find(|line| line.starts_with(&prefix))
        .expect("uri list holds a local URL");
    let key = url[prefix.len()..].split('/').next().unwrap();
    format!("/export/{kind}/{key}")
}

fn job_dir(h: &Harness, path: &str) -> PathBuf {
    let key = path.rsplit('/').next().unwrap();
    walkdir::WalkDir::new(h.config.export_root())
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == key)
        .map(|e| e.into_path())
        .expect("job directory exists")
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(Behavior::Nothing);

    let response = h.send(get_request("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_string(response).await;
    assert!(body.contains("ok"));
    assert!(body.contains(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = harness(Behavior::Nothing);

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-abc-123")
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(response.headers()["x-request-id"], "trace-abc-123");
}

#[tokio::test]
async fn test_openapi_endpoint() {
    let h = harness(Behavior::Nothing);

    let response = h.send(get_request("/openapi.json", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let spec: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(spec["paths"]["/export/{kind}"].is_object());
}

#[tokio::test]
async fn test_swagger_ui_can_be_disabled() {
    let enabled = harness(Behavior::Nothing);
    let response = enabled.send(get_request("/api-docs/openapi.json", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let disabled = harness_with(Behavior::Nothing, true, |c| c.api.swagger_ui = false);
    let response = disabled.send(get_request("/api-docs/openapi.json", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_enabled() {
    let h = harness_with(Behavior::Nothing, true, |c| {
        c.api.cors_enabled = true;
        c.api.cors_origins = vec!["*".to_string()];
    });

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let h = harness_with(Behavior::Nothing, true, |c| {
        c.api.cors_enabled = true;
        c.api.cors_origins = vec!["https://app.example.org".to_string()];
    });

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "https://app.example.org")
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example.org"
    );
}

#[tokio::test]
async fn test_api_server_stops_on_shutdown_signal() {
    let h = harness_with(Behavior::Nothing, true, |c| {
        c.api.bind_address = "127.0.0.1:0".parse().unwrap();
    });
    let service = ExportService::new(
        h.config.clone(),
        h.downloader.clone(),
        Arc::new(StaticProbe(true)),
    );
    let state = AppState::new(service, h.config.clone(), Arc::new(BearerIdentityProvider));

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(start_api_server(state, async move {
        rx.await.ok();
    }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops after shutdown")
        .unwrap();
    assert!(result.is_ok());
}
