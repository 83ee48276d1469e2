//! End-to-end export flow through the public API
//!
//! A wiremock server plays both the session endpoint and the catalog; the
//! router is driven with `oneshot` so no socket is bound for the service.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use catalog_export::api::{AppState, create_router};
use catalog_export::auth::{SessionTokenProbe, WebauthnSessionProvider};
use catalog_export::{AuthMode, CatalogDownloader, Config, ExportService};
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER_COOKIE: &str = "webauthn=owner-session";
const OTHER_COOKIE: &str = "webauthn=other-session";

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/authn/session"))
        .and(header_eq("cookie", OWNER_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client": {"id": "https://auth.example.org/U1", "display_name": "owner"},
            "attributes": [{"id": "https://auth.example.org/U1"}],
            "wallet": {}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authn/session"))
        .and(header_eq("cookie", OTHER_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client": {"id": "https://auth.example.org/U2"},
            "wallet": {}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ermrest/catalog/1/attribute/isa:dataset/id,title"))
        .and(header_eq("cookie", OWNER_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string("id,title\n1,alpha\n"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ermrest/catalog/1/entity/isa:sample"))
        .and(header_eq("cookie", OWNER_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id":1}]"#))
        .mount(server)
        .await;
}

fn app(server: &MockServer, dir: &TempDir) -> axum::Router {
    let mut config = Config {
        storage_path: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.auth.mode = AuthMode::Webauthn;
    config.auth.session_url = Some(format!("{}/authn/session", server.uri()));
    config.auth.request_timeout = Duration::from_secs(2);
    config.api.public_base_url = Some("https://exports.example.org".into());
    let config = Arc::new(config);

    let provider = WebauthnSessionProvider::new(&config.auth).unwrap();
    let probe =
        SessionTokenProbe::new(&config.auth.cookie_name, config.auth.request_timeout).unwrap();
    let downloader = CatalogDownloader::new(&config.auth.cookie_name).unwrap();
    let service = ExportService::new(config.clone(), Arc::new(downloader), Arc::new(probe));

    create_router(AppState::new(service, config, Arc::new(provider)))
}

fn export_spec(server: &MockServer) -> serde_json::Value {
    json!({
        "bag": {"bag_name": "dataset"},
        "catalog": {
            "host": server.uri(),
            "catalog_id": 1,
            "query_processors": [
                {"processor": "csv", "processor_params": {
                    "query_path": "/attribute/isa:dataset/id,title",
                    "output_path": "datasets"
                }},
                {"processor": "json", "processor_params": {
                    "query_path": "/entity/isa:sample",
                    "output_path": "samples"
                }}
            ]
        }
    })
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn bag_export_round_trip_with_owner_access() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server, &dir);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/export/bag")
                .header(header::COOKIE, OWNER_COOKIE)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(export_spec(&server).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let job_url = body.lines().next().unwrap().to_string();
    let job_path = job_url
        .strip_prefix("https://exports.example.org")
        .expect("links use the public base URL")
        .to_string();
    assert!(job_path.starts_with("/export/bag/"));

    // owner downloads the archive
    let response = app.clone().oneshot(get(&job_path, OWNER_COOKIE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "filename*=UTF-8''dataset.zip"
    );

    let bytes = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut csv = String::new();
    archive
        .by_name("dataset/data/datasets.csv")
        .unwrap()
        .read_to_string(&mut csv)
        .unwrap();
    assert_eq!(csv, "id,title\n1,alpha\n");
    assert!(archive.by_name("dataset/data/samples.json").is_ok());

    // the job log records who asked
    let response = app
        .clone()
        .oneshot(get(&format!("{job_path}/log"), OWNER_COOKIE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let log = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(log.contains("on behalf of user: owner"), "{log}");

    // another user is refused
    let response = app.clone().oneshot(get(&job_path, OTHER_COOKIE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn file_export_without_session_is_unauthorized() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(&server, &dir);

    let mut spec = export_spec(&server);
    spec.as_object_mut().unwrap().remove("bag");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/export/file")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(spec.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let queries = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().starts_with("/ermrest"))
        .count();
    assert_eq!(queries, 0);
}
