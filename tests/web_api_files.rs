//! Web API file tests
//!
//! End-to-end tests for upload, download, list and delete over HTTP.

use axum::http::{header, HeaderName, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use coursedrop::web::handlers::AppState;
use coursedrop::web::middleware::IpThrottle;
use coursedrop::web::router::create_router;
use coursedrop::{AdmissionPipeline, ClientId, Config, TokenStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

const AUTH: HeaderName = HeaderName::from_static("x-auth-token");

struct TestApp {
    server: TestServer,
    alice: String,
    bob: String,
    _temp_dir: TempDir,
}

fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.upload_dir = temp_dir.path().join("uploads").display().to_string();
    config.paths.token_file = temp_dir.path().join("tokens.json").display().to_string();
    config.server.api_rate_limit = 1000;
    config.rate_limit.max_uploads = 3;
    config
}

fn create_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    configure(&mut config);

    let store = TokenStore::new(config.token_file());
    let alice = store.add(&ClientId::parse("alice").unwrap()).unwrap().token;
    let bob = store.add(&ClientId::parse("bob").unwrap()).unwrap().token;

    let pipeline = AdmissionPipeline::from_config(&config).unwrap();
    let app_state = Arc::new(AppState::new(pipeline));
    let throttle = Arc::new(IpThrottle::new(config.server.api_rate_limit));
    let router = create_router(app_state, throttle, &config.server.cors_origins);

    TestApp {
        server: TestServer::new(router).expect("Failed to create test server"),
        alice,
        bob,
        _temp_dir: temp_dir,
    }
}

fn create_test_app() -> TestApp {
    create_test_app_with(|_| {})
}

fn file_form(filename: &str, content: &[u8]) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(content.to_vec())
            .file_name(filename)
            .mime_type("application/octet-stream"),
    )
}

async fn upload(app: &TestApp, token: &str, filename: &str, content: &[u8]) -> Value {
    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, token.to_string())
        .multipart(file_form(filename, content))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health_needs_no_credential() {
    let app = create_test_app();

    let response = app.server.get("/api/health").await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_alice_scenario() {
    let app = create_test_app();

    let first = upload(&app, &app.alice, "notes.txt", b"0123456789").await;
    assert_eq!(first["filename"], "notes.txt");
    assert_eq!(first["size_bytes"], 10);
    assert_eq!(first["current_usage_bytes"], 10);
    assert_eq!(first["quota_mb"], 500.0);

    let second = upload(&app, &app.alice, "notes.txt", b"abcdefghij").await;
    assert_eq!(second["filename"], "notes_1.txt");
    assert_eq!(second["current_usage_bytes"], 20);

    let response = app
        .server
        .get("/api/list")
        .add_header(AUTH, app.alice.clone())
        .await;
    response.assert_status_ok();
    let listing = response.json::<Value>();
    assert_eq!(listing["total_files"], 2);
    assert_eq!(listing["total_usage_bytes"], 20);
    let mut names: Vec<&str> = listing["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["notes.txt", "notes_1.txt"]);

    let response = app
        .server
        .delete("/api/delete/notes.txt")
        .add_header(AUTH, app.alice.clone())
        .await;
    response.assert_status_ok();
    let deleted = response.json::<Value>();
    assert_eq!(deleted["filename"], "notes.txt");

    let response = app
        .server
        .get("/api/list")
        .add_header(AUTH, app.alice.clone())
        .await;
    let listing = response.json::<Value>();
    assert_eq!(listing["total_files"], 1);
    assert_eq!(listing["total_usage_bytes"], 10);
    assert_eq!(listing["files"][0]["filename"], "notes_1.txt");

    let response = app
        .server
        .get("/api/download/notes_1.txt")
        .add_header(AUTH, app.alice.clone())
        .await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"abcdefghij");
}

#[tokio::test]
async fn test_download_headers() {
    let app = create_test_app();
    upload(&app, &app.alice, "report.pdf", b"%PDF-1.4").await;

    let response = app
        .server
        .get("/api/download/report.pdf")
        .add_header(AUTH, app.alice.clone())
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), "application/pdf");
    assert!(response
        .header(header::CONTENT_DISPOSITION)
        .to_str()
        .unwrap()
        .starts_with("attachment; filename=\"report.pdf\""));
    assert_eq!(response.header("X-Content-Type-Options"), "nosniff");
}

#[tokio::test]
async fn test_bearer_credential_accepted() {
    let app = create_test_app();

    let response = app
        .server
        .get("/api/list")
        .add_header(header::AUTHORIZATION, format!("Bearer {}", app.alice))
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_missing_or_invalid_credential() {
    let app = create_test_app();

    let response = app.server.get("/api/list").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"]["code"], "UNAUTHENTICATED");

    let response = app
        .server
        .get("/api/list")
        .add_header(AUTH, "not-a-token".to_string())
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .post("/api/upload")
        .multipart(file_form("a.txt", b"x"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_credential_refused_before_body_is_read() {
    let app = create_test_app_with(|config| {
        config.storage.max_file_size_mb = 1;
    });
    let oversized = vec![b'x'; 3 * 1024 * 1024];

    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, "not-a-token".to_string())
        .multipart(file_form("big.txt", &oversized))
        .await;

    // Reading the body would have hit the size limit first
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_upload_rate_limit() {
    let app = create_test_app();

    for i in 0..3 {
        upload(&app, &app.alice, &format!("f{i}.txt"), b"x").await;
    }

    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, app.alice.clone())
        .multipart(file_form("f3.txt", b"x"))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert_eq!(body["error"]["details"]["limit"], 3);
    let retry_after: u64 = response
        .header(header::RETRY_AFTER)
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    // Other clients are unaffected
    upload(&app, &app.bob, "f.txt", b"x").await;
}

#[tokio::test]
async fn test_upload_rejects_disallowed_type() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, app.alice.clone())
        .multipart(file_form("virus.exe", b"MZ"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert!(body["error"]["details"]["allowed_extensions"]
        .as_array()
        .unwrap()
        .contains(&Value::from("txt")));
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, app.alice.clone())
        .multipart(MultipartForm::new().add_text("comment", "hello"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["message"], "no file provided");
}

#[tokio::test]
async fn test_upload_quota_exceeded() {
    let app = create_test_app_with(|config| {
        config.storage.client_quota_mb = 1;
        config.storage.max_file_size_mb = 1;
    });
    let megabyte = vec![b'x'; 1024 * 1024];

    upload(&app, &app.alice, "full.txt", &megabyte).await;

    let response = app
        .server
        .post("/api/upload")
        .add_header(AUTH, app.alice.clone())
        .multipart(file_form("one-more.txt", b"x"))
        .await;

    response.assert_status(StatusCode::INSUFFICIENT_STORAGE);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    assert_eq!(body["error"]["details"]["overage_bytes"], 1);
    assert_eq!(body["error"]["details"]["current_usage_mb"], 1.0);
}

#[tokio::test]
async fn test_clients_cannot_see_each_other() {
    let app = create_test_app();
    upload(&app, &app.alice, "private.txt", b"alice only").await;

    let response = app
        .server
        .get("/api/download/private.txt")
        .add_header(AUTH, app.bob.clone())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error"]["code"], "NOT_FOUND");

    let response = app
        .server
        .get("/api/download/..%2Falice%2Fprivate.txt")
        .add_header(AUTH, app.bob.clone())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = app
        .server
        .get("/api/list")
        .add_header(AUTH, app.bob.clone())
        .await;
    assert_eq!(response.json::<Value>()["total_files"], 0);
}

#[tokio::test]
async fn test_delete_missing_file() {
    let app = create_test_app();

    let response = app
        .server
        .delete("/api/delete/ghost.txt")
        .add_header(AUTH, app.alice.clone())
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_revoked_credential_is_rejected_immediately() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);
    let store = TokenStore::new(config.token_file());
    let carol = ClientId::parse("carol").unwrap();
    let token = store.add(&carol).unwrap().token;

    let pipeline = AdmissionPipeline::from_config(&config).unwrap();
    let router = create_router(
        Arc::new(AppState::new(pipeline)),
        Arc::new(IpThrottle::new(1000)),
        &[],
    );
    let server = TestServer::new(router).unwrap();

    server
        .get("/api/list")
        .add_header(AUTH, token.clone())
        .await
        .assert_status_ok();

    store.remove(&carol).unwrap();

    server
        .get("/api/list")
        .add_header(AUTH, token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
