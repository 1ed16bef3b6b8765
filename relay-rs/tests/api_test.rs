//! Integration tests for the REST API
//!
//! Drives the axum router directly with mock system capabilities, so
//! no Postfix or package manager is required.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

use relay_rs::api::{ApiServer, AppState};
use relay_rs::backup::BackupManager;
use relay_rs::install::Installer;
use relay_rs::postfix::{Monitor, PostfixWriter};
use relay_rs::store::SenderStore;
use relay_rs::system::mock::{
    MockDaemon, MockMailClient, MockMapBuilder, MockPackageManager, MockQueueTool,
};
use relay_rs::system::SystemDetector;

struct TestApp {
    _dir: TempDir,
    router: Router,
    main_cf: PathBuf,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let main_cf = dir.path().join("main.cf");
    let sasl = dir.path().join("sasl_passwd");
    let socket = dir.path().join("pickup");
    let log = dir.path().join("mail.log");

    std::fs::write(
        &log,
        "Jan 10 10:00:01 host postfix/smtp[1]: AB12CD34EF: to=<a@b.io>, status=sent (ok)\n\
         Jan 10 10:00:02 host postfix/smtp[1]: FE98DC76BA: to=<c@d.io>, status=deferred (timeout)\n",
    )
    .unwrap();

    let daemon = Arc::new(MockDaemon::new(Some(socket.clone())));
    let writer = Arc::new(PostfixWriter::new(
        main_cf.clone(),
        sasl.clone(),
        Arc::new(MockMapBuilder::new()),
        daemon.clone(),
    ));
    let backups = Arc::new(BackupManager::new(
        dir.path().join("backups"),
        vec![main_cf.clone(), sasl],
    ));
    let installer = Arc::new(Installer::new(
        Arc::new(MockPackageManager::new()),
        daemon.clone(),
        writer.clone(),
        backups.clone(),
        socket,
        Duration::from_millis(10),
        Duration::from_millis(500),
    ));
    let monitor = Arc::new(Monitor::new(log, Arc::new(MockQueueTool::empty())));

    let state = Arc::new(AppState {
        store: SenderStore::new(dir.path().join("sender.json")),
        writer,
        installer,
        monitor,
        detector: SystemDetector::with_os_release(dir.path().join("os-release")),
        daemon,
        backups,
        mailer: Arc::new(MockMailClient::new()),
        config_lock: Mutex::new(()),
    });

    let router = ApiServer::new(state, "127.0.0.1:0".to_string()).router();
    TestApp {
        _dir: dir,
        router,
        main_cf,
    }
}

async fn request(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn sender_body(name: &str) -> Value {
    json!({
        "name": name,
        "provider": "custom",
        "host": "smtp.example.com",
        "port": 587,
        "username": "user@example.com",
        "password": "hunter2"
    })
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = request(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_sender_crud_returns_state() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/senders",
        Some(sender_body("primary")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profiles"].as_array().unwrap().len(), 1);
    assert_eq!(body["active"], Value::Null);

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/senders/primary/activate",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], "primary");

    let (status, body) = request(&app.router, Method::DELETE, "/api/senders/primary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["profiles"].as_array().unwrap().is_empty());
    assert_eq!(body["active"], Value::Null);
}

#[tokio::test]
async fn test_gmail_preset_fills_endpoint() {
    let app = test_app();
    let (status, _) = request(
        &app.router,
        Method::POST,
        "/api/senders",
        Some(json!({
            "name": "gm",
            "provider": "gmail",
            "username": "me@gmail.com",
            "password": "app-password"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(&app.router, Method::GET, "/api/senders", None).await;
    assert_eq!(body["profiles"][0]["host"], "smtp.gmail.com");
    assert_eq!(body["profiles"][0]["port"], 587);
}

#[tokio::test]
async fn test_duplicate_sender_is_kinded_error() {
    let app = test_app();
    request(&app.router, Method::POST, "/api/senders", Some(sender_body("dup"))).await;
    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/senders",
        Some(sender_body("dup")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "config_error");
    assert!(body["detail"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn test_unknown_sender_is_not_found() {
    let app = test_app();
    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/senders/ghost/activate",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_install_reaches_ready() {
    let app = test_app();
    request(&app.router, Method::POST, "/api/senders", Some(sender_body("relay"))).await;
    request(&app.router, Method::POST, "/api/senders/relay/activate", None).await;

    let (status, body) = request(&app.router, Method::POST, "/api/install", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");

    let content = std::fs::read_to_string(&app.main_cf).unwrap();
    assert!(content.contains("relayhost = [smtp.example.com]:587"));

    let (_, status_body) = request(&app.router, Method::GET, "/api/status", None).await;
    assert_eq!(status_body["install_state"], "ready");
    assert_eq!(status_body["daemon_active"], true);
}

#[tokio::test]
async fn test_install_without_active_sender_fails() {
    let app = test_app();
    let (status, body) = request(&app.router, Method::POST, "/api/install", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_config_snapshot_after_apply() {
    let app = test_app();
    request(&app.router, Method::POST, "/api/senders", Some(sender_body("relay"))).await;
    request(&app.router, Method::POST, "/api/senders/relay/activate", None).await;

    let (status, body) = request(&app.router, Method::POST, "/api/config/apply", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["directives"]["relayhost"], "[smtp.example.com]:587");
    assert_eq!(body["sasl_map_present"], true);

    let (_, body) = request(&app.router, Method::GET, "/api/config", None).await;
    assert_eq!(body["directives"]["smtp_tls_security_level"], "encrypt");
}

#[tokio::test]
async fn test_log_endpoints() {
    let app = test_app();

    let (status, body) = request(&app.router, Method::GET, "/api/log?lines=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"].as_array().unwrap().len(), 1);

    let (status, body) = request(&app.router, Method::GET, "/api/log/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["delivered"], 1);
    assert_eq!(body["deferred"], 1);
    assert_eq!(body["by_queue_id"]["AB12CD34EF"], "delivered");
}

#[tokio::test]
async fn test_queue_flush_returns_listing() {
    let app = test_app();
    let (status, body) = request(&app.router, Method::POST, "/api/queue/flush", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_test_requires_active_sender() {
    let app = test_app();
    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/send-test",
        Some(json!({"to": "ops@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    request(&app.router, Method::POST, "/api/senders", Some(sender_body("relay"))).await;
    request(&app.router, Method::POST, "/api/senders/relay/activate", None).await;

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/send-test",
        Some(json!({"to": "ops@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], true);
    assert_eq!(body["to"], "ops@example.com");
}

#[tokio::test]
async fn test_backup_lifecycle() {
    let app = test_app();
    std::fs::write(&app.main_cf, "myhostname = box\n").unwrap();

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/backups",
        Some(json!({"name": "before-change"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "before-change");

    std::fs::write(&app.main_cf, "myhostname = other\n").unwrap();
    let (status, _) = request(
        &app.router,
        Method::POST,
        "/api/backups/before-change/restore",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read_to_string(&app.main_cf).unwrap(),
        "myhostname = box\n"
    );

    let (status, body) = request(
        &app.router,
        Method::DELETE,
        "/api/backups/before-change",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_to_defaults() {
    let app = test_app();
    request(&app.router, Method::POST, "/api/senders", Some(sender_body("relay"))).await;
    request(&app.router, Method::POST, "/api/senders/relay/activate", None).await;
    request(&app.router, Method::POST, "/api/config/apply", None).await;

    let (status, body) = request(&app.router, Method::POST, "/api/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["directives"].as_object().unwrap().get("relayhost"), None);
    assert_eq!(body["sasl_map_present"], false);
}
