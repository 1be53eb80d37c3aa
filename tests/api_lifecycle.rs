//! End-to-end HTTP lifecycle tests: build the real Axum app over an
//! in-memory SQLite store and a tempdir Job State Directory, drive it with
//! `tower::ServiceExt::oneshot`, and (for the worker scenarios) run the
//! worker's claim/execute loop once against the same store/directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use orchestrator_core::server::build_app;
use orchestrator_core::store::{open_store, Store};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn test_store() -> Arc<dyn Store> {
    open_store("sqlite::memory:").await.unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `oneshot` requests never pass through `into_make_service_with_connect_info`,
/// so the `ConnectInfo<SocketAddr>` extension the IP-extraction middleware
/// needs is inserted by hand here, mirroring what that make-service wrapper
/// does for a real accepted connection.
fn with_connect_info(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    request
}

fn post(uri: &str, body: Value) -> Request<Body> {
    with_connect_info(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
}

fn get(uri: &str) -> Request<Body> {
    with_connect_info(
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
}

#[tokio::test]
async fn create_then_fetch_round_trips() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let response = app
        .clone()
        .oneshot(post("/api/jobs", json!({"command": "echo hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "queued");
    let job_id = created["job_id"].as_str().unwrap().to_string();
    assert_eq!(created["links"]["self"], format!("/api/jobs/{job_id}"));

    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["job_id"], job_id);
    assert_eq!(fetched["status"], "queued");
    assert_eq!(fetched["attempts"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let response = app.oneshot(get("/api/jobs/job_does_not_exist")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn strict_schema_rejects_unknown_fields() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let response = app
        .oneshot(post("/api/jobs", json!({"command": "x", "extra": 1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let response = app
        .oneshot(post("/api/jobs", json!({"command": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["details"]["field"], "command");
}

#[tokio::test]
async fn allowlist_denies_then_allows_matching_host() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let denied = app
        .clone()
        .oneshot(post(
            "/api/jobs",
            json!({
                "command": "curl http://evil.test/x",
                "policy": {"allowlist_domains": ["good.test"]}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body = body_json(denied).await;
    assert_eq!(body["error"]["code"], "policy_denied");

    let allowed = app
        .oneshot(post(
            "/api/jobs",
            json!({
                "command": "curl http://evil.test/x",
                "policy": {"allowlist_domains": ["evil.test"]}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn list_jobs_rejects_body_and_malformed_cursor() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let with_body = with_connect_info(
        Request::builder()
            .method("GET")
            .uri("/api/jobs")
            .body(Body::from("{}"))
            .unwrap(),
    );
    let response = app.clone().oneshot(with_body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/jobs?cursor=not-a-cursor")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["details"]["field"], "cursor");
}

#[tokio::test]
async fn pagination_walks_the_full_keyset() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let mut submitted = Vec::new();
    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(post("/api/jobs", json!({"command": format!("echo {i}")})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        submitted.push(body["job_id"].as_str().unwrap().to_string());
    }

    let page1 = app.clone().oneshot(get("/api/jobs?limit=2")).await.unwrap();
    assert_eq!(page1.status(), StatusCode::OK);
    let page1 = body_json(page1).await;
    let page1_items = page1["items"].as_array().unwrap();
    assert_eq!(page1_items.len(), 2);
    assert!(!page1["next_cursor"].is_null());

    let cursor = page1["next_cursor"].as_str().unwrap();
    let page2 = app
        .oneshot(get(&format!("/api/jobs?limit=2&cursor={cursor}")))
        .await
        .unwrap();
    assert_eq!(page2.status(), StatusCode::OK);
    let page2 = body_json(page2).await;
    let page2_items = page2["items"].as_array().unwrap();
    assert_eq!(page2_items.len(), 1);
    assert!(page2["next_cursor"].is_null());

    let mut seen: Vec<String> = page1_items
        .iter()
        .chain(page2_items.iter())
        .map(|item| item["job_id"].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    let mut expected = submitted.clone();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn logs_are_unavailable_before_any_attempt() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let created = app
        .clone()
        .oneshot(post("/api/jobs", json!({"command": "echo hi"})))
        .await
        .unwrap();
    let created = body_json(created).await;
    let job_id = created["job_id"].as_str().unwrap();

    let response = app.oneshot(get(&format!("/api/jobs/{job_id}/logs"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "logs_unavailable");
}

#[tokio::test]
async fn artifact_traversal_is_rejected() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 0);

    let created = app
        .clone()
        .oneshot(post("/api/jobs", json!({"command": "echo hi"})))
        .await
        .unwrap();
    let created = body_json(created).await;
    let job_id = created["job_id"].as_str().unwrap();

    let response = app
        .oneshot(get(&format!("/api/jobs/{job_id}/artifacts/..%2Fjob.json")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rate_limiter_returns_429_once_the_bucket_is_exhausted() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store, jobs_dir.path().to_path_buf(), 1);

    let response = app.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

/// Drives `orchestrator_core::worker::run` for a single claim against the
/// shared store/jobs_dir, then cancels the loop via its shutdown channel.
async fn run_worker_once(
    store: Arc<dyn Store>,
    jobs_dir: PathBuf,
    runner_timeout_secs: u64,
    wait: Duration,
) {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let config = orchestrator_core::worker::WorkerConfig {
        jobs_dir,
        log_dir: std::env::temp_dir().join(format!("orchestrator-test-logs-{}", uuid::Uuid::new_v4())),
        poll_interval: Duration::from_millis(20),
        timeout_secs: runner_timeout_secs,
    };
    let handle = tokio::spawn(orchestrator_core::worker::run(store, config, shutdown_rx));
    tokio::time::sleep(wait).await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn end_to_end_run_succeeds_and_exposes_logs() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store.clone(), jobs_dir.path().to_path_buf(), 0);

    let created = app
        .clone()
        .oneshot(post("/api/jobs", json!({"command": "echo hello"})))
        .await
        .unwrap();
    let created = body_json(created).await;
    let job_id = created["job_id"].as_str().unwrap().to_string();

    run_worker_once(
        store,
        jobs_dir.path().to_path_buf(),
        5,
        Duration::from_millis(300),
    )
    .await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "succeeded");
    let attempts = detail["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["status"], "succeeded");

    let response = app.oneshot(get(&format!("/api/jobs/{job_id}/logs"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let logs = body_json(response).await;
    let lines = logs["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["level"], "info");
    assert_eq!(lines[0]["message"], "hello");
}

#[tokio::test]
async fn timeout_marks_the_job_failed_with_exit_code_124() {
    let store = test_store().await;
    let jobs_dir = TempDir::new().unwrap();
    let app = build_app(store.clone(), jobs_dir.path().to_path_buf(), 0);

    let created = app
        .clone()
        .oneshot(post("/api/jobs", json!({"command": "sleep 5"})))
        .await
        .unwrap();
    let created = body_json(created).await;
    let job_id = created["job_id"].as_str().unwrap().to_string();

    run_worker_once(
        store,
        jobs_dir.path().to_path_buf(),
        1,
        Duration::from_millis(1_300),
    )
    .await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "failed");

    let response = app.oneshot(get(&format!("/api/jobs/{job_id}/logs"))).await.unwrap();
    let logs = body_json(response).await;
    let lines = logs["lines"].as_array().unwrap();
    assert!(lines
        .iter()
        .any(|line| line["message"].as_str().unwrap_or("").contains("[timeout after")));
}
