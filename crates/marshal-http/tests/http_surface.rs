// crates/marshal-http/tests/http_surface.rs
// ============================================================================
// Module: HTTP Surface Tests
// Description: End-to-end request/response coverage over a live listener.
// ============================================================================
//! ## Overview
//! Boots the router on an ephemeral port and drives it with a minimal
//! HTTP/1.1 client over raw TCP: status mapping, error envelope shape, body
//! and content-type limits, throttling, and the command lifecycle.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::net::SocketAddr;
use std::sync::Arc;

use marshal_core::InMemoryRunStore;
use marshal_core::Lifecycle;
use marshal_core::LifecycleConfig;
use marshal_core::SharedEventPublisher;
use marshal_core::SharedRunStore;
use marshal_core::SystemClock;
use marshal_events::NoopPublisher;
use marshal_http::AppState;
use marshal_http::ServerLimits;
use marshal_http::build_router;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

// ============================================================================
// SECTION: Test Server and Client
// ============================================================================

/// Boots the router on an ephemeral port with the given limits.
async fn spawn_app(limits: ServerLimits) -> SocketAddr {
    let store = SharedRunStore::from_store(InMemoryRunStore::new());
    let publisher = SharedEventPublisher::from_publisher(NoopPublisher);
    let lifecycle =
        Lifecycle::new(store, publisher, Arc::new(SystemClock), LifecycleConfig::default());
    let router = build_router(AppState::new(lifecycle, limits));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}

/// Limits with throttling disabled, used by most tests.
fn open_limits() -> ServerLimits {
    ServerLimits {
        heartbeat_min_interval_ms: 0,
        ..ServerLimits::default()
    }
}

/// One parsed HTTP response.
struct HttpResponse {
    /// Status code.
    status: u16,
    /// Raw header block.
    headers: String,
    /// Body text.
    body: String,
}

impl HttpResponse {
    /// Parses the body as JSON.
    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    /// Returns the machine-readable error code from the envelope.
    fn error_code(&self) -> String {
        self.json()["error"]["code"].as_str().unwrap_or_default().to_string()
    }
}

/// Sends one request over a fresh connection and reads the full response.
async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let content_type_line =
        content_type.map_or_else(String::new, |value| format!("content-type: {value}\r\n"));
    let head = format!(
        "{method} {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n{content_type_line}content-length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.expect("write head");
    stream.write_all(body).await.expect("write body");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");
    let text = String::from_utf8_lossy(&raw).to_string();
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    HttpResponse {
        status,
        headers: head.to_ascii_lowercase(),
        body: body.to_string(),
    }
}

/// Posts a JSON value.
async fn post_json(addr: SocketAddr, path: &str, value: &Value) -> HttpResponse {
    let body = serde_json::to_vec(value).expect("serialize");
    request(addr, "POST", path, Some("application/json"), &body).await
}

/// Issues a GET request.
async fn get(addr: SocketAddr, path: &str) -> HttpResponse {
    request(addr, "GET", path, None, &[]).await
}

/// Creates run-1 and drives it to running.
async fn create_running_run(addr: SocketAddr) {
    let created = post_json(
        addr,
        "/api/v1/runs",
        &json!({
            "id": "run-1",
            "experiment_id": "exp-1",
            "version_id": "v1",
            "launch_manifest": {},
            "created_by": "alice"
        }),
    )
    .await;
    assert_eq!(created.status, 201);
    let heartbeat = post_json(
        addr,
        "/api/v1/runs/run-1/heartbeat",
        &json!({
            "run_id": "run-1",
            "status": "running",
            "step": 100,
            "samples_per_sec": 250.0,
            "loss": 0.42,
            "checkpoint_version": 1
        }),
    )
    .await;
    assert_eq!(heartbeat.status, 200);
}

// ============================================================================
// SECTION: Run Creation and Reads
// ============================================================================

/// Verifies creation, idempotent replay, and fetching (scenario 1 surface).
#[tokio::test]
async fn create_fetch_and_replay() {
    let addr = spawn_app(open_limits()).await;
    let body = json!({
        "id": "run-1",
        "experiment_id": "exp-1",
        "version_id": "v1",
        "launch_manifest": {},
        "created_by": "alice"
    });

    let created = post_json(addr, "/api/v1/runs", &body).await;
    assert_eq!(created.status, 201);
    assert_eq!(created.json()["state"], json!("queued"));
    assert!(created.headers.contains("x-correlation-id"));

    let replay = post_json(addr, "/api/v1/runs", &body).await;
    assert_eq!(replay.status, 200);

    let mut divergent = body.clone();
    divergent["created_by"] = json!("mallory");
    let conflict = post_json(addr, "/api/v1/runs", &divergent).await;
    assert_eq!(conflict.status, 409);
    assert_eq!(conflict.error_code(), "conflict");

    let fetched = get(addr, "/api/v1/runs/run-1").await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.json()["id"], json!("run-1"));

    let missing = get(addr, "/api/v1/runs/ghost").await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.error_code(), "not_found");

    let listed = get(addr, "/api/v1/runs?state=queued").await;
    assert_eq!(listed.status, 200);
    assert_eq!(listed.json().as_array().map(Vec::len), Some(1));
}

/// Verifies a non-JSON content type is rejected before parsing.
#[tokio::test]
async fn wrong_content_type_is_415() {
    let addr = spawn_app(open_limits()).await;
    let response = request(addr, "POST", "/api/v1/runs", Some("text/plain"), b"{}").await;
    assert_eq!(response.status, 415);
    assert_eq!(response.error_code(), "invalid");
}

/// Verifies malformed creation bodies are a 400 with the envelope shape.
#[tokio::test]
async fn malformed_create_body_is_400() {
    let addr = spawn_app(open_limits()).await;
    let response =
        request(addr, "POST", "/api/v1/runs", Some("application/json"), b"{not json").await;
    assert_eq!(response.status, 400);
    assert_eq!(response.error_code(), "invalid");
    assert!(response.json()["error"]["message"].is_string());
}

// ============================================================================
// SECTION: Heartbeats
// ============================================================================

/// Verifies heartbeat ingestion, regression conflict, and terminal conflict.
#[tokio::test]
async fn heartbeat_flow_and_regression() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let regression = post_json(
        addr,
        "/api/v1/runs/run-1/heartbeat",
        &json!({
            "run_id": "run-1",
            "status": "running",
            "step": 90,
            "samples_per_sec": 250.0,
            "loss": 0.4,
            "checkpoint_version": 1
        }),
    )
    .await;
    assert_eq!(regression.status, 409);
    assert_eq!(regression.error_code(), "conflict");

    let unknown = post_json(
        addr,
        "/api/v1/runs/ghost/heartbeat",
        &json!({
            "run_id": "ghost",
            "status": "running",
            "step": 1,
            "samples_per_sec": 1.0,
            "loss": 0.1,
            "checkpoint_version": 0
        }),
    )
    .await;
    assert_eq!(unknown.status, 404);
}

/// Verifies invalid heartbeat payloads are a 422.
#[tokio::test]
async fn invalid_heartbeat_payload_is_422() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let bad_status = post_json(
        addr,
        "/api/v1/runs/run-1/heartbeat",
        &json!({
            "run_id": "run-1",
            "status": "sleeping",
            "step": 200,
            "samples_per_sec": 250.0,
            "loss": 0.4,
            "checkpoint_version": 1
        }),
    )
    .await;
    assert_eq!(bad_status.status, 422);

    let negative_step = post_json(
        addr,
        "/api/v1/runs/run-1/heartbeat",
        &json!({
            "run_id": "run-1",
            "status": "running",
            "step": -1,
            "samples_per_sec": 250.0,
            "loss": 0.4,
            "checkpoint_version": 1
        }),
    )
    .await;
    assert_eq!(negative_step.status, 422);
}

/// Verifies the body-size boundary: exactly at the limit accepted, one byte
/// over rejected before parse.
#[tokio::test]
async fn heartbeat_body_size_boundary() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let base = json!({
        "run_id": "run-1",
        "status": "running",
        "step": 200,
        "samples_per_sec": 250.0,
        "loss": 0.4,
        "checkpoint_version": 1,
        "notes": ""
    });
    let skeleton = serde_json::to_vec(&base).expect("serialize");
    let max = ServerLimits::default().max_body_bytes;
    let padding = max - skeleton.len();
    let mut padded = base;
    padded["notes"] = json!("x".repeat(padding));

    let exact = serde_json::to_vec(&padded).expect("serialize");
    assert_eq!(exact.len(), max);
    let accepted = request(addr, "POST", "/api/v1/runs/run-1/heartbeat", Some("application/json"), &exact).await;
    assert_eq!(accepted.status, 200);

    padded["step"] = json!(201);
    padded["notes"] = json!("x".repeat(padding + 1));
    let over = serde_json::to_vec(&padded).expect("serialize");
    assert_eq!(over.len(), max + 1);
    let rejected = request(addr, "POST", "/api/v1/runs/run-1/heartbeat", Some("application/json"), &over).await;
    assert_eq!(rejected.status, 413);
    assert_eq!(rejected.error_code(), "invalid");
}

/// Verifies back-to-back heartbeats are throttled with a retry hint.
#[tokio::test]
async fn rapid_heartbeats_are_throttled() {
    let addr = spawn_app(ServerLimits::default()).await;
    create_running_run(addr).await;

    let throttled = post_json(
        addr,
        "/api/v1/runs/run-1/heartbeat",
        &json!({
            "run_id": "run-1",
            "status": "running",
            "step": 200,
            "samples_per_sec": 250.0,
            "loss": 0.4,
            "checkpoint_version": 1
        }),
    )
    .await;
    assert_eq!(throttled.status, 429);
    assert_eq!(throttled.error_code(), "rate_limited");
    assert!(throttled.headers.contains("retry-after"));
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Verifies the command lifecycle over HTTP (scenarios 2 and 3 surface).
#[tokio::test]
async fn command_lifecycle_over_http() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let envelope = json!({
        "id": "cmd-A",
        "type": "pause",
        "actor": {"type": "operator", "id": "alice"},
        "issued_at": "2024-05-09T11:00:00Z",
        "payload": {}
    });
    let submitted = post_json(addr, "/api/v1/runs/run-1/commands", &envelope).await;
    assert_eq!(submitted.status, 202);
    assert_eq!(submitted.json()["type"], json!("pause"));
    assert_eq!(submitted.json()["issued_at"], json!(1_715_252_400_000i64));

    let delivered = get(addr, "/api/v1/runs/run-1/commands/next").await;
    assert_eq!(delivered.status, 200);
    assert_eq!(delivered.json()["id"], json!("cmd-A"));
    assert!(delivered.json()["delivered_at"].is_i64());

    let empty = get(addr, "/api/v1/runs/run-1/commands/next").await;
    assert_eq!(empty.status, 204);

    let acked = request(
        addr,
        "POST",
        "/api/v1/runs/run-1/commands/cmd-A/ack",
        Some("application/json"),
        &[],
    )
    .await;
    assert_eq!(acked.status, 200);
    assert!(acked.json()["acknowledged_at"].is_i64());

    let run = get(addr, "/api/v1/runs/run-1").await;
    assert_eq!(run.json()["state"], json!("paused"));

    let transitions = get(addr, "/api/v1/runs/run-1/transitions").await;
    assert_eq!(transitions.status, 200);
    assert!(transitions.json().as_array().is_some_and(|list| list.len() >= 3));
}

/// Verifies out-of-bounds tune payloads are a 422 and divergent replays a
/// 409.
#[tokio::test]
async fn tune_bounds_and_divergent_replay_over_http() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let out_of_bounds = json!({
        "id": "cmd-B",
        "type": "tune",
        "actor": {"type": "operator", "id": "alice"},
        "issued_at": 1715252400000i64,
        "payload": {"learning_rate": 1.5}
    });
    let rejected = post_json(addr, "/api/v1/runs/run-1/commands", &out_of_bounds).await;
    assert_eq!(rejected.status, 422);

    let valid = json!({
        "id": "cmd-B",
        "type": "tune",
        "actor": {"type": "operator", "id": "alice"},
        "issued_at": 1715252400000i64,
        "payload": {"learning_rate": 0.5}
    });
    assert_eq!(post_json(addr, "/api/v1/runs/run-1/commands", &valid).await.status, 202);

    let mut divergent = valid.clone();
    divergent["payload"] = json!({"learning_rate": 0.25});
    let conflict = post_json(addr, "/api/v1/runs/run-1/commands", &divergent).await;
    assert_eq!(conflict.status, 409);
}

/// Verifies acknowledging an undelivered command is a 422.
#[tokio::test]
async fn ack_before_delivery_is_422() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let envelope = json!({
        "id": "cmd-A",
        "type": "pause",
        "actor": {"type": "operator", "id": "alice"},
        "issued_at": 1715252400000i64,
        "payload": {}
    });
    assert_eq!(post_json(addr, "/api/v1/runs/run-1/commands", &envelope).await.status, 202);

    let premature = request(
        addr,
        "POST",
        "/api/v1/runs/run-1/commands/cmd-A/ack",
        Some("application/json"),
        &[],
    )
    .await;
    assert_eq!(premature.status, 422);
    assert_eq!(premature.error_code(), "invalid");
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Verifies the audit chain verifies over HTTP after activity.
#[tokio::test]
async fn audit_chain_verifies_over_http() {
    let addr = spawn_app(open_limits()).await;
    create_running_run(addr).await;

    let report = get(addr, "/api/v1/audit/verify").await;
    assert_eq!(report.status, 200);
    assert_eq!(report.json()["valid"], json!(true));
    assert!(report.json()["entries"].as_u64().is_some_and(|count| count >= 2));
}
