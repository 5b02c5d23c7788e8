// crates/marshal-http/src/server.rs
// ============================================================================
// Module: HTTP Server
// Description: Axum REST surface wrapping the lifecycle engine.
// Purpose: Decode, validate, and map requests onto the canonical write paths.
// Dependencies: axum, marshal-core, tokio
// ============================================================================

//! ## Overview
//! The HTTP surface is a thin adapter: request decoding, body-size and
//! content-type enforcement, per-run heartbeat throttling, correlation-id
//! minting, and error mapping. All state mutation flows through the
//! lifecycle engine; handlers never touch the store directly. Lifecycle
//! calls run on the blocking pool under the configured request deadline so
//! a stalled store cannot pin the async workers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use marshal_core::core::audit::RequestMetadata;
use marshal_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use marshal_core::core::hashing::hash_bytes;
use marshal_core::core::heartbeat::Heartbeat;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::CorrelationId;
use marshal_core::core::identifiers::ExperimentId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::LifecycleState;
use marshal_core::core::verify_chain;
use marshal_core::interfaces::RunFilter;
use marshal_core::interfaces::RunStore;
use marshal_core::runtime::CommandEnvelope;
use marshal_core::runtime::CreateRun;
use marshal_core::runtime::Lifecycle;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::error::ApiError;
use crate::throttle::HeartbeatThrottle;
use crate::throttle::ThrottleDecision;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Response header carrying the server-minted correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Request header carrying an optional client identifier.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// HTTP server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listen address could not be bound.
    #[error("http bind failed: {0}")]
    Bind(String),
    /// Server terminated abnormally.
    #[error("http server failed: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Limits applied by the HTTP surface.
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
    /// Server-side request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Minimum milliseconds between accepted heartbeats per run.
    pub heartbeat_min_interval_ms: u64,
    /// Maximum tracked heartbeat throttle buckets.
    pub heartbeat_throttle_entries: usize,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 32 * 1024,
            request_timeout_ms: 30_000,
            heartbeat_min_interval_ms: 5_000,
            heartbeat_throttle_entries: 4_096,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle engine (single canonical write path).
    lifecycle: Lifecycle,
    /// Surface limits.
    limits: ServerLimits,
    /// Per-run heartbeat throttle.
    throttle: Arc<HeartbeatThrottle>,
    /// Monotonic counter for correlation ids.
    correlation_seq: Arc<AtomicU64>,
}

impl AppState {
    /// Creates server state over a lifecycle engine.
    #[must_use]
    pub fn new(lifecycle: Lifecycle, limits: ServerLimits) -> Self {
        let throttle = Arc::new(HeartbeatThrottle::new(
            limits.heartbeat_min_interval_ms,
            limits.heartbeat_throttle_entries,
        ));
        Self {
            lifecycle,
            limits,
            throttle,
            correlation_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Mints a correlation id for one request.
    fn mint_correlation_id(&self) -> CorrelationId {
        let seq = self.correlation_seq.fetch_add(1, Ordering::Relaxed);
        let now = self.lifecycle.clock().now().as_unix_millis();
        CorrelationId::new(format!("req-{now}-{seq}"))
    }
}

// ============================================================================
// SECTION: Router and Serve
// ============================================================================

/// Builds the `/api/v1` router over the given state.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/runs", post(create_run).get(list_runs))
        .route("/api/v1/runs/{run_id}", get(get_run))
        .route("/api/v1/runs/{run_id}/transitions", get(list_transitions))
        .route("/api/v1/runs/{run_id}/heartbeat", post(heartbeat))
        .route("/api/v1/runs/{run_id}/commands", post(submit_command))
        .route("/api/v1/runs/{run_id}/commands/next", get(next_command))
        .route("/api/v1/runs/{run_id}/commands/{command_id}/ack", post(ack_command))
        .route("/api/v1/audit/verify", get(verify_audit))
        .with_state(state)
}

/// Serves the API until the shutdown future resolves, draining in-flight
/// requests.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::Bind(err.to_string()))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| ServerError::Serve(err.to_string()))
}

// ============================================================================
// SECTION: Request Decoding
// ============================================================================

/// Enforces the JSON content type.
fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(content_type) = headers.get(CONTENT_TYPE) else {
        return Err(ApiError::unsupported_media_type());
    };
    let value = content_type.to_str().unwrap_or_default();
    if value == "application/json" || value.starts_with("application/json;") {
        Ok(())
    } else {
        Err(ApiError::unsupported_media_type())
    }
}

/// Enforces the body-size limit before parsing.
fn require_size(bytes: &Bytes, max_bytes: usize) -> Result<(), ApiError> {
    if bytes.len() > max_bytes {
        return Err(ApiError::payload_too_large(max_bytes));
    }
    Ok(())
}

/// Parses a JSON body, mapping failures to the given status.
fn parse_body<T: for<'de> Deserialize<'de>>(
    bytes: &Bytes,
    invalid_status: StatusCode,
) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|err| {
        if invalid_status == StatusCode::BAD_REQUEST {
            ApiError::bad_request(format!("malformed body: {err}"))
        } else {
            ApiError::unprocessable(format!("malformed body: {err}"))
        }
    })
}

/// Builds audit request metadata from connection info and headers.
fn request_metadata(
    peer: SocketAddr,
    headers: &HeaderMap,
    correlation_id: &CorrelationId,
) -> RequestMetadata {
    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let credential_fingerprint = headers
        .get(AUTHORIZATION)
        .map(|value| hash_bytes(DEFAULT_HASH_ALGORITHM, value.as_bytes()).value);
    RequestMetadata {
        source_address: Some(peer.to_string()),
        client_id,
        credential_fingerprint,
        correlation_id: Some(correlation_id.clone()),
    }
}

/// Runs a lifecycle call on the blocking pool under the request deadline.
async fn with_deadline<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    let deadline = Duration::from_millis(state.limits.request_timeout_ms.max(1));
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            marshal_core::runtime::ErrorCode::Internal,
            format!("handler task failed: {join_error}"),
        )),
        Err(_) => Err(ApiError::deadline_exceeded()),
    }
}

/// Builds a JSON response stamped with the correlation id.
fn respond<T: Serialize>(status: StatusCode, correlation_id: &CorrelationId, body: &T) -> Response {
    let payload = serde_json::to_value(body).unwrap_or(serde_json::Value::Null);
    let mut response = (status, Json(payload)).into_response();
    if let Ok(value) = correlation_id.as_str().parse() {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

// ============================================================================
// SECTION: Run Handlers
// ============================================================================

/// `POST /api/v1/runs` — create a run (idempotent on run id).
async fn create_run(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    require_json(&headers)?;
    require_size(&bytes, state.limits.max_body_bytes)?;
    let request: CreateRun = parse_body(&bytes, StatusCode::BAD_REQUEST)?;
    let correlation_id = state.mint_correlation_id();
    let metadata = request_metadata(peer, &headers, &correlation_id);
    let lifecycle = state.lifecycle.clone();
    let outcome = with_deadline(&state, move || {
        lifecycle
            .create_run(request, metadata)
            .map_err(|err| ApiError::from_lifecycle(&err, StatusCode::BAD_REQUEST))
    })
    .await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok(respond(status, &correlation_id, &outcome.run))
}

/// Query parameters for run listing.
#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    /// Filter on one lifecycle state.
    #[serde(default)]
    state: Option<LifecycleState>,
    /// Filter on one experiment.
    #[serde(default)]
    experiment_id: Option<String>,
    /// Maximum results.
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /api/v1/runs` — list runs, newest first.
async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let filter = RunFilter {
        lifecycle_states: query.state.map(|state| vec![state]),
        experiment_id: query.experiment_id.map(ExperimentId::new),
        limit: query.limit,
        ..RunFilter::default()
    };
    let lifecycle = state.lifecycle.clone();
    let runs = with_deadline(&state, move || {
        lifecycle.store().list_runs(&filter).map_err(|err| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                marshal_core::runtime::ErrorCode::Unavailable,
                err.to_string(),
            )
        })
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &runs))
}

/// `GET /api/v1/runs/{run_id}` — fetch one run.
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let lifecycle = state.lifecycle.clone();
    let run = with_deadline(&state, move || {
        lifecycle
            .store()
            .get_run(&RunId::new(run_id))
            .map_err(|err| ApiError::not_found(err.to_string()))
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &run))
}

/// `GET /api/v1/runs/{run_id}/transitions` — list lifecycle transitions.
async fn list_transitions(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let lifecycle = state.lifecycle.clone();
    let transitions = with_deadline(&state, move || {
        let run_id = RunId::new(run_id);
        lifecycle.store().get_run(&run_id).map_err(|err| ApiError::not_found(err.to_string()))?;
        lifecycle.store().list_transitions(&run_id).map_err(|err| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                marshal_core::runtime::ErrorCode::Unavailable,
                err.to_string(),
            )
        })
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &transitions))
}

// ============================================================================
// SECTION: Heartbeat Handler
// ============================================================================

/// `POST /api/v1/runs/{run_id}/heartbeat` — ingest a learner heartbeat.
async fn heartbeat(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    require_json(&headers)?;
    require_size(&bytes, state.limits.max_body_bytes)?;
    let run_id = RunId::new(run_id);
    let now = state.lifecycle.clock().now();
    match state.throttle.check(run_id.as_str(), now) {
        ThrottleDecision::Allow => {}
        ThrottleDecision::Limited { retry_after_ms } => {
            return Err(ApiError::rate_limited(retry_after_ms));
        }
    }
    let payload: Heartbeat = parse_body(&bytes, StatusCode::UNPROCESSABLE_ENTITY)?;
    let correlation_id = state.mint_correlation_id();
    let metadata = request_metadata(peer, &headers, &correlation_id);
    let lifecycle = state.lifecycle.clone();
    let run = with_deadline(&state, move || {
        lifecycle
            .ingest_heartbeat(&run_id, &payload, metadata)
            .map_err(|err| ApiError::from_lifecycle(&err, StatusCode::UNPROCESSABLE_ENTITY))
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &run))
}

// ============================================================================
// SECTION: Command Handlers
// ============================================================================

/// `POST /api/v1/runs/{run_id}/commands` — submit a command.
async fn submit_command(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    require_json(&headers)?;
    require_size(&bytes, state.limits.max_body_bytes)?;
    let envelope: CommandEnvelope = parse_body(&bytes, StatusCode::UNPROCESSABLE_ENTITY)?;
    let correlation_id = state.mint_correlation_id();
    let metadata = request_metadata(peer, &headers, &correlation_id);
    let lifecycle = state.lifecycle.clone();
    let run_id = RunId::new(run_id);
    let command = with_deadline(&state, move || {
        lifecycle
            .submit_command(&run_id, envelope, metadata)
            .map_err(|err| ApiError::from_lifecycle(&err, StatusCode::UNPROCESSABLE_ENTITY))
    })
    .await?;
    Ok(respond(StatusCode::ACCEPTED, &correlation_id, &command))
}

/// `GET /api/v1/runs/{run_id}/commands/next` — consume the next pending
/// command, or 204 when none is queued.
async fn next_command(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let metadata = request_metadata(peer, &headers, &correlation_id);
    let lifecycle = state.lifecycle.clone();
    let run_id = RunId::new(run_id);
    let delivered = with_deadline(&state, move || {
        lifecycle
            .next_command(&run_id, metadata)
            .map_err(|err| ApiError::from_lifecycle(&err, StatusCode::UNPROCESSABLE_ENTITY))
    })
    .await?;
    delivered.map_or_else(
        || Ok(StatusCode::NO_CONTENT.into_response()),
        |command| Ok(respond(StatusCode::OK, &correlation_id, &command)),
    )
}

/// `POST /api/v1/runs/{run_id}/commands/{command_id}/ack` — acknowledge a
/// delivered command (idempotent).
async fn ack_command(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((run_id, command_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let metadata = request_metadata(peer, &headers, &correlation_id);
    let lifecycle = state.lifecycle.clone();
    let run_id = RunId::new(run_id);
    let command_id = CommandId::new(command_id);
    let command = with_deadline(&state, move || {
        lifecycle
            .ack_command(&run_id, &command_id, metadata)
            .map_err(|err| ApiError::from_lifecycle(&err, StatusCode::UNPROCESSABLE_ENTITY))
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &command))
}

// ============================================================================
// SECTION: Audit Handler
// ============================================================================

/// Audit verification response payload.
#[derive(Debug, Serialize)]
struct AuditVerifyResponse {
    /// True when the full chain verified.
    valid: bool,
    /// Number of entries walked before success or failure.
    entries: u64,
    /// Hash of the final entry when the chain is non-empty and valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    head_hash: Option<String>,
    /// Failure description when the chain is broken.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /api/v1/audit/verify` — verify the audit chain end-to-end.
async fn verify_audit(State(state): State<AppState>) -> Result<Response, ApiError> {
    let correlation_id = state.mint_correlation_id();
    let lifecycle = state.lifecycle.clone();
    let response = with_deadline(&state, move || {
        let entries = lifecycle.store().list_audit().map_err(|err| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                marshal_core::runtime::ErrorCode::Unavailable,
                err.to_string(),
            )
        })?;
        let walked = u64::try_from(entries.len()).unwrap_or(u64::MAX);
        Ok(match verify_chain(&entries) {
            Ok(report) => AuditVerifyResponse {
                valid: true,
                entries: report.entries,
                head_hash: report.head_hash,
                error: None,
            },
            Err(err) => AuditVerifyResponse {
                valid: false,
                entries: walked,
                head_hash: None,
                error: Some(err.to_string()),
            },
        })
    })
    .await?;
    Ok(respond(StatusCode::OK, &correlation_id, &response))
}
