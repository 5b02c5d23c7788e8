// crates/marshal-http/src/lib.rs
// ============================================================================
// Module: Run Marshal HTTP Library
// Description: REST surface for the orchestrator control plane.
// Purpose: Expose the lifecycle engine over `/api/v1` with strict limits.
// Dependencies: axum, marshal-core, tokio
// ============================================================================

//! ## Overview
//! This crate exposes the orchestrator over HTTP: run creation, heartbeat
//! ingestion, command submission/delivery/acknowledgement, run and
//! transition reads, and audit-chain verification. Requests are decoded and
//! bounded here; every mutation flows through the lifecycle engine so the
//! transition table and idempotency rules hold for all callers.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod error;
mod server;
mod throttle;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::ApiError;
pub use error::ErrorBody;
pub use error::ErrorEnvelope;
pub use server::AppState;
pub use server::CLIENT_ID_HEADER;
pub use server::CORRELATION_HEADER;
pub use server::ServerError;
pub use server::ServerLimits;
pub use server::build_router;
pub use server::serve;
pub use throttle::HeartbeatThrottle;
pub use throttle::ThrottleDecision;
