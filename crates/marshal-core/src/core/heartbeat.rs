// crates/marshal-core/src/core/heartbeat.rs
// ============================================================================
// Module: Run Marshal Heartbeat Model
// Description: Learner-reported heartbeat payload and field validation.
// Purpose: Gate progress-counter updates behind strict payload rules.
// Dependencies: crate::core::{identifiers, run}, serde, serde_json
// ============================================================================

//! ## Overview
//! Heartbeats are the learner's periodic status report: runtime status plus
//! progress counters. Field validation happens before any store read;
//! monotonic-regression checks (step or checkpoint moving backwards) are a
//! separate concern enforced by the lifecycle engine against stored state.
//! Learner-supplied timestamps are ignored; the server clock stamps
//! `last_heartbeat_at`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::CommandId;
use crate::core::identifiers::RunId;
use crate::core::run::RuntimeStatus;

// ============================================================================
// SECTION: Heartbeat Payload
// ============================================================================

/// Learner heartbeat payload.
///
/// # Invariants
/// - `run_id` must match the run addressed by the request path.
/// - Counter fields are non-negative; `loss` must be finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Heartbeat {
    /// Run the heartbeat belongs to.
    pub run_id: RunId,
    /// Learner-reported runtime status.
    pub status: RuntimeStatus,
    /// Current training step.
    pub step: u64,
    /// Rolling samples-per-second throughput.
    pub samples_per_sec: f64,
    /// Last loss scalar.
    pub loss: f64,
    /// Highest checkpoint version persisted so far.
    pub checkpoint_version: u64,
    /// Commands the learner believes are still queued on its side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_commands: Option<Vec<CommandId>>,
    /// Free-form learner notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Learner-reported error detail when `status` is `errored`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Heartbeat field validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq)]
pub enum HeartbeatValidationError {
    /// Payload run id does not match the request path.
    #[error("heartbeat run_id {payload} does not match path run {path}")]
    RunIdMismatch {
        /// Run id carried in the payload.
        payload: RunId,
        /// Run id addressed by the request path.
        path: RunId,
    },
    /// Samples-per-second is negative or not finite.
    #[error("samples_per_sec must be a finite non-negative number: {0}")]
    SamplesPerSecInvalid(f64),
    /// Loss is not a finite number.
    #[error("loss must be a finite number: {0}")]
    LossNotFinite(f64),
}

/// Validates heartbeat fields against the run addressed by the request.
///
/// Negative `step` or `checkpoint_version` values are rejected during
/// deserialization because the fields are unsigned.
///
/// # Errors
///
/// Returns [`HeartbeatValidationError`] describing the first violated rule.
pub fn validate_heartbeat(
    heartbeat: &Heartbeat,
    path_run_id: &RunId,
) -> Result<(), HeartbeatValidationError> {
    if heartbeat.run_id != *path_run_id {
        return Err(HeartbeatValidationError::RunIdMismatch {
            payload: heartbeat.run_id.clone(),
            path: path_run_id.clone(),
        });
    }
    if !heartbeat.samples_per_sec.is_finite() || heartbeat.samples_per_sec < 0.0 {
        return Err(HeartbeatValidationError::SamplesPerSecInvalid(heartbeat.samples_per_sec));
    }
    if !heartbeat.loss.is_finite() {
        return Err(HeartbeatValidationError::LossNotFinite(heartbeat.loss));
    }
    Ok(())
}
