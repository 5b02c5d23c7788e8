// crates/marshal-core/src/core/command.rs
// ============================================================================
// Module: Run Marshal Command Model
// Description: Run-control commands, actors, and payload validation.
// Purpose: Enforce bounded, idempotent control intents with delivery stamps.
// Dependencies: crate::core::{identifiers, run, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Commands are operator- or system-initiated control intents directed at a
//! single run. Command identifiers are client-supplied so retries are
//! idempotent; payloads are validated against tight numeric bounds before a
//! command is accepted. Delivery and acknowledgement stamps are monotonic:
//! pending → delivered → acknowledged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ActorId;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::RunId;
use crate::core::run::LifecycleState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exclusive lower bound for `learning_rate`.
pub const LEARNING_RATE_MIN_EXCLUSIVE: f64 = 0.0;
/// Inclusive upper bound for `learning_rate`.
pub const LEARNING_RATE_MAX: f64 = 1.0;
/// Inclusive lower bound for `entropy_coef`.
pub const ENTROPY_COEF_MIN: f64 = 0.0;
/// Inclusive upper bound for `entropy_coef`.
pub const ENTROPY_COEF_MAX: f64 = 0.1;
/// Inclusive lower bound for `clip_epsilon`.
pub const CLIP_EPSILON_MIN: f64 = 0.05;
/// Inclusive upper bound for `clip_epsilon`.
pub const CLIP_EPSILON_MAX: f64 = 0.3;
/// Maximum length of tune notes in characters.
pub const MAX_NOTES_CHARS: usize = 256;
/// Maximum length of a terminate reason in characters.
pub const MAX_REASON_CHARS: usize = 256;

// ============================================================================
// SECTION: Actors
// ============================================================================

/// Actor kinds permitted to issue commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// Human operator acting through the dashboard or CLI.
    Operator,
    /// Automated system component (scheduler, health monitor).
    System,
}

/// Command-issuing principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor kind.
    #[serde(rename = "type")]
    pub kind: ActorKind,
    /// Principal identifier; must be non-empty.
    pub id: ActorId,
}

impl Actor {
    /// Creates a system actor with the given principal id.
    #[must_use]
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            id: ActorId::new(id),
        }
    }

    /// Creates an operator actor with the given principal id.
    #[must_use]
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Operator,
            id: ActorId::new(id),
        }
    }
}

// ============================================================================
// SECTION: Command Types
// ============================================================================

/// Recognized command types.
///
/// # Invariants
/// - Variants are stable for serialization and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Apply bounded numeric overrides without restart.
    Tune,
    /// Suspend a running learner.
    Pause,
    /// Resume a paused learner.
    Resume,
    /// Stop the run and release its workers.
    Terminate,
}

impl CommandType {
    /// Returns a stable label for the command type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tune => "tune",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Terminate => "terminate",
        }
    }
}

/// Canonical run command record.
///
/// # Invariants
/// - `(run_id, id)` is unique; identical re-submissions return this record.
/// - `delivered_at` is `None` until delivery; `acknowledged_at` requires
///   `delivered_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCommand {
    /// Command identifier, client-supplied for idempotency.
    pub id: CommandId,
    /// Target run.
    pub run_id: RunId,
    /// Command type.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Type-specific payload, stored as submitted.
    pub payload: Value,
    /// Issuing principal.
    pub actor: Actor,
    /// Client-declared issue time (ordering key within a run).
    pub issued_at: Timestamp,
    /// Server-assigned creation time.
    pub created_at: Timestamp,
    /// Delivery stamp; `None` while the command is pending.
    #[serde(default)]
    pub delivered_at: Option<Timestamp>,
    /// Acknowledgement stamp; `None` until the learner acknowledges.
    #[serde(default)]
    pub acknowledged_at: Option<Timestamp>,
}

impl RunCommand {
    /// Returns true when the command has not been delivered yet.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.delivered_at.is_none()
    }

    /// Returns true when the command has been acknowledged.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        self.delivered_at.is_some() && self.acknowledged_at.is_some()
    }

    /// Returns the FIFO ordering key for pending-command consumption:
    /// issued time, then creation time, then command id lexicographically.
    #[must_use]
    pub fn pending_order_key(&self) -> (Timestamp, Timestamp, &str) {
        (self.issued_at, self.created_at, self.id.as_str())
    }
}

// ============================================================================
// SECTION: Typed Payloads
// ============================================================================

/// Bounded numeric overrides carried by a `tune` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunePayload {
    /// Optimizer learning rate override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    /// Entropy bonus coefficient override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy_coef: Option<f64>,
    /// PPO clip epsilon override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_epsilon: Option<f64>,
    /// Free-form operator notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TunePayload {
    /// Returns true when no tunable parameter is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.learning_rate.is_none() && self.entropy_coef.is_none() && self.clip_epsilon.is_none()
    }
}

/// Payload carried by a `terminate` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminatePayload {
    /// Required termination reason.
    pub reason: String,
    /// Whether the learner should persist a final checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_checkpoint: Option<bool>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Command payload and envelope validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; messages avoid echoing
///   payload contents beyond the offending scalar.
#[derive(Debug, Error, PartialEq)]
pub enum CommandValidationError {
    /// Actor principal id is empty.
    #[error("actor id must be non-empty")]
    EmptyActorId,
    /// Payload failed to parse for the declared command type.
    #[error("malformed {command} payload: {message}")]
    Malformed {
        /// Command type label.
        command: &'static str,
        /// Parse failure description.
        message: String,
    },
    /// Tune payload carries no tunable parameter.
    #[error("tune payload must set at least one tunable")]
    NoTunables,
    /// Learning rate outside `(0, 1]`.
    #[error("learning_rate out of range (0, 1]: {0}")]
    LearningRateOutOfRange(f64),
    /// Entropy coefficient outside `[0, 0.1]`.
    #[error("entropy_coef out of range [0, 0.1]: {0}")]
    EntropyCoefOutOfRange(f64),
    /// Clip epsilon outside `[0.05, 0.3]`.
    #[error("clip_epsilon out of range [0.05, 0.3]: {0}")]
    ClipEpsilonOutOfRange(f64),
    /// Tune notes exceed the character limit.
    #[error("notes exceed {MAX_NOTES_CHARS} characters: {0}")]
    NotesTooLong(usize),
    /// Pause/resume payload must be empty.
    #[error("{0} payload must be empty")]
    PayloadNotEmpty(&'static str),
    /// Terminate reason is empty.
    #[error("terminate reason must be non-empty")]
    ReasonMissing,
    /// Terminate reason exceeds the character limit.
    #[error("terminate reason exceeds {MAX_REASON_CHARS} characters: {0}")]
    ReasonTooLong(usize),
}

/// Validates a command envelope's actor and payload against type-specific
/// bounds.
///
/// # Errors
///
/// Returns [`CommandValidationError`] describing the first violated rule.
pub fn validate_command(
    command_type: CommandType,
    actor: &Actor,
    payload: &Value,
) -> Result<(), CommandValidationError> {
    if actor.id.as_str().trim().is_empty() {
        return Err(CommandValidationError::EmptyActorId);
    }
    match command_type {
        CommandType::Tune => validate_tune_payload(payload),
        CommandType::Pause => validate_empty_payload("pause", payload),
        CommandType::Resume => validate_empty_payload("resume", payload),
        CommandType::Terminate => validate_terminate_payload(payload),
    }
}

/// Validates a `tune` payload against the tunable bounds.
fn validate_tune_payload(payload: &Value) -> Result<(), CommandValidationError> {
    let tune: TunePayload = serde_json::from_value(payload.clone()).map_err(|err| {
        CommandValidationError::Malformed {
            command: "tune",
            message: err.to_string(),
        }
    })?;
    if tune.is_empty() {
        return Err(CommandValidationError::NoTunables);
    }
    if let Some(rate) = tune.learning_rate
        && !(rate > LEARNING_RATE_MIN_EXCLUSIVE && rate <= LEARNING_RATE_MAX)
    {
        return Err(CommandValidationError::LearningRateOutOfRange(rate));
    }
    if let Some(coef) = tune.entropy_coef
        && !(ENTROPY_COEF_MIN..=ENTROPY_COEF_MAX).contains(&coef)
    {
        return Err(CommandValidationError::EntropyCoefOutOfRange(coef));
    }
    if let Some(epsilon) = tune.clip_epsilon
        && !(CLIP_EPSILON_MIN..=CLIP_EPSILON_MAX).contains(&epsilon)
    {
        return Err(CommandValidationError::ClipEpsilonOutOfRange(epsilon));
    }
    if let Some(notes) = &tune.notes
        && notes.chars().count() > MAX_NOTES_CHARS
    {
        return Err(CommandValidationError::NotesTooLong(notes.chars().count()));
    }
    Ok(())
}

/// Validates that a pause/resume payload is an empty object or null.
fn validate_empty_payload(
    command: &'static str,
    payload: &Value,
) -> Result<(), CommandValidationError> {
    let empty = match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        Ok(())
    } else {
        Err(CommandValidationError::PayloadNotEmpty(command))
    }
}

/// Validates a `terminate` payload.
fn validate_terminate_payload(payload: &Value) -> Result<(), CommandValidationError> {
    let terminate: TerminatePayload = serde_json::from_value(payload.clone()).map_err(|err| {
        CommandValidationError::Malformed {
            command: "terminate",
            message: err.to_string(),
        }
    })?;
    if terminate.reason.trim().is_empty() {
        return Err(CommandValidationError::ReasonMissing);
    }
    if terminate.reason.chars().count() > MAX_REASON_CHARS {
        return Err(CommandValidationError::ReasonTooLong(terminate.reason.chars().count()));
    }
    Ok(())
}

// ============================================================================
// SECTION: State Preconditions
// ============================================================================

/// Returns true when the run's lifecycle state permits submitting the
/// command type.
///
/// `pause` requires `running`; `resume` requires `paused`; `tune` requires
/// `running` or `paused`; `terminate` requires any non-terminal state.
#[must_use]
pub const fn command_permitted_in(command_type: CommandType, state: LifecycleState) -> bool {
    match command_type {
        CommandType::Pause => matches!(state, LifecycleState::Running),
        CommandType::Resume => matches!(state, LifecycleState::Paused),
        CommandType::Tune => matches!(state, LifecycleState::Running | LifecycleState::Paused),
        CommandType::Terminate => !state.is_terminal(),
    }
}
