// crates/marshal-core/src/core/run.rs
// ============================================================================
// Module: Run Marshal Run Model
// Description: Canonical run records, lifecycle states, and transitions.
// Purpose: Capture append-only run evolution for provenance and automation.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A run is the unit of coordination: one execution of an experiment
//! template. The orchestrator owns the lifecycle state machine; learners
//! report runtime status through heartbeats; health is derived from
//! heartbeat freshness. All state changes are recorded as append-only
//! transition entries so experiment provenance can be reconstructed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActorId;
use crate::core::identifiers::ExperimentId;
use crate::core::identifiers::ExperimentVersionId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Lifecycle State
// ============================================================================

/// Orchestrator-owned lifecycle state machine.
///
/// # Invariants
/// - Variants are stable for serialization and downstream automation.
/// - Terminal states are absorbing; see [`LifecycleState::is_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Run accepted and waiting for workers.
    Queued,
    /// Resources are being provisioned for the run.
    Provisioning,
    /// Learner is actively training.
    Running,
    /// Training suspended by operator command.
    Paused,
    /// Termination requested; learner is shutting down.
    Terminating,
    /// Run finished normally.
    Completed,
    /// Run ended with an error.
    Failed,
    /// Run was terminated by command.
    Terminated,
}

impl LifecycleState {
    /// Returns true when the state is terminal (absorbing).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminating => "terminating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

// ============================================================================
// SECTION: Runtime and Health Status
// ============================================================================

/// Learner-reported runtime status, reconciled via heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Learner reports active training.
    Running,
    /// Learner reports a paused loop.
    Paused,
    /// Learner reports it is shutting down.
    Terminating,
    /// Learner reports an unrecoverable error.
    Errored,
}

/// Orchestrator-derived heartbeat freshness assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Heartbeats are fresh.
    Healthy,
    /// No heartbeat within the stale threshold.
    HeartbeatStale,
    /// No heartbeat within the unresponsive threshold.
    Unresponsive,
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Canonical coordination record for one execution of an experiment.
///
/// # Invariants
/// - `current_step` and `checkpoint_version` never decrease across accepted
///   heartbeats.
/// - `last_heartbeat_at` never moves backwards.
/// - Once `state` is terminal the record no longer changes state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier, globally unique.
    pub id: RunId,
    /// Experiment the run belongs to.
    pub experiment_id: ExperimentId,
    /// Immutable experiment version the run was launched from.
    pub experiment_version_id: ExperimentVersionId,
    /// Scheduling priority; larger values are more urgent.
    pub priority: i64,
    /// Resolved launch manifest (template + overrides + scheduler metadata).
    pub launch_manifest: Value,
    /// Optional run-level overrides accumulated from tune commands.
    #[serde(default)]
    pub overrides: Option<Value>,
    /// Identity that created the run.
    pub created_by: ActorId,
    /// Orchestrator-owned lifecycle state.
    pub state: LifecycleState,
    /// Learner-reported runtime status.
    pub runtime_status: RuntimeStatus,
    /// Heartbeat-derived health status.
    pub health: HealthStatus,
    /// Latest observed training step.
    pub current_step: u64,
    /// Highest observed checkpoint version.
    pub checkpoint_version: u64,
    /// Rolling samples-per-second throughput.
    pub samples_per_second: f64,
    /// Last reported loss scalar.
    pub last_loss: f64,
    /// Last error reported by the learner, when any.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Timestamp of the last accepted heartbeat.
    #[serde(default)]
    pub last_heartbeat_at: Option<Timestamp>,
    /// Timestamp the run entered `running`, when it has.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// Timestamp the run entered a terminal state, when it has.
    #[serde(default)]
    pub ended_at: Option<Timestamp>,
    /// Creation timestamp (server clock).
    pub created_at: Timestamp,
    /// Last-update timestamp; doubles as the optimistic concurrency token.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: State Transitions
// ============================================================================

/// Append-only record of one observed lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Run the transition belongs to.
    pub run_id: RunId,
    /// Previous lifecycle state; `None` for the initial transition.
    pub previous: Option<LifecycleState>,
    /// New lifecycle state.
    pub next: LifecycleState,
    /// Identity that caused the transition.
    pub actor: ActorId,
    /// Optional human-readable reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Server-assigned transition timestamp.
    pub at: Timestamp,
}

/// Causes that can move a run between lifecycle states.
///
/// # Invariants
/// - Variants are stable; the transition table is total over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Scheduler ready-signal: first heartbeat with runtime `running`.
    StartSignal,
    /// Acknowledged pause command.
    PauseAck,
    /// Acknowledged resume command.
    ResumeAck,
    /// Acknowledged terminate command.
    TerminateAck,
    /// Heartbeat reported runtime status `errored`.
    HeartbeatErrored,
    /// Heartbeat reported runtime status `terminating` (normal completion).
    HeartbeatTerminating,
    /// Health monitor escalated the run to unresponsive with auto-terminate.
    UnresponsiveEscalation,
}

/// Returns the target state for a transition cause applied to `from`, or
/// `None` when the transition is not permitted.
///
/// Terminal states absorb every cause.
#[must_use]
pub const fn transition_target(
    from: LifecycleState,
    cause: TransitionCause,
) -> Option<LifecycleState> {
    if from.is_terminal() {
        return None;
    }
    match (from, cause) {
        (LifecycleState::Queued | LifecycleState::Provisioning, TransitionCause::StartSignal) => {
            Some(LifecycleState::Running)
        }
        (
            LifecycleState::Queued
            | LifecycleState::Provisioning
            | LifecycleState::Running
            | LifecycleState::Paused
            | LifecycleState::Terminating,
            TransitionCause::TerminateAck,
        ) => Some(LifecycleState::Terminated),
        (LifecycleState::Running, TransitionCause::PauseAck) => Some(LifecycleState::Paused),
        (LifecycleState::Running, TransitionCause::HeartbeatErrored) => {
            Some(LifecycleState::Failed)
        }
        (LifecycleState::Running, TransitionCause::HeartbeatTerminating) => {
            Some(LifecycleState::Completed)
        }
        (LifecycleState::Paused, TransitionCause::ResumeAck) => Some(LifecycleState::Running),
        (
            LifecycleState::Running | LifecycleState::Paused,
            TransitionCause::UnresponsiveEscalation,
        ) => Some(LifecycleState::Failed),
        _ => None,
    }
}
