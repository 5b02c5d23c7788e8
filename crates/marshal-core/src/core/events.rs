// crates/marshal-core/src/core/events.rs
// ============================================================================
// Module: Run Marshal Event Payloads
// Description: Status and command-lifecycle event records for fan-out.
// Purpose: Give downstream consumers level-triggered hints about run state.
// Dependencies: crate::core::{command, identifiers, run, time}, serde
// ============================================================================

//! ## Overview
//! The orchestrator publishes two event families: `run-status` (one per
//! committed run change, including health escalations and recoveries) and
//! `command-lifecycle` (one per command phase change). Events are best-effort
//! hints; subscribers reconcile from the store on reconnect. Persisted store
//! state remains the source of truth.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::command::CommandType;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::RunId;
use crate::core::run::HealthStatus;
use crate::core::run::LifecycleState;
use crate::core::run::Run;
use crate::core::run::RuntimeStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run Status Events
// ============================================================================

/// Snapshot event emitted after each committed run change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusEvent {
    /// Run the event describes.
    pub run_id: RunId,
    /// Lifecycle state after the change.
    pub state: LifecycleState,
    /// Runtime status after the change.
    pub runtime_status: RuntimeStatus,
    /// Health status after the change.
    pub health: HealthStatus,
    /// Current training step.
    pub step: u64,
    /// Rolling samples-per-second throughput.
    pub samples_per_second: f64,
    /// Last reported loss scalar.
    pub loss: f64,
    /// Last error reported for the run, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Human-readable event description (escalations, recoveries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Correlation identifier of the triggering request, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Server-assigned event time.
    pub at: Timestamp,
}

impl RunStatusEvent {
    /// Builds a status event from a committed run snapshot.
    #[must_use]
    pub fn from_run(run: &Run, at: Timestamp) -> Self {
        Self {
            run_id: run.id.clone(),
            state: run.state,
            runtime_status: run.runtime_status,
            health: run.health,
            step: run.current_step,
            samples_per_second: run.samples_per_second,
            loss: run.last_loss,
            last_error: run.last_error.clone(),
            description: None,
            correlation_id: None,
            at,
        }
    }

    /// Attaches a human-readable description to the event.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches the triggering request's correlation identifier.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

// ============================================================================
// SECTION: Command Lifecycle Events
// ============================================================================

/// Command lifecycle phases surfaced to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPhase {
    /// Command accepted and queued.
    Queued,
    /// Command handed to a consumer.
    Delivered,
    /// Command acknowledged by the learner.
    Acknowledged,
}

impl CommandPhase {
    /// Returns a stable label for the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
        }
    }
}

/// Event emitted once per command phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLifecycleEvent {
    /// Run the command targets.
    pub run_id: RunId,
    /// Command identifier.
    pub command_id: CommandId,
    /// Command type.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Phase the command entered.
    pub phase: CommandPhase,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Correlation identifier of the triggering request, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Server-assigned event time.
    pub at: Timestamp,
}
