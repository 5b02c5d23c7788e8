// crates/marshal-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Run Marshal Lifecycle Engine
// Description: Every write path: run creation, heartbeats, commands, acks.
// Purpose: Keep one canonical execution path for all state mutation.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The lifecycle engine is the single canonical write path of the
//! orchestrator. All API surfaces must call into these methods so the
//! transition table, monotonic-progress invariants, idempotency rules, and
//! audit chain hold regardless of transport. Reads and writes go through the
//! injected [`RunStore`]; committed changes fan out through the injected
//! [`EventPublisher`] on a best-effort basis.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::audit::AuditAction;
use crate::core::audit::AuditEvent;
use crate::core::audit::RequestMetadata;
use crate::core::command::Actor;
use crate::core::command::CommandType;
use crate::core::command::RunCommand;
use crate::core::command::command_permitted_in;
use crate::core::command::validate_command;
use crate::core::events::CommandLifecycleEvent;
use crate::core::events::CommandPhase;
use crate::core::events::RunStatusEvent;
use crate::core::hashing::canonical_json_bytes;
use crate::core::heartbeat::Heartbeat;
use crate::core::heartbeat::validate_heartbeat;
use crate::core::identifiers::ActorId;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::ExperimentId;
use crate::core::identifiers::ExperimentVersionId;
use crate::core::identifiers::RunId;
use crate::core::run::HealthStatus;
use crate::core::run::LifecycleState;
use crate::core::run::Run;
use crate::core::run::RuntimeStatus;
use crate::core::run::StateTransition;
use crate::core::run::TransitionCause;
use crate::core::run::transition_target;
use crate::core::time::Clock;
use crate::core::time::Timestamp;
use crate::interfaces::EventPublisher;
use crate::interfaces::MarshalMetrics;
use crate::interfaces::NoopMetrics;
use crate::interfaces::RunStore;
use crate::interfaces::SharedEventPublisher;
use crate::interfaces::SharedRunStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Trigger that moves a run from `queued` to `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    /// First heartbeat with runtime status `running` starts the run.
    #[default]
    FirstHeartbeat,
    /// An external scheduler signal starts the run; heartbeats against a
    /// queued run update counters without advancing lifecycle.
    Manual,
}

/// Lifecycle engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Trigger for the `queued → running` transition.
    pub start_trigger: StartTrigger,
    /// Bounded attempts for optimistic-concurrency retries.
    pub occ_retry_limit: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_trigger: StartTrigger::FirstHeartbeat,
            occ_retry_limit: 3,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Machine-readable error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or rule-violating input.
    Invalid,
    /// Missing run or command.
    NotFound,
    /// Uniqueness, monotonicity, or precondition violation.
    Conflict,
    /// Request throttled.
    RateLimited,
    /// Transient storage or publisher failure after retries.
    Unavailable,
    /// Unclassified defect.
    Internal,
}

impl ErrorCode {
    /// Returns a stable label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

/// Lifecycle engine errors.
///
/// # Invariants
/// - Every variant maps to exactly one [`ErrorCode`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Malformed or rule-violating input.
    #[error("invalid request: {message}")]
    Invalid {
        /// Violation description.
        message: String,
    },
    /// Missing run or command.
    #[error("not found: {message}")]
    NotFound {
        /// Missing-target description.
        message: String,
    },
    /// Uniqueness, monotonicity, or precondition violation.
    #[error("conflict: {message}")]
    Conflict {
        /// Conflict description.
        message: String,
    },
    /// Transient storage failure after bounded retries.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Retryable failure description.
        message: String,
        /// Optional retry delay in milliseconds.
        retry_after_ms: Option<u64>,
    },
    /// Unclassified defect.
    #[error("internal error: {message}")]
    Internal {
        /// Defect description.
        message: String,
    },
}

impl LifecycleError {
    /// Returns the machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid { .. } => ErrorCode::Invalid,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Builds an invalid-input error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Builds a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(message) => Self::Conflict {
                message,
            },
            StoreError::NotFound(message) => Self::NotFound {
                message,
            },
            StoreError::NoCommands => Self::NotFound {
                message: "no pending commands".to_string(),
            },
            StoreError::Io(message) | StoreError::Store(message) => Self::Unavailable {
                message,
                retry_after_ms: None,
            },
            StoreError::Unavailable {
                message,
                retry_after_ms,
            } => Self::Unavailable {
                message,
                retry_after_ms,
            },
            StoreError::Invalid(message) | StoreError::Corrupt(message) => Self::Internal {
                message,
            },
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Run creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRun {
    /// Client-supplied run id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RunId>,
    /// Experiment the run belongs to.
    pub experiment_id: ExperimentId,
    /// Immutable experiment version to launch from.
    #[serde(rename = "version_id")]
    pub experiment_version_id: ExperimentVersionId,
    /// Resolved launch manifest.
    pub launch_manifest: Value,
    /// Optional launch-time overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    /// Scheduling priority; defaults to zero.
    #[serde(default)]
    pub priority: i64,
    /// Identity creating the run.
    pub created_by: ActorId,
}

/// Command submission envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Client-supplied command id (idempotency key).
    pub id: CommandId,
    /// Command type.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: Value,
    /// Issuing principal.
    pub actor: Actor,
    /// Client-declared issue time: unix milliseconds or an RFC 3339 string.
    #[serde(deserialize_with = "crate::core::time::timestamp_from_wire")]
    pub issued_at: Timestamp,
}

/// Outcome of an idempotent run creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRunOutcome {
    /// The stored run record.
    pub run: Run,
    /// True when this request inserted the run; false for an idempotent
    /// replay that returned the existing record.
    pub created: bool,
}

// ============================================================================
// SECTION: Lifecycle Engine
// ============================================================================

/// Lifecycle engine: the single canonical write path of the orchestrator.
#[derive(Clone)]
pub struct Lifecycle {
    /// Run store capability.
    store: SharedRunStore,
    /// Event fan-out capability.
    publisher: SharedEventPublisher,
    /// Clock capability.
    clock: Arc<dyn Clock>,
    /// Metrics sink.
    metrics: Arc<dyn MarshalMetrics>,
    /// Engine configuration.
    config: LifecycleConfig,
    /// Monotonic counter for generated run ids.
    run_seq: Arc<AtomicU64>,
}

impl Lifecycle {
    /// Creates a lifecycle engine with the default metrics sink.
    #[must_use]
    pub fn new(
        store: SharedRunStore,
        publisher: SharedEventPublisher,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self::with_metrics(store, publisher, clock, config, Arc::new(NoopMetrics))
    }

    /// Creates a lifecycle engine with a custom metrics sink.
    #[must_use]
    pub fn with_metrics(
        store: SharedRunStore,
        publisher: SharedEventPublisher,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
        metrics: Arc<dyn MarshalMetrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            metrics,
            config,
            run_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the engine's store handle.
    #[must_use]
    pub const fn store(&self) -> &SharedRunStore {
        &self.store
    }

    /// Returns the engine's clock handle.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // ------------------------------------------------------------------
    // Run creation
    // ------------------------------------------------------------------

    /// Creates a run, or returns the existing record when the id was already
    /// taken by an identical creation request.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Invalid`] on empty required fields and
    /// [`LifecycleError::Conflict`] when the id is taken by a divergent run.
    pub fn create_run(
        &self,
        request: CreateRun,
        metadata: RequestMetadata,
    ) -> Result<CreateRunOutcome, LifecycleError> {
        validate_create(&request)?;
        let now = self.clock.now();
        let run_id = match request.id.clone() {
            Some(id) => id,
            None => self.generate_run_id(now),
        };
        let run = Run {
            id: run_id.clone(),
            experiment_id: request.experiment_id.clone(),
            experiment_version_id: request.experiment_version_id.clone(),
            priority: request.priority,
            launch_manifest: request.launch_manifest.clone(),
            overrides: request.overrides.clone(),
            created_by: request.created_by.clone(),
            state: LifecycleState::Queued,
            runtime_status: RuntimeStatus::Running,
            health: HealthStatus::Healthy,
            current_step: 0,
            checkpoint_version: 0,
            samples_per_second: 0.0,
            last_loss: 0.0,
            last_error: None,
            last_heartbeat_at: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };
        match self.store.create_run(&run) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                let existing = self.store.get_run(&run_id)?;
                return if creation_matches(&existing, &request) {
                    Ok(CreateRunOutcome {
                        run: existing,
                        created: false,
                    })
                } else {
                    Err(LifecycleError::conflict(format!(
                        "run id {run_id} taken by a different run"
                    )))
                };
            }
            Err(err) => return Err(err.into()),
        }
        let transition = StateTransition {
            run_id: run_id.clone(),
            previous: None,
            next: LifecycleState::Queued,
            actor: ActorId::new(request.created_by.as_str()),
            reason: Some("created".to_string()),
            at: now,
        };
        self.store.append_transition(&transition)?;
        self.append_audit_event(AuditEvent {
            action: AuditAction::StateChanged,
            run_id: run_id.clone(),
            command_id: None,
            actor: Some(Actor::operator(request.created_by.as_str())),
            payload: transition_payload(&transition),
            metadata,
            at: now,
        });
        self.emit_status(RunStatusEvent::from_run(&run, now));
        Ok(CreateRunOutcome {
            run,
            created: true,
        })
    }

    /// Generates a run id from the clock and a process-local counter.
    fn generate_run_id(&self, now: Timestamp) -> RunId {
        let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
        RunId::new(format!("run-{}-{seq}", now.as_unix_millis()))
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    /// Ingests a learner heartbeat, updating counters, runtime status, and
    /// health, and applying heartbeat-driven lifecycle transitions.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Invalid`] on field violations,
    /// [`LifecycleError::Conflict`] on counter regressions or terminal runs,
    /// and [`LifecycleError::NotFound`] for unknown runs.
    pub fn ingest_heartbeat(
        &self,
        run_id: &RunId,
        heartbeat: &Heartbeat,
        metadata: RequestMetadata,
    ) -> Result<Run, LifecycleError> {
        validate_heartbeat(heartbeat, run_id)
            .map_err(|err| LifecycleError::invalid(err.to_string()))?;
        let mut attempt = 0u32;
        loop {
            let run = self.store.get_run(run_id)?;
            if run.state.is_terminal() {
                return Err(LifecycleError::conflict(format!(
                    "run {run_id} is {} and no longer accepts heartbeats",
                    run.state.as_str()
                )));
            }
            if heartbeat.step < run.current_step {
                return Err(LifecycleError::conflict(format!(
                    "step regression: {} < {}",
                    heartbeat.step, run.current_step
                )));
            }
            if heartbeat.checkpoint_version < run.checkpoint_version {
                return Err(LifecycleError::conflict(format!(
                    "checkpoint regression: {} < {}",
                    heartbeat.checkpoint_version, run.checkpoint_version
                )));
            }
            let now = self.clock.now();
            let recovered = run.health != HealthStatus::Healthy;
            let mut updated = run.clone();
            updated.current_step = heartbeat.step;
            updated.checkpoint_version = heartbeat.checkpoint_version;
            updated.samples_per_second = heartbeat.samples_per_sec;
            updated.last_loss = heartbeat.loss;
            updated.runtime_status = heartbeat.status;
            updated.health = HealthStatus::Healthy;
            if heartbeat.status == RuntimeStatus::Errored {
                updated.last_error =
                    heartbeat.error.clone().or_else(|| Some("learner reported errored".to_string()));
            }
            // Server clock is authoritative; never move the stamp backwards.
            updated.last_heartbeat_at =
                Some(run.last_heartbeat_at.map_or(now, |previous| previous.max(now)));
            let transition = self.heartbeat_transition(&run, heartbeat.status);
            if let Some((_, next)) = transition {
                apply_transition_fields(&mut updated, next, now);
                updated.state = next;
            }
            updated.updated_at = now;
            match self.store.update_run(&updated, run.updated_at) {
                Ok(()) => {
                    if let Some((cause, next)) = transition {
                        self.record_transition(
                            &updated,
                            run.state,
                            next,
                            ActorId::new("heartbeat"),
                            Some(transition_reason(cause)),
                            &metadata,
                            now,
                        );
                    }
                    let mut event = RunStatusEvent::from_run(&updated, now);
                    if recovered {
                        event = event.with_description("health recovered");
                    }
                    if let Some(correlation_id) = metadata.correlation_id.clone() {
                        event = event.with_correlation(correlation_id);
                    }
                    self.emit_status(event);
                    return Ok(updated);
                }
                Err(StoreError::Conflict(message)) => {
                    attempt = attempt.saturating_add(1);
                    self.metrics.record_occ_retry("heartbeat");
                    if attempt >= self.config.occ_retry_limit {
                        return Err(LifecycleError::Conflict {
                            message,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Computes the heartbeat-driven lifecycle transition, when any.
    fn heartbeat_transition(
        &self,
        run: &Run,
        status: RuntimeStatus,
    ) -> Option<(TransitionCause, LifecycleState)> {
        let cause = match (run.state, status) {
            (LifecycleState::Queued | LifecycleState::Provisioning, RuntimeStatus::Running)
                if self.config.start_trigger == StartTrigger::FirstHeartbeat =>
            {
                TransitionCause::StartSignal
            }
            (LifecycleState::Running, RuntimeStatus::Errored) => TransitionCause::HeartbeatErrored,
            (LifecycleState::Running, RuntimeStatus::Terminating) => {
                TransitionCause::HeartbeatTerminating
            }
            _ => return None,
        };
        transition_target(run.state, cause).map(|next| (cause, next))
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Submits a control command for a run.
    ///
    /// Identical re-submissions return the stored record; divergent payloads
    /// under the same id are rejected without mutation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Invalid`] on payload violations,
    /// [`LifecycleError::Conflict`] on precondition or idempotency
    /// violations, and [`LifecycleError::NotFound`] for unknown runs.
    pub fn submit_command(
        &self,
        run_id: &RunId,
        envelope: CommandEnvelope,
        metadata: RequestMetadata,
    ) -> Result<RunCommand, LifecycleError> {
        if envelope.id.as_str().trim().is_empty() {
            return Err(LifecycleError::invalid("command id must be non-empty"));
        }
        validate_command(envelope.command_type, &envelope.actor, &envelope.payload)
            .map_err(|err| LifecycleError::invalid(err.to_string()))?;
        let run = self.store.get_run(run_id)?;
        if let Some(existing) = self.idempotent_replay(run_id, &envelope)? {
            return Ok(existing);
        }
        if run.state.is_terminal() {
            return Err(LifecycleError::conflict(format!(
                "run {run_id} is {} and no longer accepts commands",
                run.state.as_str()
            )));
        }
        if !command_permitted_in(envelope.command_type, run.state) {
            return Err(LifecycleError::conflict(format!(
                "{} not permitted while run is {}",
                envelope.command_type.as_str(),
                run.state.as_str()
            )));
        }
        let now = self.clock.now();
        let candidate = RunCommand {
            id: envelope.id.clone(),
            run_id: run_id.clone(),
            command_type: envelope.command_type,
            payload: envelope.payload.clone(),
            actor: envelope.actor.clone(),
            issued_at: envelope.issued_at,
            created_at: now,
            delivered_at: None,
            acknowledged_at: None,
        };
        let stored = self.store.append_command(&candidate)?;
        if stored != candidate {
            // Idempotent replay of an identical command: no new audit entry,
            // no duplicate queued event.
            return Ok(stored);
        }
        self.append_audit_event(AuditEvent {
            action: AuditAction::CommandSubmitted,
            run_id: run_id.clone(),
            command_id: Some(stored.id.clone()),
            actor: Some(stored.actor.clone()),
            payload: command_payload(&stored),
            metadata: metadata.clone(),
            at: now,
        });
        self.emit_command(CommandLifecycleEvent {
            run_id: run_id.clone(),
            command_id: stored.id.clone(),
            command_type: stored.command_type,
            phase: CommandPhase::Queued,
            description: None,
            correlation_id: metadata.correlation_id,
            at: now,
        });
        Ok(stored)
    }

    /// Delivers the oldest pending command for a run, stamping delivery with
    /// a compare-and-set so at most one consumer receives it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown runs; an empty queue
    /// yields `Ok(None)`.
    pub fn next_command(
        &self,
        run_id: &RunId,
        metadata: RequestMetadata,
    ) -> Result<Option<RunCommand>, LifecycleError> {
        self.store.get_run(run_id)?;
        let mut attempt = 0u32;
        loop {
            let pending = match self.store.next_pending_command(run_id) {
                Ok(command) => command,
                Err(StoreError::NoCommands) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let now = self.clock.now();
            match self.store.deliver_command(run_id, &pending.id, now) {
                Ok(delivered) => {
                    self.append_audit_event(AuditEvent {
                        action: AuditAction::CommandDelivered,
                        run_id: run_id.clone(),
                        command_id: Some(delivered.id.clone()),
                        actor: Some(delivered.actor.clone()),
                        payload: command_payload(&delivered),
                        metadata: metadata.clone(),
                        at: now,
                    });
                    self.emit_command(CommandLifecycleEvent {
                        run_id: run_id.clone(),
                        command_id: delivered.id.clone(),
                        command_type: delivered.command_type,
                        phase: CommandPhase::Delivered,
                        description: None,
                        correlation_id: metadata.correlation_id,
                        at: now,
                    });
                    return Ok(Some(delivered));
                }
                Err(StoreError::Conflict(_)) => {
                    // Lost the delivery race; another consumer took it.
                    attempt = attempt.saturating_add(1);
                    self.metrics.record_occ_retry("deliver");
                    if attempt >= self.config.occ_retry_limit {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Acknowledges a delivered command, applying its lifecycle effect.
    ///
    /// Re-acknowledgement is idempotent and returns the stored record
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown commands and
    /// [`LifecycleError::Invalid`] when the command was never delivered.
    pub fn ack_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
        metadata: RequestMetadata,
    ) -> Result<RunCommand, LifecycleError> {
        let mut command = self.store.get_command(run_id, command_id)?;
        if command.delivered_at.is_none() {
            return Err(LifecycleError::invalid(format!(
                "command {command_id} acknowledged before delivery"
            )));
        }
        if command.acknowledged_at.is_some() {
            return Ok(command);
        }
        let now = self.clock.now();
        command.acknowledged_at = Some(now);
        self.store.save_command(&command)?;
        self.append_audit_event(AuditEvent {
            action: AuditAction::CommandAcknowledged,
            run_id: run_id.clone(),
            command_id: Some(command.id.clone()),
            actor: Some(command.actor.clone()),
            payload: command_payload(&command),
            metadata: metadata.clone(),
            at: now,
        });
        self.emit_command(CommandLifecycleEvent {
            run_id: run_id.clone(),
            command_id: command.id.clone(),
            command_type: command.command_type,
            phase: CommandPhase::Acknowledged,
            description: None,
            correlation_id: metadata.correlation_id.clone(),
            at: now,
        });
        self.apply_ack_effect(&command, &metadata)?;
        Ok(command)
    }

    /// Returns the stored command when the envelope replays an existing
    /// submission with a canonically identical payload.
    fn idempotent_replay(
        &self,
        run_id: &RunId,
        envelope: &CommandEnvelope,
    ) -> Result<Option<RunCommand>, LifecycleError> {
        let existing = match self.store.get_command(run_id, &envelope.id) {
            Ok(command) => command,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let stored_bytes = canonical_json_bytes(&existing.payload)
            .map_err(|err| LifecycleError::Internal {
                message: err.to_string(),
            })?;
        let submitted_bytes = canonical_json_bytes(&envelope.payload)
            .map_err(|err| LifecycleError::Internal {
                message: err.to_string(),
            })?;
        if existing.command_type == envelope.command_type && stored_bytes == submitted_bytes {
            return Ok(Some(existing));
        }
        Err(LifecycleError::conflict(format!(
            "command {} resubmitted with divergent payload",
            envelope.id
        )))
    }

    /// Applies the lifecycle effect of an acknowledged command.
    fn apply_ack_effect(
        &self,
        command: &RunCommand,
        metadata: &RequestMetadata,
    ) -> Result<(), LifecycleError> {
        let cause = match command.command_type {
            CommandType::Pause => Some(TransitionCause::PauseAck),
            CommandType::Resume => Some(TransitionCause::ResumeAck),
            CommandType::Terminate => Some(TransitionCause::TerminateAck),
            CommandType::Tune => None,
        };
        let mut attempt = 0u32;
        loop {
            let run = self.store.get_run(&command.run_id)?;
            if run.state.is_terminal() {
                // Terminal states absorb in-flight effects; the ack stamp
                // stands but the record no longer changes.
                return Ok(());
            }
            let now = self.clock.now();
            let mut updated = run.clone();
            let transition = cause.and_then(|cause| {
                transition_target(run.state, cause).map(|next| (cause, next))
            });
            if command.command_type == CommandType::Tune {
                updated.overrides = Some(merge_overrides(run.overrides.as_ref(), &command.payload));
            } else if let Some((_, next)) = transition {
                apply_transition_fields(&mut updated, next, now);
                updated.state = next;
            } else {
                // The run moved to a state that absorbs this ack (for
                // example it failed while the command was in flight). The
                // acknowledgement stamp stands; no transition is recorded.
                return Ok(());
            }
            updated.updated_at = now;
            match self.store.update_run(&updated, run.updated_at) {
                Ok(()) => {
                    if let Some((cause, next)) = transition {
                        self.record_transition(
                            &updated,
                            run.state,
                            next,
                            ActorId::new(command.actor.id.as_str()),
                            Some(transition_reason(cause)),
                            metadata,
                            now,
                        );
                    }
                    self.emit_status(RunStatusEvent::from_run(&updated, now));
                    return Ok(());
                }
                Err(StoreError::Conflict(message)) => {
                    attempt = attempt.saturating_add(1);
                    self.metrics.record_occ_retry("ack");
                    if attempt >= self.config.occ_retry_limit {
                        return Err(LifecycleError::Conflict {
                            message,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Health updates
    // ------------------------------------------------------------------

    /// Applies a health-monitor derived status to a run, emitting the
    /// escalation or recovery event exactly once per entry.
    ///
    /// Returns the updated run, or `None` when the stored health already
    /// matches the target.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the store write fails after retries.
    pub fn apply_health(
        &self,
        run_id: &RunId,
        target: HealthStatus,
        auto_terminate: bool,
    ) -> Result<Option<Run>, LifecycleError> {
        let mut attempt = 0u32;
        loop {
            let run = self.store.get_run(run_id)?;
            if run.state.is_terminal() || run.health == target {
                return Ok(None);
            }
            let now = self.clock.now();
            let mut updated = run.clone();
            updated.health = target;
            updated.updated_at = now;
            match self.store.update_run(&updated, run.updated_at) {
                Ok(()) => {
                    let description = match target {
                        HealthStatus::Healthy => "health recovered",
                        HealthStatus::HeartbeatStale => "health escalated: heartbeat_stale",
                        HealthStatus::Unresponsive => "health escalated: unresponsive",
                    };
                    self.metrics.record_escalation(health_label(target));
                    self.emit_status(
                        RunStatusEvent::from_run(&updated, now).with_description(description),
                    );
                    if target == HealthStatus::Unresponsive && auto_terminate {
                        self.auto_terminate(&updated);
                    }
                    return Ok(Some(updated));
                }
                Err(StoreError::Conflict(message)) => {
                    attempt = attempt.saturating_add(1);
                    self.metrics.record_occ_retry("health");
                    if attempt >= self.config.occ_retry_limit {
                        return Err(LifecycleError::Conflict {
                            message,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Enqueues a system terminate command for an unresponsive run.
    ///
    /// The command id is derived from the run id so repeated escalations
    /// collapse into one idempotent submission.
    fn auto_terminate(&self, run: &Run) {
        if run.state == LifecycleState::Terminating
            || !command_permitted_in(CommandType::Terminate, run.state)
        {
            return;
        }
        let envelope = CommandEnvelope {
            id: CommandId::new(format!("terminate-unresponsive-{}", run.id)),
            command_type: CommandType::Terminate,
            payload: serde_json::json!({ "reason": "unresponsive" }),
            actor: Actor::system("health-monitor"),
            issued_at: self.clock.now(),
        };
        if let Err(err) = self.submit_command(&run.id, envelope, RequestMetadata::default()) {
            // Conflicts mean the command already exists; anything else is a
            // store failure the next scan retries.
            if err.code() != ErrorCode::Conflict {
                self.metrics.record_publish_failure("auto_terminate");
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Appends a transition record plus its audit entry.
    fn record_transition(
        &self,
        run: &Run,
        previous: LifecycleState,
        next: LifecycleState,
        actor: ActorId,
        reason: Option<&'static str>,
        metadata: &RequestMetadata,
        at: Timestamp,
    ) {
        let transition = StateTransition {
            run_id: run.id.clone(),
            previous: Some(previous),
            next,
            actor,
            reason: reason.map(ToString::to_string),
            at,
        };
        if self.store.append_transition(&transition).is_err() {
            // The run update already committed; a missing transition row is
            // recoverable from the audit chain.
            self.metrics.record_publish_failure("transition");
        }
        self.append_audit_event(AuditEvent {
            action: AuditAction::StateChanged,
            run_id: run.id.clone(),
            command_id: None,
            actor: None,
            payload: transition_payload(&transition),
            metadata: metadata.clone(),
            at,
        });
    }

    /// Appends an audit event, counting failures without failing the caller.
    fn append_audit_event(&self, event: AuditEvent) {
        if self.store.append_audit(event).is_err() {
            self.metrics.record_publish_failure("audit");
        }
    }

    /// Publishes a status event, counting failures without failing the
    /// caller.
    fn emit_status(&self, event: RunStatusEvent) {
        if self.publisher.publish_status(&event).is_err() {
            self.metrics.record_publish_failure("run-status");
        }
    }

    /// Publishes a command-lifecycle event, counting failures without
    /// failing the caller.
    fn emit_command(&self, event: CommandLifecycleEvent) {
        if self.publisher.publish_command(&event).is_err() {
            self.metrics.record_publish_failure("command-lifecycle");
        }
    }
}

// ============================================================================
// SECTION: Free Helpers
// ============================================================================

/// Validates required creation fields.
fn validate_create(request: &CreateRun) -> Result<(), LifecycleError> {
    if let Some(id) = &request.id
        && id.as_str().trim().is_empty()
    {
        return Err(LifecycleError::invalid("run id must be non-empty"));
    }
    if request.experiment_id.as_str().trim().is_empty() {
        return Err(LifecycleError::invalid("experiment_id must be non-empty"));
    }
    if request.experiment_version_id.as_str().trim().is_empty() {
        return Err(LifecycleError::invalid("version_id must be non-empty"));
    }
    if request.created_by.as_str().trim().is_empty() {
        return Err(LifecycleError::invalid("created_by must be non-empty"));
    }
    Ok(())
}

/// Returns true when an existing run matches a creation request's declared
/// fields, making the creation an idempotent replay.
fn creation_matches(existing: &Run, request: &CreateRun) -> bool {
    existing.experiment_id == request.experiment_id
        && existing.experiment_version_id == request.experiment_version_id
        && existing.launch_manifest == request.launch_manifest
        && existing.priority == request.priority
        && existing.created_by == request.created_by
}

/// Applies started/ended stamps for a transition into `next`.
fn apply_transition_fields(run: &mut Run, next: LifecycleState, now: Timestamp) {
    if next == LifecycleState::Running && run.started_at.is_none() {
        run.started_at = Some(now);
    }
    if next.is_terminal() {
        run.ended_at = Some(now);
    }
}

/// Returns the canonical reason string for a transition cause.
const fn transition_reason(cause: TransitionCause) -> &'static str {
    match cause {
        TransitionCause::StartSignal => "first running heartbeat",
        TransitionCause::PauseAck => "pause acknowledged",
        TransitionCause::ResumeAck => "resume acknowledged",
        TransitionCause::TerminateAck => "terminate acknowledged",
        TransitionCause::HeartbeatErrored => "runtime reported errored",
        TransitionCause::HeartbeatTerminating => "runtime reported terminating",
        TransitionCause::UnresponsiveEscalation => "unresponsive",
    }
}

/// Returns the stable metrics label for a health status.
const fn health_label(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Healthy => "healthy",
        HealthStatus::HeartbeatStale => "heartbeat_stale",
        HealthStatus::Unresponsive => "unresponsive",
    }
}

/// Serializes a transition for audit payloads.
fn transition_payload(transition: &StateTransition) -> Value {
    serde_json::to_value(transition).unwrap_or(Value::Null)
}

/// Serializes a command envelope for audit payloads.
fn command_payload(command: &RunCommand) -> Value {
    serde_json::to_value(command).unwrap_or(Value::Null)
}

/// Merges a tune payload into a run's accumulated overrides as one atomic
/// set; last write wins per key.
fn merge_overrides(existing: Option<&Value>, tune: &Value) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(incoming) = tune {
        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
