// crates/marshal-core/src/interfaces/mod.rs
// ============================================================================
// Module: Run Marshal Interfaces
// Description: Backend-agnostic interfaces for storage, events, and metrics.
// Purpose: Define the capability seams used by the orchestrator runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the orchestrator integrates with storage and the
//! event bus without embedding backend-specific details. Implementations are
//! swappable: in-memory store and noop publisher for tests, SQLite and a bus
//! publisher in production. Implementations must fail closed on missing or
//! invalid data; the store is the single source of truth.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::audit::AuditEntry;
use crate::core::audit::AuditEvent;
use crate::core::command::RunCommand;
use crate::core::events::CommandLifecycleEvent;
use crate::core::events::RunStatusEvent;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::ExperimentId;
use crate::core::identifiers::RunId;
use crate::core::run::LifecycleState;
use crate::core::run::Run;
use crate::core::run::StateTransition;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Run store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; messages avoid embedding
///   payload contents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness, monotonicity, or concurrency violation.
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Target record does not exist.
    #[error("store record not found: {0}")]
    NotFound(String),
    /// No pending command exists for the run.
    #[error("no pending commands")]
    NoCommands,
    /// Constraint violation on write.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Backend engine error.
    #[error("store backend error: {0}")]
    Store(String),
    /// Store corruption detected on read.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Transient overload; the caller may retry.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Retryable failure description.
        message: String,
        /// Optional retry delay in milliseconds.
        retry_after_ms: Option<u64>,
    },
}

// ============================================================================
// SECTION: Run Filter
// ============================================================================

/// Predicate for [`RunStore::list_runs`].
///
/// # Invariants
/// - An empty filter matches every run; predicates are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    /// Match only these lifecycle states, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_states: Option<Vec<LifecycleState>>,
    /// Match only runs of this experiment, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<ExperimentId>,
    /// Match only runs whose last heartbeat is strictly older than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_before: Option<Timestamp>,
    /// Match only runs that have reported at least one heartbeat.
    #[serde(default)]
    pub requires_heartbeat: bool,
    /// Exclude runs in terminal lifecycle states.
    #[serde(default)]
    pub non_terminal_only: bool,
    /// Maximum number of runs to return, newest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RunFilter {
    /// Returns true when the run satisfies every predicate in the filter.
    #[must_use]
    pub fn matches(&self, run: &Run) -> bool {
        if let Some(states) = &self.lifecycle_states
            && !states.contains(&run.state)
        {
            return false;
        }
        if let Some(experiment_id) = &self.experiment_id
            && run.experiment_id != *experiment_id
        {
            return false;
        }
        if self.non_terminal_only && run.state.is_terminal() {
            return false;
        }
        if self.requires_heartbeat && run.last_heartbeat_at.is_none() {
            return false;
        }
        if let Some(before) = self.heartbeat_before {
            match run.last_heartbeat_at {
                Some(at) if at < before => {}
                _ => return false,
            }
        }
        true
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Durable persistence boundary for runs, transitions, commands, and audit
/// entries.
///
/// Implementations serialize writes internally so each operation is atomic.
pub trait RunStore: Send + Sync {
    /// Inserts a new run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the run id is taken.
    fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Fetches a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the run does not exist.
    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError>;

    /// Replaces a run record when `expected_updated_at` matches the stored
    /// last-update timestamp (optimistic concurrency).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on token mismatch and
    /// [`StoreError::NotFound`] when the run does not exist.
    fn update_run(&self, run: &Run, expected_updated_at: Timestamp) -> Result<(), StoreError>;

    /// Appends a lifecycle transition record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn append_transition(&self, transition: &StateTransition) -> Result<(), StoreError>;

    /// Lists a run's transitions ordered by timestamp then insertion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_transitions(&self, run_id: &RunId) -> Result<Vec<StateTransition>, StoreError>;

    /// Inserts a command, or returns the stored record when the same
    /// `(run_id, command_id)` pair was already appended with a canonically
    /// identical payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the pair exists with a divergent
    /// payload.
    fn append_command(&self, command: &RunCommand) -> Result<RunCommand, StoreError>;

    /// Fetches a command by `(run_id, command_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the command does not exist.
    fn get_command(&self, run_id: &RunId, command_id: &CommandId)
    -> Result<RunCommand, StoreError>;

    /// Returns the oldest pending command for the run, ordered by issued
    /// time, creation time, then command id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCommands`] when nothing is pending.
    fn next_pending_command(&self, run_id: &RunId) -> Result<RunCommand, StoreError>;

    /// Stamps `delivered_at` with a compare-and-set from null so at most one
    /// consumer observes a given command as delivered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the command was already
    /// delivered and [`StoreError::NotFound`] when it does not exist.
    fn deliver_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
        at: Timestamp,
    ) -> Result<RunCommand, StoreError>;

    /// Unconditionally upserts a command's delivery/acknowledgement stamps.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save_command(&self, command: &RunCommand) -> Result<(), StoreError>;

    /// Lists runs matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError>;

    /// Appends an audit event to the hash chain, assigning its sequence
    /// number and hashes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the event cannot be chained or persisted.
    fn append_audit(&self, event: AuditEvent) -> Result<AuditEntry, StoreError>;

    /// Lists the full audit chain in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_audit(&self) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Shared run store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedRunStore {
    /// Inner store implementation.
    inner: Arc<dyn RunStore>,
}

impl SharedRunStore {
    /// Wraps a run store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl RunStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl RunStore for SharedRunStore {
    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.inner.create_run(run)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        self.inner.get_run(run_id)
    }

    fn update_run(&self, run: &Run, expected_updated_at: Timestamp) -> Result<(), StoreError> {
        self.inner.update_run(run, expected_updated_at)
    }

    fn append_transition(&self, transition: &StateTransition) -> Result<(), StoreError> {
        self.inner.append_transition(transition)
    }

    fn list_transitions(&self, run_id: &RunId) -> Result<Vec<StateTransition>, StoreError> {
        self.inner.list_transitions(run_id)
    }

    fn append_command(&self, command: &RunCommand) -> Result<RunCommand, StoreError> {
        self.inner.append_command(command)
    }

    fn get_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
    ) -> Result<RunCommand, StoreError> {
        self.inner.get_command(run_id, command_id)
    }

    fn next_pending_command(&self, run_id: &RunId) -> Result<RunCommand, StoreError> {
        self.inner.next_pending_command(run_id)
    }

    fn deliver_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
        at: Timestamp,
    ) -> Result<RunCommand, StoreError> {
        self.inner.deliver_command(run_id, command_id, at)
    }

    fn save_command(&self, command: &RunCommand) -> Result<(), StoreError> {
        self.inner.save_command(command)
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        self.inner.list_runs(filter)
    }

    fn append_audit(&self, event: AuditEvent) -> Result<AuditEntry, StoreError> {
        self.inner.append_audit(event)
    }

    fn list_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.list_audit()
    }
}

// ============================================================================
// SECTION: Event Publisher
// ============================================================================

/// Event publication errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Downstream subject rejected or dropped the event.
    #[error("event publish failed: {0}")]
    Publish(String),
}

/// Best-effort fan-out boundary for status and command-lifecycle events.
///
/// Publication failures must never roll back a committed state change; the
/// lifecycle engine counts and drops them.
pub trait EventPublisher: Send + Sync {
    /// Publishes a run-status event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the event could not be handed off.
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError>;

    /// Publishes a command-lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the event could not be handed off.
    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError>;
}

/// Shared event publisher backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedEventPublisher {
    /// Inner publisher implementation.
    inner: Arc<dyn EventPublisher>,
}

impl SharedEventPublisher {
    /// Wraps a publisher in a shared, clonable wrapper.
    #[must_use]
    pub fn from_publisher(publisher: impl EventPublisher + 'static) -> Self {
        Self {
            inner: Arc::new(publisher),
        }
    }

    /// Wraps an existing shared publisher.
    #[must_use]
    pub const fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            inner: publisher,
        }
    }
}

impl EventPublisher for SharedEventPublisher {
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError> {
        self.inner.publish_status(event)
    }

    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        self.inner.publish_command(event)
    }
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Dependency-light metrics sink for orchestrator counters.
///
/// Deployments can bridge these hooks to Prometheus or OpenTelemetry
/// without redesign; the default sink drops everything.
pub trait MarshalMetrics: Send + Sync {
    /// Records a dropped event publication.
    fn record_publish_failure(&self, family: &'static str);

    /// Records an optimistic-concurrency retry on a run write.
    fn record_occ_retry(&self, operation: &'static str);

    /// Records a health escalation emission.
    fn record_escalation(&self, health: &'static str);

    /// Records a throttled heartbeat.
    fn record_throttled(&self);
}

/// Metrics sink that drops all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MarshalMetrics for NoopMetrics {
    fn record_publish_failure(&self, _family: &'static str) {}

    fn record_occ_retry(&self, _operation: &'static str) {}

    fn record_escalation(&self, _health: &'static str) {}

    fn record_throttled(&self) {}
}
