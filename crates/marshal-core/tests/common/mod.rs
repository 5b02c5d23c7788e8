// crates/marshal-core/tests/common/mod.rs
// =============================================================================
// Module: Core Test Helpers
// Description: Shared harness for lifecycle, health, and audit tests.
// Purpose: Reduce duplication across integration tests for marshal-core.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::sync::Arc;
use std::sync::Mutex;

use marshal_core::CommandEnvelope;
use marshal_core::CreateRun;
use marshal_core::EventPublisher;
use marshal_core::Heartbeat;
use marshal_core::InMemoryRunStore;
use marshal_core::Lifecycle;
use marshal_core::LifecycleConfig;
use marshal_core::ManualClock;
use marshal_core::PublishError;
use marshal_core::Run;
use marshal_core::SharedEventPublisher;
use marshal_core::SharedRunStore;
use marshal_core::Timestamp;
use marshal_core::core::command::Actor;
use marshal_core::core::command::CommandType;
use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::core::identifiers::ActorId;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::ExperimentId;
use marshal_core::core::identifiers::ExperimentVersionId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::RuntimeStatus;
use marshal_core::core::audit::RequestMetadata;
use serde_json::json;

/// Event collector recording everything the lifecycle engine publishes.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    /// Recorded run-status events.
    pub status: Mutex<Vec<RunStatusEvent>>,
    /// Recorded command-lifecycle events.
    pub commands: Mutex<Vec<CommandLifecycleEvent>>,
}

impl EventPublisher for CollectingPublisher {
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError> {
        self.status
            .lock()
            .map_err(|_| PublishError::Publish("poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        self.commands
            .lock()
            .map_err(|_| PublishError::Publish("poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

impl CollectingPublisher {
    /// Returns the recorded run-status events.
    pub fn status_events(&self) -> Vec<RunStatusEvent> {
        self.status.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Returns the recorded command-lifecycle events.
    pub fn command_events(&self) -> Vec<CommandLifecycleEvent> {
        self.commands.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

/// Test harness bundling the lifecycle engine with its capabilities.
pub struct Harness {
    /// Lifecycle engine under test.
    pub lifecycle: Lifecycle,
    /// Manual clock shared with the engine.
    pub clock: Arc<ManualClock>,
    /// Store handle for direct assertions.
    pub store: SharedRunStore,
    /// Event collector.
    pub events: Arc<CollectingPublisher>,
}

/// Builds a harness over the in-memory store and a manual clock.
pub fn harness() -> Harness {
    harness_with_config(LifecycleConfig::default())
}

/// Builds a harness with a custom lifecycle configuration.
pub fn harness_with_config(config: LifecycleConfig) -> Harness {
    let store = SharedRunStore::from_store(InMemoryRunStore::new());
    let events = Arc::new(CollectingPublisher::default());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000)));
    let publisher = SharedEventPublisher::new(events.clone());
    let lifecycle = Lifecycle::new(store.clone(), publisher, clock.clone(), config);
    Harness {
        lifecycle,
        clock,
        store,
        events,
    }
}

/// Returns a creation request for the given run id.
pub fn create_request(run_id: &str) -> CreateRun {
    CreateRun {
        id: Some(RunId::new(run_id)),
        experiment_id: ExperimentId::new("exp-1"),
        experiment_version_id: ExperimentVersionId::new("v1"),
        launch_manifest: json!({}),
        overrides: None,
        priority: 0,
        created_by: ActorId::new("alice"),
    }
}

/// Returns a running-status heartbeat for the given run and step.
pub fn heartbeat(run_id: &str, step: u64) -> Heartbeat {
    Heartbeat {
        run_id: RunId::new(run_id),
        status: RuntimeStatus::Running,
        step,
        samples_per_sec: 250.0,
        loss: 0.42,
        checkpoint_version: 1,
        queued_commands: None,
        notes: None,
        error: None,
    }
}

/// Creates a run and drives it to `running` with a first heartbeat.
pub fn running_run(harness: &Harness, run_id: &str) -> Run {
    harness
        .lifecycle
        .create_run(create_request(run_id), RequestMetadata::default())
        .unwrap_or_else(|err| panic!("create {run_id}: {err}"));
    harness
        .lifecycle
        .ingest_heartbeat(&RunId::new(run_id), &heartbeat(run_id, 100), RequestMetadata::default())
        .unwrap_or_else(|err| panic!("first heartbeat {run_id}: {err}"))
}

/// Returns a command envelope of the given type and payload.
pub fn envelope(id: &str, command_type: CommandType, payload: serde_json::Value) -> CommandEnvelope {
    CommandEnvelope {
        id: CommandId::new(id),
        command_type,
        payload,
        actor: Actor::operator("alice"),
        issued_at: Timestamp::from_unix_millis(1_000),
    }
}

/// Submits, delivers, and acknowledges a command, returning the final record.
pub fn submit_deliver_ack(
    harness: &Harness,
    run_id: &str,
    command: CommandEnvelope,
) -> marshal_core::core::command::RunCommand {
    let run_id = RunId::new(run_id);
    let id = command.id.clone();
    harness
        .lifecycle
        .submit_command(&run_id, command, RequestMetadata::default())
        .unwrap_or_else(|err| panic!("submit: {err}"));
    harness
        .lifecycle
        .next_command(&run_id, RequestMetadata::default())
        .unwrap_or_else(|err| panic!("deliver: {err}"));
    harness
        .lifecycle
        .ack_command(&run_id, &id, RequestMetadata::default())
        .unwrap_or_else(|err| panic!("ack: {err}"))
}
