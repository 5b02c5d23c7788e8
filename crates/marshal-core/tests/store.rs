// crates/marshal-core/tests/store.rs
// ============================================================================
// Module: In-Memory Store Tests
// Description: Tests for the in-memory run store implementation.
// ============================================================================
//! ## Overview
//! Ensures the in-memory store enforces uniqueness, optimistic concurrency,
//! command idempotency, deterministic pending order, and delivery
//! compare-and-set semantics.

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

use marshal_core::InMemoryRunStore;
use marshal_core::RunFilter;
use marshal_core::RunStore;
use marshal_core::StoreError;
use marshal_core::Timestamp;
use marshal_core::core::command::Actor;
use marshal_core::core::command::CommandType;
use marshal_core::core::command::RunCommand;
use marshal_core::core::identifiers::ActorId;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::ExperimentId;
use marshal_core::core::identifiers::ExperimentVersionId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::HealthStatus;
use marshal_core::core::run::LifecycleState;
use marshal_core::core::run::Run;
use marshal_core::core::run::RuntimeStatus;
use serde_json::json;

/// Returns a sample run record.
fn sample_run(run_id: &str) -> Run {
    Run {
        id: RunId::new(run_id),
        experiment_id: ExperimentId::new("exp-1"),
        experiment_version_id: ExperimentVersionId::new("v1"),
        priority: 0,
        launch_manifest: json!({}),
        overrides: None,
        created_by: ActorId::new("alice"),
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
        created_at: Timestamp::from_unix_millis(1_000),
        updated_at: Timestamp::from_unix_millis(1_000),
    }
}

/// Returns a sample command record.
fn sample_command(run_id: &str, command_id: &str, issued_at: i64) -> RunCommand {
    RunCommand {
        id: CommandId::new(command_id),
        run_id: RunId::new(run_id),
        command_type: CommandType::Tune,
        payload: json!({"learning_rate": 0.5}),
        actor: Actor::operator("alice"),
        issued_at: Timestamp::from_unix_millis(issued_at),
        created_at: Timestamp::from_unix_millis(issued_at),
        delivered_at: None,
        acknowledged_at: None,
    }
}

// ============================================================================
// SECTION: Runs
// ============================================================================

/// Verifies create-then-get round-trips the stored record.
#[test]
fn create_then_get_roundtrips() {
    let store = InMemoryRunStore::new();
    let run = sample_run("run-1");
    store.create_run(&run).unwrap();
    assert_eq!(store.get_run(&RunId::new("run-1")).unwrap(), run);
}

/// Verifies duplicate run ids conflict.
#[test]
fn duplicate_run_id_conflicts() {
    let store = InMemoryRunStore::new();
    store.create_run(&sample_run("run-1")).unwrap();
    assert!(matches!(store.create_run(&sample_run("run-1")), Err(StoreError::Conflict(_))));
}

/// Verifies missing runs surface not-found.
#[test]
fn missing_run_is_not_found() {
    let store = InMemoryRunStore::new();
    assert!(matches!(store.get_run(&RunId::new("ghost")), Err(StoreError::NotFound(_))));
}

/// Verifies optimistic concurrency rejects stale writers.
#[test]
fn stale_update_token_conflicts() {
    let store = InMemoryRunStore::new();
    let mut run = sample_run("run-1");
    store.create_run(&run).unwrap();

    run.updated_at = Timestamp::from_unix_millis(2_000);
    store.update_run(&run, Timestamp::from_unix_millis(1_000)).unwrap();

    let mut stale = run.clone();
    stale.current_step = 5;
    assert!(matches!(
        store.update_run(&stale, Timestamp::from_unix_millis(1_000)),
        Err(StoreError::Conflict(_))
    ));
}

/// Verifies the list filter predicates compose conjunctively.
#[test]
fn list_runs_applies_filters() {
    let store = InMemoryRunStore::new();
    let mut active = sample_run("run-active");
    active.last_heartbeat_at = Some(Timestamp::from_unix_millis(500));
    store.create_run(&active).unwrap();

    let mut done = sample_run("run-done");
    done.state = LifecycleState::Completed;
    store.create_run(&done).unwrap();

    let filter = RunFilter {
        non_terminal_only: true,
        requires_heartbeat: true,
        ..RunFilter::default()
    };
    let runs = store.list_runs(&filter).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, RunId::new("run-active"));

    let filter = RunFilter {
        heartbeat_before: Some(Timestamp::from_unix_millis(400)),
        ..RunFilter::default()
    };
    assert!(store.list_runs(&filter).unwrap().is_empty());
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Verifies identical re-append returns the stored record.
#[test]
fn command_append_is_idempotent_on_identical_payload() {
    let store = InMemoryRunStore::new();
    let command = sample_command("run-1", "cmd-1", 1_000);
    store.append_command(&command).unwrap();

    let mut replay = command.clone();
    replay.created_at = Timestamp::from_unix_millis(9_999);
    let stored = store.append_command(&replay).unwrap();
    assert_eq!(stored.created_at, command.created_at);
}

/// Verifies divergent payload re-append conflicts without mutation.
#[test]
fn command_append_conflicts_on_divergent_payload() {
    let store = InMemoryRunStore::new();
    store.append_command(&sample_command("run-1", "cmd-1", 1_000)).unwrap();

    let mut divergent = sample_command("run-1", "cmd-1", 1_000);
    divergent.payload = json!({"learning_rate": 0.9});
    assert!(matches!(store.append_command(&divergent), Err(StoreError::Conflict(_))));

    let stored = store.get_command(&RunId::new("run-1"), &CommandId::new("cmd-1")).unwrap();
    assert_eq!(stored.payload, json!({"learning_rate": 0.5}));
}

/// Verifies payload comparison is canonical, not textual.
#[test]
fn command_payload_comparison_ignores_key_order() {
    let store = InMemoryRunStore::new();
    let mut command = sample_command("run-1", "cmd-1", 1_000);
    command.payload = json!({"learning_rate": 0.5, "entropy_coef": 0.01});
    store.append_command(&command).unwrap();

    let mut replay = command.clone();
    replay.payload = json!({"entropy_coef": 0.01, "learning_rate": 0.5});
    assert!(store.append_command(&replay).is_ok());
}

/// Verifies pending order: issued-at, created-at, then command id.
#[test]
fn pending_order_breaks_ties_deterministically() {
    let store = InMemoryRunStore::new();
    let mut b = sample_command("run-1", "cmd-b", 1_000);
    b.created_at = Timestamp::from_unix_millis(1_000);
    let mut a = sample_command("run-1", "cmd-a", 1_000);
    a.created_at = Timestamp::from_unix_millis(1_000);
    let later = sample_command("run-1", "cmd-0", 2_000);

    store.append_command(&b).unwrap();
    store.append_command(&a).unwrap();
    store.append_command(&later).unwrap();

    let next = store.next_pending_command(&RunId::new("run-1")).unwrap();
    assert_eq!(next.id, CommandId::new("cmd-a"));
}

/// Verifies delivery is a compare-and-set: second delivery conflicts.
#[test]
fn delivery_compare_and_set_is_exclusive() {
    let store = InMemoryRunStore::new();
    store.append_command(&sample_command("run-1", "cmd-1", 1_000)).unwrap();

    let run_id = RunId::new("run-1");
    let command_id = CommandId::new("cmd-1");
    let delivered = store
        .deliver_command(&run_id, &command_id, Timestamp::from_unix_millis(2_000))
        .unwrap();
    assert_eq!(delivered.delivered_at, Some(Timestamp::from_unix_millis(2_000)));

    assert!(matches!(
        store.deliver_command(&run_id, &command_id, Timestamp::from_unix_millis(3_000)),
        Err(StoreError::Conflict(_))
    ));
}

/// Verifies an empty queue yields the dedicated no-commands error.
#[test]
fn empty_queue_yields_no_commands() {
    let store = InMemoryRunStore::new();
    assert!(matches!(
        store.next_pending_command(&RunId::new("run-1")),
        Err(StoreError::NoCommands)
    ));
}
