// crates/marshal-core/tests/lifecycle.rs
// ============================================================================
// Module: Lifecycle Engine Tests
// Description: End-to-end coverage of run creation, heartbeats, and commands.
// ============================================================================
//! ## Overview
//! Exercises the canonical write paths: idempotent creation, heartbeat
//! ingestion with monotonic-progress enforcement, command submission,
//! delivery, acknowledgement, and the lifecycle transition table.

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

mod common;

use common::create_request;
use common::envelope;
use common::harness;
use common::harness_with_config;
use common::heartbeat;
use common::running_run;
use common::submit_deliver_ack;
use marshal_core::ErrorCode;
use marshal_core::LifecycleConfig;
use marshal_core::RunStore;
use marshal_core::StartTrigger;
use marshal_core::core::audit::RequestMetadata;
use marshal_core::core::command::CommandType;
use marshal_core::core::events::CommandPhase;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::HealthStatus;
use marshal_core::core::run::LifecycleState;
use marshal_core::core::run::RuntimeStatus;
use serde_json::json;

// ============================================================================
// SECTION: Run Creation
// ============================================================================

/// Verifies creation initializes state, counters, and the initial transition.
#[test]
fn create_run_initializes_queued_state() {
    let harness = harness();
    let outcome = harness
        .lifecycle
        .create_run(create_request("run-1"), RequestMetadata::default())
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.run.state, LifecycleState::Queued);
    assert_eq!(outcome.run.health, HealthStatus::Healthy);
    assert_eq!(outcome.run.current_step, 0);
    assert_eq!(outcome.run.checkpoint_version, 0);

    let transitions = harness.store.list_transitions(&RunId::new("run-1")).unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].previous, None);
    assert_eq!(transitions[0].next, LifecycleState::Queued);
    assert_eq!(transitions[0].reason.as_deref(), Some("created"));
}

/// Verifies re-creating an identical run returns the stored record.
#[test]
fn create_run_is_idempotent_on_identical_request() {
    let harness = harness();
    let first = harness
        .lifecycle
        .create_run(create_request("run-1"), RequestMetadata::default())
        .unwrap();
    let replay = harness
        .lifecycle
        .create_run(create_request("run-1"), RequestMetadata::default())
        .unwrap();

    assert!(first.created);
    assert!(!replay.created);
    assert_eq!(replay.run, first.run);
}

/// Verifies a divergent creation under a taken id is rejected.
#[test]
fn create_run_rejects_divergent_duplicate() {
    let harness = harness();
    harness.lifecycle.create_run(create_request("run-1"), RequestMetadata::default()).unwrap();

    let mut divergent = create_request("run-1");
    divergent.priority = 7;
    let error = harness
        .lifecycle
        .create_run(divergent, RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

/// Verifies empty required fields are rejected.
#[test]
fn create_run_rejects_empty_fields() {
    let harness = harness();
    let mut request = create_request("run-1");
    request.created_by = marshal_core::core::identifiers::ActorId::new("  ");
    let error = harness.lifecycle.create_run(request, RequestMetadata::default()).unwrap_err();
    assert_eq!(error.code(), ErrorCode::Invalid);
}

/// Verifies a missing id is generated.
#[test]
fn create_run_generates_id_when_absent() {
    let harness = harness();
    let mut request = create_request("ignored");
    request.id = None;
    let outcome = harness.lifecycle.create_run(request, RequestMetadata::default()).unwrap();
    assert!(outcome.run.id.as_str().starts_with("run-"));
}

// ============================================================================
// SECTION: Heartbeats
// ============================================================================

/// Verifies scenario 1: create, heartbeat to running, reject regression.
#[test]
fn heartbeat_starts_run_and_rejects_step_regression() {
    let harness = harness();
    harness.lifecycle.create_run(create_request("run-1"), RequestMetadata::default()).unwrap();

    let run = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-1", 100), RequestMetadata::default())
        .unwrap();
    assert_eq!(run.state, LifecycleState::Running);
    assert_eq!(run.runtime_status, RuntimeStatus::Running);
    assert_eq!(run.health, HealthStatus::Healthy);
    assert_eq!(run.current_step, 100);
    assert!(run.started_at.is_some());

    harness.clock.advance_millis(15_000);
    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-1", 90), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);

    let stored = harness.store.get_run(&RunId::new("run-1")).unwrap();
    assert_eq!(stored.current_step, 100);
}

/// Verifies checkpoint regressions are rejected without mutation.
#[test]
fn heartbeat_rejects_checkpoint_regression() {
    let harness = harness();
    running_run(&harness, "run-1");

    let mut next = heartbeat("run-1", 200);
    next.checkpoint_version = 0;
    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &next, RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

/// Verifies a mismatched payload run id is rejected before any read.
#[test]
fn heartbeat_rejects_run_id_mismatch() {
    let harness = harness();
    running_run(&harness, "run-1");

    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-2", 200), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Invalid);
}

/// Verifies non-finite loss is rejected.
#[test]
fn heartbeat_rejects_non_finite_loss() {
    let harness = harness();
    running_run(&harness, "run-1");

    let mut next = heartbeat("run-1", 200);
    next.loss = f64::NAN;
    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &next, RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Invalid);
}

/// Verifies an errored runtime status fails a running run.
#[test]
fn heartbeat_errored_fails_the_run() {
    let harness = harness();
    running_run(&harness, "run-1");

    let mut next = heartbeat("run-1", 200);
    next.status = RuntimeStatus::Errored;
    next.error = Some("cuda out of memory".to_string());
    let run = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &next, RequestMetadata::default())
        .unwrap();
    assert_eq!(run.state, LifecycleState::Failed);
    assert_eq!(run.last_error.as_deref(), Some("cuda out of memory"));
    assert!(run.ended_at.is_some());
}

/// Verifies a terminating runtime status completes a running run.
#[test]
fn heartbeat_terminating_completes_the_run() {
    let harness = harness();
    running_run(&harness, "run-1");

    let mut next = heartbeat("run-1", 200);
    next.status = RuntimeStatus::Terminating;
    let run = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &next, RequestMetadata::default())
        .unwrap();
    assert_eq!(run.state, LifecycleState::Completed);
}

/// Verifies terminal runs reject further heartbeats.
#[test]
fn heartbeat_rejected_after_terminal_state() {
    let harness = harness();
    running_run(&harness, "run-1");

    let mut terminating = heartbeat("run-1", 200);
    terminating.status = RuntimeStatus::Terminating;
    harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &terminating, RequestMetadata::default())
        .unwrap();

    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-1", 300), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

/// Verifies the manual start trigger leaves queued runs queued.
#[test]
fn manual_start_trigger_holds_queued_state() {
    let harness = harness_with_config(LifecycleConfig {
        start_trigger: StartTrigger::Manual,
        ..LifecycleConfig::default()
    });
    harness.lifecycle.create_run(create_request("run-1"), RequestMetadata::default()).unwrap();

    let run = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-1", 5), RequestMetadata::default())
        .unwrap();
    assert_eq!(run.state, LifecycleState::Queued);
    assert_eq!(run.current_step, 5);
}

// ============================================================================
// SECTION: Pause / Resume (Scenario 2)
// ============================================================================

/// Verifies pause delivery and acknowledgement transition the run, and that
/// re-acknowledgement is a no-op.
#[test]
fn pause_ack_transitions_and_is_idempotent() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");

    harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap();

    let delivered = harness
        .lifecycle
        .next_command(&run_id, RequestMetadata::default())
        .unwrap()
        .expect("pending command");
    assert_eq!(delivered.id, CommandId::new("cmd-A"));
    assert!(delivered.delivered_at.is_some());

    let acked = harness
        .lifecycle
        .ack_command(&run_id, &CommandId::new("cmd-A"), RequestMetadata::default())
        .unwrap();
    assert!(acked.is_acknowledged());
    assert_eq!(harness.store.get_run(&run_id).unwrap().state, LifecycleState::Paused);

    let updated_at = harness.store.get_run(&run_id).unwrap().updated_at;
    let again = harness
        .lifecycle
        .ack_command(&run_id, &CommandId::new("cmd-A"), RequestMetadata::default())
        .unwrap();
    assert_eq!(again.acknowledged_at, acked.acknowledged_at);
    assert_eq!(harness.store.get_run(&run_id).unwrap().state, LifecycleState::Paused);
    assert_eq!(harness.store.get_run(&run_id).unwrap().updated_at, updated_at);
}

/// Verifies resume from paused returns the run to running.
#[test]
fn resume_ack_returns_run_to_running() {
    let harness = harness();
    running_run(&harness, "run-1");
    submit_deliver_ack(&harness, "run-1", envelope("cmd-A", CommandType::Pause, json!({})));

    submit_deliver_ack(&harness, "run-1", envelope("cmd-B", CommandType::Resume, json!({})));
    assert_eq!(
        harness.store.get_run(&RunId::new("run-1")).unwrap().state,
        LifecycleState::Running
    );
}

/// Verifies command-lifecycle events fire once per phase.
#[test]
fn command_phases_emit_one_event_each() {
    let harness = harness();
    running_run(&harness, "run-1");
    submit_deliver_ack(&harness, "run-1", envelope("cmd-A", CommandType::Pause, json!({})));

    let phases: Vec<CommandPhase> =
        harness.events.command_events().iter().map(|event| event.phase).collect();
    assert_eq!(
        phases,
        vec![CommandPhase::Queued, CommandPhase::Delivered, CommandPhase::Acknowledged]
    );
}

// ============================================================================
// SECTION: Command Validation and Idempotency (Scenario 3)
// ============================================================================

/// Verifies tune bounds at the lifecycle surface.
#[test]
fn tune_bounds_enforced_on_submission() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");

    harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-B", CommandType::Tune, json!({"learning_rate": 0.5})),
            RequestMetadata::default(),
        )
        .unwrap();

    let error = harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-X", CommandType::Tune, json!({"learning_rate": 1.5})),
            RequestMetadata::default(),
        )
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Invalid);

    let error = harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-B", CommandType::Tune, json!({"learning_rate": 0.9})),
            RequestMetadata::default(),
        )
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

/// Verifies identical re-submission returns the stored record, even after
/// delivery.
#[test]
fn identical_resubmission_returns_stored_command() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");

    let first = harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap();
    harness.lifecycle.next_command(&run_id, RequestMetadata::default()).unwrap();

    let replay = harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap();
    assert_eq!(replay.id, first.id);
    assert!(replay.delivered_at.is_some());

    let queued_events = harness
        .events
        .command_events()
        .iter()
        .filter(|event| event.phase == CommandPhase::Queued)
        .count();
    assert_eq!(queued_events, 1);
}

/// Verifies state preconditions: pause requires running.
#[test]
fn pause_requires_running_state() {
    let harness = harness();
    harness.lifecycle.create_run(create_request("run-1"), RequestMetadata::default()).unwrap();

    let error = harness
        .lifecycle
        .submit_command(
            &RunId::new("run-1"),
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

/// Verifies tune acknowledgement merges overrides atomically.
#[test]
fn tune_ack_merges_overrides() {
    let harness = harness();
    running_run(&harness, "run-1");
    submit_deliver_ack(
        &harness,
        "run-1",
        envelope("cmd-A", CommandType::Tune, json!({"learning_rate": 0.5})),
    );
    submit_deliver_ack(
        &harness,
        "run-1",
        envelope("cmd-B", CommandType::Tune, json!({"entropy_coef": 0.01, "learning_rate": 0.25})),
    );

    let run = harness.store.get_run(&RunId::new("run-1")).unwrap();
    assert_eq!(run.state, LifecycleState::Running);
    assert_eq!(
        run.overrides,
        Some(json!({"learning_rate": 0.25, "entropy_coef": 0.01}))
    );
}

// ============================================================================
// SECTION: Termination (Scenario 4)
// ============================================================================

/// Verifies terminate from paused reaches `terminated` and seals the run.
#[test]
fn terminate_from_paused_seals_the_run() {
    let harness = harness();
    running_run(&harness, "run-1");
    submit_deliver_ack(&harness, "run-1", envelope("cmd-A", CommandType::Pause, json!({})));
    submit_deliver_ack(
        &harness,
        "run-1",
        envelope("cmd-C", CommandType::Terminate, json!({"reason": "budget exhausted"})),
    );

    let run = harness.store.get_run(&RunId::new("run-1")).unwrap();
    assert_eq!(run.state, LifecycleState::Terminated);
    assert!(run.ended_at.is_some());

    let error = harness
        .lifecycle
        .ingest_heartbeat(&RunId::new("run-1"), &heartbeat("run-1", 500), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);

    let error = harness
        .lifecycle
        .submit_command(
            &RunId::new("run-1"),
            envelope("cmd-D", CommandType::Terminate, json!({"reason": "again"})),
            RequestMetadata::default(),
        )
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Conflict);
}

// ============================================================================
// SECTION: Delivery Semantics
// ============================================================================

/// Verifies delivery order follows issued-at with deterministic tie-breaks.
#[test]
fn delivery_follows_issue_order() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");

    let mut late = envelope("cmd-late", CommandType::Tune, json!({"learning_rate": 0.2}));
    late.issued_at = marshal_core::Timestamp::from_unix_millis(2_000);
    let mut early = envelope("cmd-early", CommandType::Tune, json!({"learning_rate": 0.3}));
    early.issued_at = marshal_core::Timestamp::from_unix_millis(1_500);

    harness.lifecycle.submit_command(&run_id, late, RequestMetadata::default()).unwrap();
    harness.lifecycle.submit_command(&run_id, early, RequestMetadata::default()).unwrap();

    let first = harness
        .lifecycle
        .next_command(&run_id, RequestMetadata::default())
        .unwrap()
        .expect("first delivery");
    assert_eq!(first.id, CommandId::new("cmd-early"));
    let second = harness
        .lifecycle
        .next_command(&run_id, RequestMetadata::default())
        .unwrap()
        .expect("second delivery");
    assert_eq!(second.id, CommandId::new("cmd-late"));
}

/// Verifies an empty queue yields no delivery.
#[test]
fn next_command_on_empty_queue_is_none() {
    let harness = harness();
    running_run(&harness, "run-1");
    let delivered =
        harness.lifecycle.next_command(&RunId::new("run-1"), RequestMetadata::default()).unwrap();
    assert!(delivered.is_none());
}

/// Verifies acknowledgement before delivery is rejected.
#[test]
fn ack_before_delivery_is_invalid() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");
    harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap();

    let error = harness
        .lifecycle
        .ack_command(&run_id, &CommandId::new("cmd-A"), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::Invalid);
}

/// Verifies unknown runs and commands surface not-found.
#[test]
fn missing_targets_surface_not_found() {
    let harness = harness();
    let error = harness
        .lifecycle
        .next_command(&RunId::new("ghost"), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::NotFound);

    running_run(&harness, "run-1");
    let error = harness
        .lifecycle
        .ack_command(&RunId::new("run-1"), &CommandId::new("ghost"), RequestMetadata::default())
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::NotFound);
}

/// Verifies command stamps are monotonic: created ≤ delivered ≤ acknowledged.
#[test]
fn command_stamps_are_monotonic() {
    let harness = harness();
    running_run(&harness, "run-1");
    let run_id = RunId::new("run-1");
    harness
        .lifecycle
        .submit_command(
            &run_id,
            envelope("cmd-A", CommandType::Pause, json!({})),
            RequestMetadata::default(),
        )
        .unwrap();
    harness.clock.advance_millis(50);
    harness.lifecycle.next_command(&run_id, RequestMetadata::default()).unwrap();
    harness.clock.advance_millis(50);
    let acked = harness
        .lifecycle
        .ack_command(&run_id, &CommandId::new("cmd-A"), RequestMetadata::default())
        .unwrap();

    let delivered_at = acked.delivered_at.expect("delivered");
    let acknowledged_at = acked.acknowledged_at.expect("acknowledged");
    assert!(delivered_at >= acked.created_at);
    assert!(acknowledged_at >= delivered_at);
}
