// crates/marshal-events/tests/publisher.rs
// ============================================================================
// Module: Event Publisher Tests
// Description: Channel delivery, log lines, and fan-out isolation.
// ============================================================================
//! ## Overview
//! Validates that the channel publisher enqueues one message per event with
//! the configured subject, the log publisher writes parseable JSON lines,
//! and the fan-out combinator survives failing members.

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

use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use marshal_core::EventPublisher;
use marshal_core::PublishError;
use marshal_core::Timestamp;
use marshal_core::core::command::CommandType;
use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::CommandPhase;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::HealthStatus;
use marshal_core::core::run::LifecycleState;
use marshal_core::core::run::RuntimeStatus;
use marshal_events::ChannelPublisher;
use marshal_events::FanoutPublisher;
use marshal_events::LogPublisher;
use marshal_events::NoopPublisher;
use marshal_events::PublishedEvent;

/// Returns a sample status event.
fn status_event() -> RunStatusEvent {
    RunStatusEvent {
        run_id: RunId::new("run-1"),
        state: LifecycleState::Running,
        runtime_status: RuntimeStatus::Running,
        health: HealthStatus::Healthy,
        step: 100,
        samples_per_second: 250.0,
        loss: 0.42,
        last_error: None,
        description: None,
        correlation_id: None,
        at: Timestamp::from_unix_millis(1_000),
    }
}

/// Returns a sample command event.
fn command_event() -> CommandLifecycleEvent {
    CommandLifecycleEvent {
        run_id: RunId::new("run-1"),
        command_id: CommandId::new("cmd-1"),
        command_type: CommandType::Pause,
        phase: CommandPhase::Queued,
        description: None,
        correlation_id: None,
        at: Timestamp::from_unix_millis(1_000),
    }
}

/// Shared in-memory writer for log publisher assertions.
#[derive(Debug, Clone, Default)]
struct SharedBuffer {
    /// Captured bytes.
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().map_err(|_| io::Error::other("poisoned"))?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Publisher that always fails, for fan-out isolation tests.
struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish_status(&self, _event: &RunStatusEvent) -> Result<(), PublishError> {
        Err(PublishError::Publish("down".to_string()))
    }

    fn publish_command(&self, _event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        Err(PublishError::Publish("down".to_string()))
    }
}

// ============================================================================
// SECTION: Channel Publisher
// ============================================================================

/// Verifies the channel publisher enqueues one subject-stamped message per
/// event.
#[test]
fn channel_publisher_enqueues_with_subject() {
    let (sender, mut receiver) = tokio::sync::mpsc::channel(8);
    let publisher = ChannelPublisher::new(sender, "marshal");

    publisher.publish_status(&status_event()).unwrap();
    publisher.publish_command(&command_event()).unwrap();

    match receiver.try_recv().unwrap() {
        PublishedEvent::RunStatus { subject, event } => {
            assert_eq!(subject, "marshal.run-status");
            assert_eq!(event.run_id, RunId::new("run-1"));
        }
        PublishedEvent::CommandLifecycle { .. } => panic!("expected run-status first"),
    }
    match receiver.try_recv().unwrap() {
        PublishedEvent::CommandLifecycle { subject, event } => {
            assert_eq!(subject, "marshal.command-lifecycle");
            assert_eq!(event.phase, CommandPhase::Queued);
        }
        PublishedEvent::RunStatus { .. } => panic!("expected command-lifecycle second"),
    }
}

/// Verifies a full channel fails the publication instead of blocking.
#[test]
fn channel_publisher_fails_when_full() {
    let (sender, _receiver) = tokio::sync::mpsc::channel(1);
    let publisher = ChannelPublisher::new(sender, "marshal");
    publisher.publish_status(&status_event()).unwrap();
    assert!(publisher.publish_status(&status_event()).is_err());
}

// ============================================================================
// SECTION: Log Publisher
// ============================================================================

/// Verifies log lines parse back into published events.
#[test]
fn log_publisher_writes_json_lines() {
    let buffer = SharedBuffer::default();
    let publisher = LogPublisher::new(buffer.clone(), "marshal");

    publisher.publish_status(&status_event()).unwrap();
    publisher.publish_command(&command_event()).unwrap();

    let raw = buffer.bytes.lock().unwrap().clone();
    let text = String::from_utf8(raw).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: PublishedEvent = serde_json::from_str(lines[0]).unwrap();
    assert!(matches!(first, PublishedEvent::RunStatus { ref subject, .. } if subject == "marshal.run-status"));
    let second: PublishedEvent = serde_json::from_str(lines[1]).unwrap();
    assert!(matches!(second, PublishedEvent::CommandLifecycle { .. }));
}

// ============================================================================
// SECTION: Fan-Out
// ============================================================================

/// Verifies fan-out succeeds while at least one member accepts.
#[test]
fn fanout_survives_failing_member() {
    let (sender, mut receiver) = tokio::sync::mpsc::channel(8);
    let fanout = FanoutPublisher::new()
        .with(Arc::new(FailingPublisher))
        .with(Arc::new(ChannelPublisher::new(sender, "marshal")));

    fanout.publish_status(&status_event()).unwrap();
    assert!(receiver.try_recv().is_ok());
}

/// Verifies fan-out fails only when every member fails.
#[test]
fn fanout_fails_when_all_members_fail() {
    let fanout = FanoutPublisher::new().with(Arc::new(FailingPublisher));
    assert!(fanout.publish_status(&status_event()).is_err());
}

/// Verifies the noop publisher accepts everything.
#[test]
fn noop_publisher_accepts_all() {
    let publisher = NoopPublisher;
    publisher.publish_status(&status_event()).unwrap();
    publisher.publish_command(&command_event()).unwrap();
}
