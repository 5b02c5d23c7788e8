// crates/marshal-events/src/lib.rs
// ============================================================================
// Module: Run Marshal Events Library
// Description: Event publisher implementations for status fan-out.
// Purpose: Deliver run-status and command-lifecycle events best-effort.
// Dependencies: marshal-core, tokio, serde_json
// ============================================================================

//! ## Overview
//! This crate provides the [`marshal_core::EventPublisher`] implementations
//! used by the orchestrator: a channel publisher for in-process subscribers,
//! a log publisher writing JSON lines, a fan-out combinator, and a noop
//! publisher for tests. Events are level-triggered hints; a failed or
//! dropped publication never affects committed store state, and subscribers
//! reconcile from the run store on reconnect.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod channel;
mod fanout;
mod log;

// ============================================================================
// SECTION: Imports
// ============================================================================

use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::interfaces::EventPublisher;
use marshal_core::interfaces::PublishError;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use channel::ChannelPublisher;
pub use fanout::FanoutPublisher;
pub use log::LogPublisher;

// ============================================================================
// SECTION: Subjects
// ============================================================================

/// Subject suffix for run-status events.
pub const RUN_STATUS_SUBJECT: &str = "run-status";
/// Subject suffix for command-lifecycle events.
pub const COMMAND_LIFECYCLE_SUBJECT: &str = "command-lifecycle";

/// Builds the full subject for an event family under a prefix.
#[must_use]
pub fn subject(prefix: &str, family: &str) -> String {
    if prefix.is_empty() {
        family.to_string()
    } else {
        format!("{prefix}.{family}")
    }
}

// ============================================================================
// SECTION: Published Events
// ============================================================================

/// One published event with its subject, as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PublishedEvent {
    /// Run-status family event.
    RunStatus {
        /// Full subject the event was published under.
        subject: String,
        /// Event payload.
        event: RunStatusEvent,
    },
    /// Command-lifecycle family event.
    CommandLifecycle {
        /// Full subject the event was published under.
        subject: String,
        /// Event payload.
        event: CommandLifecycleEvent,
    },
}

// ============================================================================
// SECTION: Noop Publisher
// ============================================================================

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish_status(&self, _event: &RunStatusEvent) -> Result<(), PublishError> {
        Ok(())
    }

    fn publish_command(&self, _event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
