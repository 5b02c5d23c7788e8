// crates/marshal-events/src/log.rs
// ============================================================================
// Module: Run Marshal Log Publisher
// Description: Log-only publisher writing one JSON line per event.
// Purpose: Persist an audit-grade event trail without a message bus.
// Dependencies: marshal-core, serde_json, std
// ============================================================================

//! ## Overview
//! [`LogPublisher`] writes a JSON line for each published event and is used
//! when no message bus is configured. The writer is guarded by a mutex so
//! lines never interleave.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;

use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::interfaces::EventPublisher;
use marshal_core::interfaces::PublishError;

use crate::COMMAND_LIFECYCLE_SUBJECT;
use crate::PublishedEvent;
use crate::RUN_STATUS_SUBJECT;
use crate::subject;

// ============================================================================
// SECTION: Log Publisher
// ============================================================================

/// Log-only event publisher.
pub struct LogPublisher<W: Write + Send> {
    /// Output writer for event lines.
    writer: Mutex<W>,
    /// Subject prefix applied to both families.
    prefix: String,
}

impl<W: Write + Send> LogPublisher<W> {
    /// Creates a log publisher with the given subject prefix.
    pub fn new(writer: W, prefix: impl Into<String>) -> Self {
        Self {
            writer: Mutex::new(writer),
            prefix: prefix.into(),
        }
    }

    /// Writes one event as a JSON line.
    fn write_line(&self, message: &PublishedEvent) -> Result<(), PublishError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| PublishError::Publish("log writer mutex poisoned".to_string()))?;
        serde_json::to_writer(&mut *guard, message)
            .map_err(|err| PublishError::Publish(err.to_string()))?;
        guard.write_all(b"\n").map_err(|err| PublishError::Publish(err.to_string()))?;
        guard.flush().map_err(|err| PublishError::Publish(err.to_string()))?;
        Ok(())
    }
}

impl<W: Write + Send> EventPublisher for LogPublisher<W> {
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError> {
        self.write_line(&PublishedEvent::RunStatus {
            subject: subject(&self.prefix, RUN_STATUS_SUBJECT),
            event: event.clone(),
        })
    }

    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        self.write_line(&PublishedEvent::CommandLifecycle {
            subject: subject(&self.prefix, COMMAND_LIFECYCLE_SUBJECT),
            event: event.clone(),
        })
    }
}
