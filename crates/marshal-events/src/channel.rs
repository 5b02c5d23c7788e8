// crates/marshal-events/src/channel.rs
// ============================================================================
// Module: Run Marshal Channel Publisher
// Description: Channel-based publisher for in-process subscribers.
// Purpose: Send published events through a Tokio mpsc channel.
// Dependencies: marshal-core, tokio
// ============================================================================

//! ## Overview
//! [`ChannelPublisher`] delivers events by sending [`PublishedEvent`]
//! messages into a `tokio::sync::mpsc` channel. Sends never block: a full
//! or closed channel fails the publication, which the lifecycle engine
//! counts and drops.
//! Invariants:
//! - Each successful publication enqueues exactly one [`PublishedEvent`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::interfaces::EventPublisher;
use marshal_core::interfaces::PublishError;
use tokio::sync::mpsc::Sender;

use crate::COMMAND_LIFECYCLE_SUBJECT;
use crate::PublishedEvent;
use crate::RUN_STATUS_SUBJECT;
use crate::subject;

// ============================================================================
// SECTION: Channel Publisher
// ============================================================================

/// Channel-based event publisher.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    /// Sender used to hand events to subscribers.
    sender: Sender<PublishedEvent>,
    /// Subject prefix applied to both families.
    prefix: String,
}

impl ChannelPublisher {
    /// Creates a channel publisher with the given subject prefix.
    #[must_use]
    pub fn new(sender: Sender<PublishedEvent>, prefix: impl Into<String>) -> Self {
        Self {
            sender,
            prefix: prefix.into(),
        }
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError> {
        let message = PublishedEvent::RunStatus {
            subject: subject(&self.prefix, RUN_STATUS_SUBJECT),
            event: event.clone(),
        };
        self.sender.try_send(message).map_err(|err| PublishError::Publish(err.to_string()))
    }

    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        let message = PublishedEvent::CommandLifecycle {
            subject: subject(&self.prefix, COMMAND_LIFECYCLE_SUBJECT),
            event: event.clone(),
        };
        self.sender.try_send(message).map_err(|err| PublishError::Publish(err.to_string()))
    }
}
