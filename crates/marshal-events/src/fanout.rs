// crates/marshal-events/src/fanout.rs
// ============================================================================
// Module: Run Marshal Fan-Out Publisher
// Description: Best-effort multi-publisher combinator.
// Purpose: Deliver each event to every configured publisher, skipping
//          failures.
// Dependencies: marshal-core
// ============================================================================

//! ## Overview
//! [`FanoutPublisher`] hands each event to every inner publisher. A failing
//! publisher is skipped so one slow or broken subscriber never starves the
//! rest; the publication as a whole fails only when every inner publisher
//! failed, which the lifecycle engine then counts and drops.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use marshal_core::core::events::CommandLifecycleEvent;
use marshal_core::core::events::RunStatusEvent;
use marshal_core::interfaces::EventPublisher;
use marshal_core::interfaces::PublishError;

// ============================================================================
// SECTION: Fan-Out Publisher
// ============================================================================

/// Best-effort multi-publisher fan-out.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    /// Inner publishers in delivery order.
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    /// Creates an empty fan-out publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a publisher to the fan-out set.
    #[must_use]
    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Delivers through every publisher, succeeding when at least one
    /// accepted the event (or the set is empty).
    fn deliver<F>(&self, deliver_one: F) -> Result<(), PublishError>
    where
        F: Fn(&dyn EventPublisher) -> Result<(), PublishError>,
    {
        if self.publishers.is_empty() {
            return Ok(());
        }
        let mut delivered = 0usize;
        for publisher in &self.publishers {
            if deliver_one(publisher.as_ref()).is_ok() {
                delivered = delivered.saturating_add(1);
            }
        }
        if delivered == 0 {
            return Err(PublishError::Publish("all fan-out publishers failed".to_string()));
        }
        Ok(())
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish_status(&self, event: &RunStatusEvent) -> Result<(), PublishError> {
        self.deliver(|publisher| publisher.publish_status(event))
    }

    fn publish_command(&self, event: &CommandLifecycleEvent) -> Result<(), PublishError> {
        self.deliver(|publisher| publisher.publish_command(event))
    }
}
