// crates/marshal-http/src/throttle.rs
// ============================================================================
// Module: Heartbeat Throttle
// Description: Per-run minimum-interval gate with bounded bucket tracking.
// Purpose: Shed heartbeats arriving faster than the accepted cadence.
// Dependencies: marshal-core
// ============================================================================

//! ## Overview
//! Learners target one heartbeat per fifteen seconds; anything faster than
//! the configured minimum interval per run is throttled with a retry hint.
//! Buckets are keyed by run id and evicted by TTL once the table exceeds its
//! capacity, so an adversarial client cannot grow the table without bound.
//! Time comes from the shared [`Clock`] capability so the boundary (4.9 s
//! throttled, 5.0 s accepted) is testable with a manual clock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use marshal_core::core::time::Timestamp;

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Decision returned by the throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Accept the heartbeat.
    Allow,
    /// Throttle the heartbeat with a retry delay.
    Limited {
        /// Milliseconds before the next heartbeat will be accepted.
        retry_after_ms: u64,
    },
}

// ============================================================================
// SECTION: Throttle
// ============================================================================

/// Per-key bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Time of the last accepted request.
    last_accepted: Timestamp,
}

/// Per-run minimum-interval heartbeat throttle.
pub struct HeartbeatThrottle {
    /// Minimum milliseconds between accepted requests per key.
    min_interval_ms: u64,
    /// Maximum number of tracked buckets before TTL eviction.
    max_entries: usize,
    /// Buckets keyed by run id.
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl HeartbeatThrottle {
    /// Creates a throttle with the given interval and capacity.
    #[must_use]
    pub fn new(min_interval_ms: u64, max_entries: usize) -> Self {
        Self {
            min_interval_ms,
            max_entries,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Checks the throttle for a key at the given time, updating the bucket
    /// when the request is accepted.
    pub fn check(&self, key: &str, now: Timestamp) -> ThrottleDecision {
        if self.min_interval_ms == 0 {
            return ThrottleDecision::Allow;
        }
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned table must not take the heartbeat path down.
            return ThrottleDecision::Allow;
        };
        if buckets.len() > self.max_entries {
            let ttl = self.min_interval_ms.saturating_mul(2);
            buckets.retain(|_, bucket| bucket.last_accepted.age_millis(now) <= ttl);
        }
        if let Some(bucket) = buckets.get(key) {
            let elapsed = bucket.last_accepted.age_millis(now);
            if elapsed < self.min_interval_ms {
                return ThrottleDecision::Limited {
                    retry_after_ms: self.min_interval_ms.saturating_sub(elapsed),
                };
            }
        }
        buckets.insert(
            key.to_string(),
            Bucket {
                last_accepted: now,
            },
        );
        ThrottleDecision::Allow
    }
}
