// crates/marshal-core/src/core/time.rs
// ============================================================================
// Module: Run Marshal Time Model
// Description: Canonical timestamp representation and clock capability.
// Purpose: Keep the lifecycle engine deterministic by injecting all time.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Run Marshal stamps every record with server-assigned unix-millisecond
//! timestamps. The lifecycle engine never reads the wall clock directly;
//! hosts inject a [`Clock`] so tests can drive escalation thresholds and
//! monotonicity checks with a manual clock. Learner-supplied timestamps are
//! never trusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::Error as DeError;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp: milliseconds since the unix epoch.
///
/// # Invariants
/// - Values are server-assigned; monotonicity per run is enforced by the
///   lifecycle engine, not by this type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the non-negative age of this timestamp relative to `now`,
    /// in milliseconds. A timestamp in the future of `now` has age zero.
    #[must_use]
    pub fn age_millis(self, now: Self) -> u64 {
        u64::try_from(now.0.saturating_sub(self.0)).unwrap_or(0)
    }

    /// Returns this timestamp advanced by `millis`.
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Wire Decoding
// ============================================================================

/// Wire forms accepted for client-declared timestamps.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    /// Unix epoch milliseconds.
    Millis(i64),
    /// RFC 3339 text, e.g. `2024-05-09T11:00:00Z`.
    Text(String),
}

/// Deserializes a timestamp from unix milliseconds or an RFC 3339 string.
///
/// Clients declare `issued_at` either way; storage and responses always use
/// milliseconds.
///
/// # Errors
///
/// Returns a deserialization error when the text form is not valid RFC 3339.
pub fn timestamp_from_wire<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    match WireTimestamp::deserialize(deserializer)? {
        WireTimestamp::Millis(millis) => Ok(Timestamp::from_unix_millis(millis)),
        WireTimestamp::Text(text) => {
            let parsed = OffsetDateTime::parse(&text, &Rfc3339)
                .map_err(|err| D::Error::custom(format!("invalid rfc3339 timestamp: {err}")))?;
            let millis = parsed.unix_timestamp_nanos() / 1_000_000;
            let millis = i64::try_from(millis)
                .map_err(|_| D::Error::custom("timestamp out of range".to_string()))?;
            Ok(Timestamp::from_unix_millis(millis))
        }
    }
}

// ============================================================================
// SECTION: Clock Capability
// ============================================================================

/// Clock capability injected into the lifecycle engine and health monitor.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp::from_unix_millis(millis)
    }
}

/// Manually advanced clock for tests.
///
/// # Invariants
/// - `advance` only moves time forward; regressions must be set explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current manual time guarded by a mutex.
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Creates a manual clock starting at the given timestamp.
    #[must_use]
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: i64) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = guard.plus_millis(millis);
        }
    }

    /// Sets the clock to an absolute timestamp.
    pub fn set(&self, now: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map_or(Timestamp::default(), |guard| *guard)
    }
}
