// crates/marshal-core/src/runtime/health.rs
// ============================================================================
// Module: Run Marshal Health Monitor
// Description: Periodic derivation of run health from heartbeat freshness.
// Purpose: Drive healthy → heartbeat_stale → unresponsive escalations
//          exactly once per threshold crossing.
// Dependencies: crate::{core, interfaces, runtime::lifecycle}, tokio
// ============================================================================

//! ## Overview
//! The health monitor scans all non-terminal runs with a recorded heartbeat
//! on a fixed interval and derives a health status from heartbeat age.
//! Escalations are idempotent: a run whose health already matches the
//! derived value is skipped, so re-entering the same state across scans
//! never re-emits. Each run's update is an independent optimistic write; one
//! failing run never poisons the rest of the scan. Cancellation is observed
//! between scans, never mid-update.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::core::run::HealthStatus;
use crate::core::time::Clock;
use crate::core::time::Timestamp;
use crate::interfaces::RunFilter;
use crate::interfaces::RunStore;
use crate::runtime::lifecycle::Lifecycle;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Health monitor configuration.
///
/// # Invariants
/// - `stale_after_ms < unresponsive_after_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between scans in milliseconds.
    pub scan_interval_ms: u64,
    /// Heartbeat age at which a run becomes `heartbeat_stale`.
    pub stale_after_ms: u64,
    /// Heartbeat age at which a run becomes `unresponsive`.
    pub unresponsive_after_ms: u64,
    /// Whether unresponsive runs receive a system terminate command.
    pub auto_terminate: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 15_000,
            stale_after_ms: 45_000,
            unresponsive_after_ms: 135_000,
            auto_terminate: false,
        }
    }
}

// ============================================================================
// SECTION: Scan Report
// ============================================================================

/// Summary of one health scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Runs examined.
    pub scanned: usize,
    /// Health transitions applied.
    pub escalated: usize,
    /// Runs whose update failed; the next scan retries them.
    pub failed: usize,
}

// ============================================================================
// SECTION: Health Monitor
// ============================================================================

/// Periodic health scanner over the run store.
#[derive(Clone)]
pub struct HealthMonitor {
    /// Lifecycle engine used to apply health changes.
    lifecycle: Lifecycle,
    /// Clock capability (shared with the lifecycle engine).
    clock: Arc<dyn Clock>,
    /// Monitor configuration.
    config: HealthConfig,
}

impl HealthMonitor {
    /// Creates a health monitor over the given lifecycle engine.
    #[must_use]
    pub fn new(lifecycle: Lifecycle, config: HealthConfig) -> Self {
        let clock = lifecycle.clock();
        Self {
            lifecycle,
            clock,
            config,
        }
    }

    /// Derives the target health for a heartbeat age in milliseconds.
    #[must_use]
    pub const fn target_health(&self, age_ms: u64) -> HealthStatus {
        if age_ms >= self.config.unresponsive_after_ms {
            HealthStatus::Unresponsive
        } else if age_ms >= self.config.stale_after_ms {
            HealthStatus::HeartbeatStale
        } else {
            HealthStatus::Healthy
        }
    }

    /// Runs one scan over all non-terminal runs with a recorded heartbeat.
    ///
    /// Idempotent: repeating the scan without clock movement applies no
    /// further transitions and emits no further events.
    pub fn scan_once(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let filter = RunFilter {
            non_terminal_only: true,
            requires_heartbeat: true,
            ..RunFilter::default()
        };
        let runs = match self.lifecycle.store().list_runs(&filter) {
            Ok(runs) => runs,
            Err(_) => {
                report.failed = report.failed.saturating_add(1);
                return report;
            }
        };
        let now = self.clock.now();
        for run in runs {
            report.scanned = report.scanned.saturating_add(1);
            let Some(last_heartbeat_at) = run.last_heartbeat_at else {
                continue;
            };
            let target = self.target_health(age_of(last_heartbeat_at, now));
            if run.health == target {
                continue;
            }
            match self.lifecycle.apply_health(&run.id, target, self.config.auto_terminate) {
                Ok(Some(_)) => report.escalated = report.escalated.saturating_add(1),
                Ok(None) => {}
                Err(_) => report.failed = report.failed.saturating_add(1),
            }
        }
        report
    }

    /// Runs the scan loop until the shutdown signal flips.
    ///
    /// Cancellation is observed between scans; an in-progress scan always
    /// completes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.scan_interval_ms.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.scan_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Returns the heartbeat age in milliseconds.
fn age_of(last_heartbeat_at: Timestamp, now: Timestamp) -> u64 {
    last_heartbeat_at.age_millis(now)
}
