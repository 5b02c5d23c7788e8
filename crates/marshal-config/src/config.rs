// crates/marshal-config/src/config.rs
// ============================================================================
// Module: Run Marshal Configuration
// Description: Configuration sections, loading, and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: marshal-core, marshal-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and range
//! limits. Unknown fields are rejected; cross-field rules (stale threshold
//! below unresponsive, sqlite store requires a path) fail closed at load
//! time rather than at first use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use marshal_core::runtime::StartTrigger;
use marshal_store_sqlite::SqliteJournalMode;
use marshal_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "marshal.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "MARSHAL_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024;
/// Maximum allowed request body size in bytes.
pub(crate) const MAX_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default server-side request deadline in milliseconds.
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Minimum allowed request deadline in milliseconds.
pub(crate) const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
/// Maximum allowed request deadline in milliseconds.
pub(crate) const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;
/// Default minimum interval between accepted heartbeats per run.
pub(crate) const DEFAULT_HEARTBEAT_MIN_INTERVAL_MS: u64 = 5_000;
/// Maximum allowed heartbeat throttle interval in milliseconds.
pub(crate) const MAX_HEARTBEAT_MIN_INTERVAL_MS: u64 = 600_000;
/// Default maximum tracked heartbeat throttle buckets.
pub(crate) const DEFAULT_THROTTLE_MAX_ENTRIES: usize = 4_096;
/// Default health scan interval in milliseconds.
pub(crate) const DEFAULT_SCAN_INTERVAL_MS: u64 = 15_000;
/// Minimum health scan interval in milliseconds.
pub(crate) const MIN_SCAN_INTERVAL_MS: u64 = 1_000;
/// Default stale threshold in milliseconds.
pub(crate) const DEFAULT_STALE_AFTER_MS: u64 = 45_000;
/// Default unresponsive threshold in milliseconds.
pub(crate) const DEFAULT_UNRESPONSIVE_AFTER_MS: u64 = 135_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file exceeds the size limit.
    #[error("config file too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Maximum allowed bytes.
        max: u64,
        /// Actual file size in bytes.
        actual: u64,
    },
    /// Config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A config value violates its range or cross-field rule.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Server Section
// ============================================================================

/// Per-run heartbeat throttle configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatThrottleConfig {
    /// Minimum milliseconds between accepted heartbeats for one run.
    #[serde(default = "default_heartbeat_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Maximum number of tracked throttle buckets.
    #[serde(default = "default_throttle_max_entries")]
    pub max_entries: usize,
}

impl Default for HeartbeatThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_HEARTBEAT_MIN_INTERVAL_MS,
            max_entries: DEFAULT_THROTTLE_MAX_ENTRIES,
        }
    }
}

/// Returns the default heartbeat throttle interval.
const fn default_heartbeat_min_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_MIN_INTERVAL_MS
}

/// Returns the default throttle bucket capacity.
const fn default_throttle_max_entries() -> usize {
    DEFAULT_THROTTLE_MAX_ENTRIES
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address, required for `serve`.
    #[serde(default)]
    pub bind: Option<String>,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Server-side request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Heartbeat throttle settings.
    #[serde(default)]
    pub heartbeat_throttle: HeartbeatThrottleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            heartbeat_throttle: HeartbeatThrottleConfig::default(),
        }
    }
}

/// Returns the default request body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default request deadline.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

// ============================================================================
// SECTION: Store Section
// ============================================================================

/// Run store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-memory store (development only; state is lost on restart).
    #[default]
    Memory,
    /// Durable `SQLite` store.
    Sqlite,
}

/// Run store configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub kind: StoreKind,
    /// Database file path, required for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds (sqlite backend).
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    /// Journal mode (sqlite backend).
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Sync mode (sqlite backend).
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

// ============================================================================
// SECTION: Events Section
// ============================================================================

/// Event publisher backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventsKind {
    /// Drop all events (tests and minimal deployments).
    #[default]
    Noop,
    /// Write JSON lines to stderr.
    Stderr,
    /// Write JSON lines to a file.
    File,
}

/// Event publisher configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Backend selection.
    #[serde(default)]
    pub kind: EventsKind,
    /// Output path, required for the file backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Subject prefix applied to both event families.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            kind: EventsKind::default(),
            path: None,
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Returns the default event subject prefix.
fn default_subject_prefix() -> String {
    "marshal".to_string()
}

// ============================================================================
// SECTION: Health Section
// ============================================================================

/// Health monitor configuration section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    /// Interval between scans in milliseconds.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Heartbeat age at which a run becomes `heartbeat_stale`.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Heartbeat age at which a run becomes `unresponsive`.
    #[serde(default = "default_unresponsive_after_ms")]
    pub unresponsive_after_ms: u64,
    /// Whether unresponsive runs receive a system terminate command.
    #[serde(default)]
    pub auto_terminate: bool,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            unresponsive_after_ms: DEFAULT_UNRESPONSIVE_AFTER_MS,
            auto_terminate: false,
        }
    }
}

/// Returns the default scan interval.
const fn default_scan_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL_MS
}

/// Returns the default stale threshold.
const fn default_stale_after_ms() -> u64 {
    DEFAULT_STALE_AFTER_MS
}

/// Returns the default unresponsive threshold.
const fn default_unresponsive_after_ms() -> u64 {
    DEFAULT_UNRESPONSIVE_AFTER_MS
}

// ============================================================================
// SECTION: Lifecycle Section
// ============================================================================

/// Lifecycle engine configuration section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LifecycleSection {
    /// Trigger for the `queued → running` transition.
    #[serde(default)]
    pub start_trigger: StartTrigger,
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root orchestrator configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct MarshalConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Run store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Event publisher settings.
    #[serde(default)]
    pub events: EventsConfig,
    /// Health monitor settings.
    #[serde(default)]
    pub health: HealthSection,
    /// Lifecycle engine settings.
    #[serde(default)]
    pub lifecycle: LifecycleSection,
}

impl MarshalConfig {
    /// Loads configuration from an explicit path, the `MARSHAL_CONFIG`
    /// environment variable, or the default filename, in that order.
    /// A missing default file yields the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized,
    /// malformed, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let resolved = path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME));
        if path.is_none() && env::var(CONFIG_ENV_VAR).is_err() && !resolved.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load_from_path(&resolved)
    }

    /// Loads configuration from the given file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized,
    /// malformed, or fails validation.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                max: MAX_CONFIG_FILE_SIZE,
                actual: metadata.len(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_toml(&raw)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates ranges and cross-field rules, failing closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bind) = &self.server.bind
            && bind.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::Invalid(format!("server.bind is not a socket address: {bind}")));
        }
        if self.server.max_body_bytes == 0 || self.server.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes out of range (1..={MAX_MAX_BODY_BYTES}): {}",
                self.server.max_body_bytes
            )));
        }
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS)
            .contains(&self.server.request_timeout_ms)
        {
            return Err(ConfigError::Invalid(format!(
                "server.request_timeout_ms out of range \
                 ({MIN_REQUEST_TIMEOUT_MS}..={MAX_REQUEST_TIMEOUT_MS}): {}",
                self.server.request_timeout_ms
            )));
        }
        if self.server.heartbeat_throttle.min_interval_ms > MAX_HEARTBEAT_MIN_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "server.heartbeat_throttle.min_interval_ms exceeds \
                 {MAX_HEARTBEAT_MIN_INTERVAL_MS}: {}",
                self.server.heartbeat_throttle.min_interval_ms
            )));
        }
        if self.server.heartbeat_throttle.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "server.heartbeat_throttle.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.store.kind == StoreKind::Sqlite && self.store.path.is_none() {
            return Err(ConfigError::Invalid("store.kind = \"sqlite\" requires store.path".to_string()));
        }
        if self.events.kind == EventsKind::File && self.events.path.is_none() {
            return Err(ConfigError::Invalid("events.kind = \"file\" requires events.path".to_string()));
        }
        if self.health.scan_interval_ms < MIN_SCAN_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "health.scan_interval_ms below {MIN_SCAN_INTERVAL_MS}: {}",
                self.health.scan_interval_ms
            )));
        }
        if self.health.stale_after_ms == 0 {
            return Err(ConfigError::Invalid(
                "health.stale_after_ms must be greater than zero".to_string(),
            ));
        }
        if self.health.unresponsive_after_ms <= self.health.stale_after_ms {
            return Err(ConfigError::Invalid(format!(
                "health.unresponsive_after_ms ({}) must exceed health.stale_after_ms ({})",
                self.health.unresponsive_after_ms, self.health.stale_after_ms
            )));
        }
        Ok(())
    }
}
