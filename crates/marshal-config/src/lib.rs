// crates/marshal-config/src/lib.rs
// ============================================================================
// Module: Run Marshal Config Library
// Description: Configuration loading and validation for the orchestrator.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: marshal-core, marshal-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits and
//! unknown-field rejection. Missing or out-of-range values fail closed.
//! Every tunable has a default so a minimal file (or none at all for
//! development) is enough to start the orchestrator.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::EventsConfig;
pub use config::EventsKind;
pub use config::HealthSection;
pub use config::HeartbeatThrottleConfig;
pub use config::LifecycleSection;
pub use config::MarshalConfig;
pub use config::ServerConfig;
pub use config::StoreConfig;
pub use config::StoreKind;
