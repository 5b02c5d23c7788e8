// crates/marshal-core/src/core/mod.rs
// ============================================================================
// Module: Run Marshal Core Types
// Description: Canonical run, command, heartbeat, and audit structures.
// Purpose: Provide stable, serializable types for the orchestrator state.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types define the canonical run coordination records: lifecycle
//! states, runtime and health statuses, commands with bounded payloads,
//! heartbeats, audit chain entries, and downstream event payloads. These
//! types are the source of truth for any derived API surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod command;
pub mod events;
pub mod hashing;
pub mod heartbeat;
pub mod identifiers;
pub mod run;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditAction;
pub use audit::AuditEntry;
pub use audit::AuditEvent;
pub use audit::AuditVerifyError;
pub use audit::AuditVerifyReport;
pub use audit::GENESIS_PREV_HASH;
pub use audit::RequestMetadata;
pub use audit::chain_entry;
pub use audit::chain_hash;
pub use audit::verify_chain;
pub use command::Actor;
pub use command::ActorKind;
pub use command::CommandType;
pub use command::CommandValidationError;
pub use command::RunCommand;
pub use command::TerminatePayload;
pub use command::TunePayload;
pub use command::command_permitted_in;
pub use command::validate_command;
pub use events::CommandLifecycleEvent;
pub use events::CommandPhase;
pub use events::RunStatusEvent;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use heartbeat::Heartbeat;
pub use heartbeat::HeartbeatValidationError;
pub use heartbeat::validate_heartbeat;
pub use identifiers::ActorId;
pub use identifiers::CommandId;
pub use identifiers::CorrelationId;
pub use identifiers::ExperimentId;
pub use identifiers::ExperimentVersionId;
pub use identifiers::RunId;
pub use run::HealthStatus;
pub use run::LifecycleState;
pub use run::Run;
pub use run::RuntimeStatus;
pub use run::StateTransition;
pub use run::TransitionCause;
pub use run::transition_target;
pub use time::Clock;
pub use time::ManualClock;
pub use time::SystemClock;
pub use time::Timestamp;
pub use time::timestamp_from_wire;
