// crates/marshal-core/src/core/audit.rs
// ============================================================================
// Module: Run Marshal Audit Chain
// Description: Hash-chained append-only audit records for commands and
//              operator actions.
// Purpose: Provide a tamper-evident trail suitable for incident review.
// Dependencies: crate::core::{command, hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every command submission, delivery, and acknowledgement, and every
//! operator-initiated state change, appends one audit entry. Entries are
//! chained: `entry_hash = H(prev_hash || canonical_json(event))` with a
//! genesis previous hash of `"0"`. Tampering with any entry invalidates all
//! later hashes, and the chain is verifiable end-to-end from the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::command::Actor;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashError;
use crate::core::hashing::canonical_json_bytes;
use crate::core::hashing::hash_bytes;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_PREV_HASH: &str = "0";

// ============================================================================
// SECTION: Audit Events
// ============================================================================

/// Auditable actions recorded in the chain.
///
/// # Invariants
/// - Variants are stable for serialization and offline verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A command was accepted and queued.
    CommandSubmitted,
    /// A command was handed to a consumer.
    CommandDelivered,
    /// A command was acknowledged by the learner.
    CommandAcknowledged,
    /// A lifecycle state change was applied.
    StateChanged,
}

/// Request metadata captured at ingress for audit purposes.
///
/// # Invariants
/// - Credentials are never stored raw; only a fingerprint digest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Source network address when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    /// Client-declared identifier when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Lowercase hex fingerprint of the presented credential, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_fingerprint: Option<String>,
    /// Correlation identifier minted at ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// Unhashed audit event payload; the canonical serialization of this value
/// is what the chain hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Recorded action.
    pub action: AuditAction,
    /// Run the action targeted.
    pub run_id: RunId,
    /// Command involved, when the action is command-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    /// Acting principal, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Action detail: the command envelope or transition description.
    pub payload: Value,
    /// Request metadata captured at ingress.
    #[serde(default)]
    pub metadata: RequestMetadata,
    /// Server-assigned event time.
    pub at: Timestamp,
}

/// Hash-chained audit entry as persisted by the store.
///
/// # Invariants
/// - `entry_hash = H(prev_hash || canonical_json(event))`.
/// - `seq` is dense and ascending from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Dense chain position, starting at zero.
    pub seq: u64,
    /// Audit event payload.
    pub event: AuditEvent,
    /// Hash of the previous entry ([`GENESIS_PREV_HASH`] for the first).
    pub prev_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

// ============================================================================
// SECTION: Chain Construction
// ============================================================================

/// Computes the entry hash for an event given the previous hash.
///
/// # Errors
///
/// Returns [`HashError`] when the event cannot be canonicalized.
pub fn chain_hash(prev_hash: &str, event: &AuditEvent) -> Result<String, HashError> {
    let event_bytes = canonical_json_bytes(event)?;
    let mut combined = prev_hash.as_bytes().to_vec();
    combined.extend_from_slice(&event_bytes);
    Ok(hash_bytes(DEFAULT_HASH_ALGORITHM, &combined).value)
}

/// Builds the next chain entry from the previous hash and sequence number.
///
/// # Errors
///
/// Returns [`HashError`] when the event cannot be canonicalized.
pub fn chain_entry(prev_hash: &str, seq: u64, event: AuditEvent) -> Result<AuditEntry, HashError> {
    let entry_hash = chain_hash(prev_hash, &event)?;
    Ok(AuditEntry {
        seq,
        event,
        prev_hash: prev_hash.to_string(),
        entry_hash,
    })
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Audit chain verification failures.
///
/// # Invariants
/// - Variants identify the first offending sequence number.
#[derive(Debug, Error, PartialEq)]
pub enum AuditVerifyError {
    /// Sequence numbers are not dense and ascending from zero.
    #[error("audit entry {found} out of sequence (expected {expected})")]
    SequenceGap {
        /// Expected sequence number.
        expected: u64,
        /// Found sequence number.
        found: u64,
    },
    /// An entry's previous hash does not match its predecessor.
    #[error("audit entry {seq} breaks the chain: prev_hash mismatch")]
    BrokenLink {
        /// Offending sequence number.
        seq: u64,
    },
    /// An entry's hash does not match its recomputed value.
    #[error("audit entry {seq} hash mismatch")]
    HashMismatch {
        /// Offending sequence number.
        seq: u64,
    },
    /// An entry could not be canonicalized during verification.
    #[error("audit entry {seq} not canonicalizable: {message}")]
    NotCanonical {
        /// Offending sequence number.
        seq: u64,
        /// Canonicalization failure description.
        message: String,
    },
}

/// Verification report for a full chain walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditVerifyReport {
    /// Number of entries verified.
    pub entries: u64,
    /// Hash of the final entry, when the chain is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<String>,
}

/// Verifies a full audit chain in order.
///
/// # Errors
///
/// Returns [`AuditVerifyError`] identifying the first broken entry.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<AuditVerifyReport, AuditVerifyError> {
    let mut prev_hash = GENESIS_PREV_HASH.to_string();
    let mut expected_seq = 0u64;
    for entry in entries {
        if entry.seq != expected_seq {
            return Err(AuditVerifyError::SequenceGap {
                expected: expected_seq,
                found: entry.seq,
            });
        }
        if entry.prev_hash != prev_hash {
            return Err(AuditVerifyError::BrokenLink {
                seq: entry.seq,
            });
        }
        let recomputed =
            chain_hash(&entry.prev_hash, &entry.event).map_err(|err| {
                AuditVerifyError::NotCanonical {
                    seq: entry.seq,
                    message: err.to_string(),
                }
            })?;
        if recomputed != entry.entry_hash {
            return Err(AuditVerifyError::HashMismatch {
                seq: entry.seq,
            });
        }
        prev_hash = entry.entry_hash.clone();
        expected_seq = expected_seq.saturating_add(1);
    }
    Ok(AuditVerifyReport {
        entries: expected_seq,
        head_hash: if entries.is_empty() { None } else { Some(prev_hash) },
    })
}
