// crates/marshal-core/src/runtime/store.rs
// ============================================================================
// Module: Run Marshal In-Memory Store
// Description: Simple in-memory run store for tests and development.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of
//! [`RunStore`] for tests and local development. A single
//! mutex guards the whole store so multi-row operations are atomic, matching
//! the transactional contract of the durable implementation. It is not
//! intended for production use: state does not survive a restart.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::audit::AuditEntry;
use crate::core::audit::AuditEvent;
use crate::core::audit::GENESIS_PREV_HASH;
use crate::core::audit::chain_entry;
use crate::core::command::RunCommand;
use crate::core::hashing::canonical_json_bytes;
use crate::core::identifiers::CommandId;
use crate::core::identifiers::RunId;
use crate::core::run::Run;
use crate::core::run::StateTransition;
use crate::core::time::Timestamp;
use crate::interfaces::RunFilter;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Mutable store contents guarded by the store mutex.
#[derive(Debug, Default)]
struct StoreInner {
    /// Runs keyed by run id.
    runs: BTreeMap<String, Run>,
    /// Transition log per run, in insertion order.
    transitions: BTreeMap<String, Vec<StateTransition>>,
    /// Commands keyed by `(run_id, command_id)`.
    commands: BTreeMap<(String, String), RunCommand>,
    /// Audit chain in sequence order.
    audit: Vec<AuditEntry>,
}

/// In-memory run store for tests and development.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    /// Store contents protected by a single mutex.
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryRunStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }

    /// Locks the store, mapping mutex poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Store("run store mutex poisoned".to_string()))
    }
}

impl RunStore for InMemoryRunStore {
    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.runs.contains_key(run.id.as_str()) {
            return Err(StoreError::Conflict(format!("run id taken: {}", run.id)));
        }
        guard.runs.insert(run.id.as_str().to_string(), run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        let guard = self.lock()?;
        guard
            .runs
            .get(run_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))
    }

    fn update_run(&self, run: &Run, expected_updated_at: Timestamp) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let stored = guard
            .runs
            .get_mut(run.id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run.id)))?;
        if stored.updated_at != expected_updated_at {
            return Err(StoreError::Conflict(format!("run {} updated concurrently", run.id)));
        }
        *stored = run.clone();
        Ok(())
    }

    fn append_transition(&self, transition: &StateTransition) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard
            .transitions
            .entry(transition.run_id.as_str().to_string())
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    fn list_transitions(&self, run_id: &RunId) -> Result<Vec<StateTransition>, StoreError> {
        let guard = self.lock()?;
        let mut entries = guard.transitions.get(run_id.as_str()).cloned().unwrap_or_default();
        entries.sort_by_key(|entry| entry.at);
        Ok(entries)
    }

    fn append_command(&self, command: &RunCommand) -> Result<RunCommand, StoreError> {
        let mut guard = self.lock()?;
        let key = (command.run_id.as_str().to_string(), command.id.as_str().to_string());
        if let Some(existing) = guard.commands.get(&key) {
            let stored_bytes = canonical_json_bytes(&existing.payload)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            let submitted_bytes = canonical_json_bytes(&command.payload)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            if stored_bytes == submitted_bytes && existing.command_type == command.command_type {
                return Ok(existing.clone());
            }
            return Err(StoreError::Conflict(format!(
                "command {} resubmitted with divergent payload",
                command.id
            )));
        }
        guard.commands.insert(key, command.clone());
        Ok(command.clone())
    }

    fn get_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
    ) -> Result<RunCommand, StoreError> {
        let guard = self.lock()?;
        guard
            .commands
            .get(&(run_id.as_str().to_string(), command_id.as_str().to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("command {command_id} for run {run_id}")))
    }

    fn next_pending_command(&self, run_id: &RunId) -> Result<RunCommand, StoreError> {
        let guard = self.lock()?;
        guard
            .commands
            .values()
            .filter(|command| command.run_id == *run_id && command.is_pending())
            .min_by(|a, b| a.pending_order_key().cmp(&b.pending_order_key()))
            .cloned()
            .ok_or(StoreError::NoCommands)
    }

    fn deliver_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
        at: Timestamp,
    ) -> Result<RunCommand, StoreError> {
        let mut guard = self.lock()?;
        let command = guard
            .commands
            .get_mut(&(run_id.as_str().to_string(), command_id.as_str().to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("command {command_id} for run {run_id}")))?;
        if command.delivered_at.is_some() {
            return Err(StoreError::Conflict(format!("command {command_id} already delivered")));
        }
        command.delivered_at = Some(at);
        Ok(command.clone())
    }

    fn save_command(&self, command: &RunCommand) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let key = (command.run_id.as_str().to_string(), command.id.as_str().to_string());
        guard.commands.insert(key, command.clone());
        Ok(())
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let guard = self.lock()?;
        let mut runs: Vec<Run> =
            guard.runs.values().filter(|run| filter.matches(run)).cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    fn append_audit(&self, event: AuditEvent) -> Result<AuditEntry, StoreError> {
        let mut guard = self.lock()?;
        let prev_hash = guard
            .audit
            .last()
            .map_or_else(|| GENESIS_PREV_HASH.to_string(), |entry| entry.entry_hash.clone());
        let seq = u64::try_from(guard.audit.len()).unwrap_or(u64::MAX);
        let entry = chain_entry(&prev_hash, seq, event)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        guard.audit.push(entry.clone());
        Ok(entry)
    }

    fn list_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.audit.clone())
    }
}
