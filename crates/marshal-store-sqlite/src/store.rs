// crates/marshal-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunStore backed by SQLite WAL.
// Purpose: Persist orchestrator state with transactional multi-row writes.
// Dependencies: marshal-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`RunStore`] using `SQLite`. Records are
//! stored as JSON alongside the relational columns the store indexes on:
//! `(experiment_id, created_at desc)`, `(lifecycle_state)`, and
//! `(last_heartbeat_at)` for non-terminal runs. All multi-row operations run
//! inside a transaction behind a single mutex-guarded write connection, so
//! every trait operation is atomic. Loads fail closed on rows that no longer
//! deserialize.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use marshal_core::core::audit::AuditEntry;
use marshal_core::core::audit::AuditEvent;
use marshal_core::core::audit::GENESIS_PREV_HASH;
use marshal_core::core::audit::chain_entry;
use marshal_core::core::command::RunCommand;
use marshal_core::core::hashing::canonical_json_bytes;
use marshal_core::core::identifiers::CommandId;
use marshal_core::core::identifiers::RunId;
use marshal_core::core::run::Run;
use marshal_core::core::run::StateTransition;
use marshal_core::core::time::Timestamp;
use marshal_core::interfaces::RunFilter;
use marshal_core::interfaces::RunStore;
use marshal_core::interfaces::StoreError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Retry hint returned on busy/locked database errors (ms).
const BUSY_RETRY_AFTER_MS: u64 = 50;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` run store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw record payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption detected on load.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store is busy and the caller should retry.
    #[error("sqlite store busy: {0}")]
    Busy(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Store(message)
            }
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Busy(message) => Self::Unavailable {
                message,
                retry_after_ms: Some(BUSY_RETRY_AFTER_MS),
            },
        }
    }
}

/// Classifies a rusqlite error into a store error.
fn classify_db_error(error: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = error
        && matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    {
        return SqliteStoreError::Busy(error.to_string());
    }
    SqliteStoreError::Db(error.to_string())
}

/// Maps a rusqlite error straight into a [`StoreError`].
fn db_err(error: rusqlite::Error) -> StoreError {
    classify_db_error(&error).into()
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed run store with WAL support.
///
/// # Invariants
/// - Connection access is serialized through a mutex; every trait operation
///   runs in one transaction.
#[derive(Clone)]
pub struct SqliteRunStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    /// Opens or creates the store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// migrated.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let mut connection =
            Connection::open(&config.path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        configure_connection(&connection, &config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the connection, mapping mutex poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Store("sqlite connection mutex poisoned".to_string()))
    }
}

/// Applies pragmas to a fresh connection.
fn configure_connection(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| classify_db_error(&err))?;
    let timeout = i64::try_from(config.busy_timeout_ms).unwrap_or(i64::MAX);
    connection
        .execute_batch(&format!("PRAGMA busy_timeout = {timeout};"))
        .map_err(|err| classify_db_error(&err))?;
    Ok(())
}

/// Creates or migrates the store schema inside a transaction.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| classify_db_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| classify_db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| classify_db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| classify_db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    experiment_id TEXT NOT NULL,
                    lifecycle_state TEXT NOT NULL,
                    last_heartbeat_at INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_runs_experiment
                    ON runs (experiment_id, created_at DESC);
                CREATE INDEX IF NOT EXISTS idx_runs_state
                    ON runs (lifecycle_state);
                CREATE INDEX IF NOT EXISTS idx_runs_heartbeat
                    ON runs (last_heartbeat_at)
                    WHERE lifecycle_state NOT IN ('completed', 'failed', 'terminated');
                CREATE TABLE IF NOT EXISTS run_transitions (
                    rowid_seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL,
                    at INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_transitions_run
                    ON run_transitions (run_id, at, rowid_seq);
                CREATE TABLE IF NOT EXISTS run_commands (
                    run_id TEXT NOT NULL,
                    command_id TEXT NOT NULL,
                    issued_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    delivered_at INTEGER,
                    acknowledged_at INTEGER,
                    payload_canonical BLOB NOT NULL,
                    command_type TEXT NOT NULL,
                    record_json TEXT NOT NULL,
                    PRIMARY KEY (run_id, command_id)
                );
                CREATE INDEX IF NOT EXISTS idx_commands_pending
                    ON run_commands (run_id, issued_at, created_at, command_id)
                    WHERE delivered_at IS NULL;
                CREATE TABLE IF NOT EXISTS audit_entries (
                    seq INTEGER PRIMARY KEY,
                    prev_hash TEXT NOT NULL,
                    entry_hash TEXT NOT NULL,
                    record_json TEXT NOT NULL
                );",
            )
            .map_err(|err| classify_db_error(&err))?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "found schema version {found}, expected {SCHEMA_VERSION}"
            )));
        }
    }
    tx.commit().map_err(|err| classify_db_error(&err))?;
    Ok(())
}

// ============================================================================
// SECTION: Row Codecs
// ============================================================================

/// Serializes a record to its JSON row representation.
fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Deserializes a record from its JSON row representation, failing closed.
fn decode_json<T: for<'de> serde::Deserialize<'de>>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt(err.to_string()))
}

// ============================================================================
// SECTION: RunStore Implementation
// ============================================================================

impl RunStore for SqliteRunStore {
    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let record = encode_json(run)?;
        let inserted = guard
            .execute(
                "INSERT OR IGNORE INTO runs (run_id, experiment_id, lifecycle_state, \
                 last_heartbeat_at, created_at, updated_at, record_json) VALUES (?1, ?2, ?3, ?4, \
                 ?5, ?6, ?7)",
                params![
                    run.id.as_str(),
                    run.experiment_id.as_str(),
                    run.state.as_str(),
                    run.last_heartbeat_at.map(Timestamp::as_unix_millis),
                    run.created_at.as_unix_millis(),
                    run.updated_at.as_unix_millis(),
                    record,
                ],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(StoreError::Conflict(format!("run id taken: {}", run.id)));
        }
        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        let guard = self.lock()?;
        let raw: Option<String> = guard
            .query_row(
                "SELECT record_json FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map_or_else(
            || Err(StoreError::NotFound(format!("run {run_id}"))),
            |raw| decode_json(&raw),
        )
    }

    fn update_run(&self, run: &Run, expected_updated_at: Timestamp) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let stored_updated_at: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM runs WHERE run_id = ?1",
                params![run.id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(stored_updated_at) = stored_updated_at else {
            return Err(StoreError::NotFound(format!("run {}", run.id)));
        };
        if stored_updated_at != expected_updated_at.as_unix_millis() {
            return Err(StoreError::Conflict(format!("run {} updated concurrently", run.id)));
        }
        let record = encode_json(run)?;
        tx.execute(
            "UPDATE runs SET experiment_id = ?2, lifecycle_state = ?3, last_heartbeat_at = ?4, \
             updated_at = ?5, record_json = ?6 WHERE run_id = ?1",
            params![
                run.id.as_str(),
                run.experiment_id.as_str(),
                run.state.as_str(),
                run.last_heartbeat_at.map(Timestamp::as_unix_millis),
                run.updated_at.as_unix_millis(),
                record,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn append_transition(&self, transition: &StateTransition) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let record = encode_json(transition)?;
        guard
            .execute(
                "INSERT INTO run_transitions (run_id, at, record_json) VALUES (?1, ?2, ?3)",
                params![
                    transition.run_id.as_str(),
                    transition.at.as_unix_millis(),
                    record,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn list_transitions(&self, run_id: &RunId) -> Result<Vec<StateTransition>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT record_json FROM run_transitions WHERE run_id = ?1 ORDER BY at, rowid_seq",
            )
            .map_err(db_err)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut transitions = Vec::new();
        for raw in rows {
            let raw = raw.map_err(db_err)?;
            transitions.push(decode_json(&raw)?);
        }
        Ok(transitions)
    }

    fn append_command(&self, command: &RunCommand) -> Result<RunCommand, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let submitted_canonical = canonical_json_bytes(&command.payload)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let existing: Option<(Vec<u8>, String, String)> = tx
            .query_row(
                "SELECT payload_canonical, command_type, record_json FROM run_commands WHERE \
                 run_id = ?1 AND command_id = ?2",
                params![command.run_id.as_str(), command.id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;
        if let Some((stored_canonical, stored_type, raw)) = existing {
            if stored_canonical == submitted_canonical
                && stored_type == command.command_type.as_str()
            {
                return decode_json(&raw);
            }
            return Err(StoreError::Conflict(format!(
                "command {} resubmitted with divergent payload",
                command.id
            )));
        }
        let record = encode_json(command)?;
        tx.execute(
            "INSERT INTO run_commands (run_id, command_id, issued_at, created_at, delivered_at, \
             acknowledged_at, payload_canonical, command_type, record_json) VALUES (?1, ?2, ?3, \
             ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                command.run_id.as_str(),
                command.id.as_str(),
                command.issued_at.as_unix_millis(),
                command.created_at.as_unix_millis(),
                command.delivered_at.map(Timestamp::as_unix_millis),
                command.acknowledged_at.map(Timestamp::as_unix_millis),
                submitted_canonical,
                command.command_type.as_str(),
                record,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(command.clone())
    }

    fn get_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
    ) -> Result<RunCommand, StoreError> {
        let guard = self.lock()?;
        let raw: Option<String> = guard
            .query_row(
                "SELECT record_json FROM run_commands WHERE run_id = ?1 AND command_id = ?2",
                params![run_id.as_str(), command_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map_or_else(
            || Err(StoreError::NotFound(format!("command {command_id} for run {run_id}"))),
            |raw| decode_json(&raw),
        )
    }

    fn next_pending_command(&self, run_id: &RunId) -> Result<RunCommand, StoreError> {
        let guard = self.lock()?;
        let raw: Option<String> = guard
            .query_row(
                "SELECT record_json FROM run_commands WHERE run_id = ?1 AND delivered_at IS NULL \
                 ORDER BY issued_at, created_at, command_id LIMIT 1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map_or(Err(StoreError::NoCommands), |raw| decode_json(&raw))
    }

    fn deliver_command(
        &self,
        run_id: &RunId,
        command_id: &CommandId,
        at: Timestamp,
    ) -> Result<RunCommand, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT record_json FROM run_commands WHERE run_id = ?1 AND command_id = ?2",
                params![run_id.as_str(), command_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound(format!("command {command_id} for run {run_id}")));
        };
        let mut command: RunCommand = decode_json(&raw)?;
        if command.delivered_at.is_some() {
            return Err(StoreError::Conflict(format!("command {command_id} already delivered")));
        }
        command.delivered_at = Some(at);
        let record = encode_json(&command)?;
        let updated = tx
            .execute(
                "UPDATE run_commands SET delivered_at = ?3, record_json = ?4 WHERE run_id = ?1 \
                 AND command_id = ?2 AND delivered_at IS NULL",
                params![
                    run_id.as_str(),
                    command_id.as_str(),
                    at.as_unix_millis(),
                    record,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!("command {command_id} already delivered")));
        }
        tx.commit().map_err(db_err)?;
        Ok(command)
    }

    fn save_command(&self, command: &RunCommand) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let record = encode_json(command)?;
        let canonical = canonical_json_bytes(&command.payload)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO run_commands (run_id, command_id, issued_at, created_at, \
                 delivered_at, acknowledged_at, payload_canonical, command_type, record_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) ON CONFLICT(run_id, command_id) DO \
                 UPDATE SET delivered_at = excluded.delivered_at, acknowledged_at = \
                 excluded.acknowledged_at, record_json = excluded.record_json",
                params![
                    command.run_id.as_str(),
                    command.id.as_str(),
                    command.issued_at.as_unix_millis(),
                    command.created_at.as_unix_millis(),
                    command.delivered_at.map(Timestamp::as_unix_millis),
                    command.acknowledged_at.map(Timestamp::as_unix_millis),
                    canonical,
                    command.command_type.as_str(),
                    record,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let guard = self.lock()?;
        // The indexed predicates narrow the scan; the full filter is applied
        // to the decoded records.
        let mut sql = String::from("SELECT record_json FROM runs WHERE 1 = 1");
        let mut bindings: Vec<rusqlite::types::Value> = Vec::new();
        if filter.non_terminal_only {
            sql.push_str(" AND lifecycle_state NOT IN ('completed', 'failed', 'terminated')");
        }
        if let Some(experiment_id) = &filter.experiment_id {
            sql.push_str(" AND experiment_id = ?");
            bindings.push(rusqlite::types::Value::Text(experiment_id.as_str().to_string()));
        }
        if filter.requires_heartbeat {
            sql.push_str(" AND last_heartbeat_at IS NOT NULL");
        }
        if let Some(before) = filter.heartbeat_before {
            sql.push_str(" AND last_heartbeat_at < ?");
            bindings.push(rusqlite::types::Value::Integer(before.as_unix_millis()));
        }
        sql.push_str(" ORDER BY created_at DESC, run_id");
        let mut statement = guard.prepare(&sql).map_err(db_err)?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(bindings), |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut runs = Vec::new();
        for raw in rows {
            let raw = raw.map_err(db_err)?;
            let run: Run = decode_json(&raw)?;
            if !filter.matches(&run) {
                continue;
            }
            runs.push(run);
            if let Some(limit) = filter.limit
                && runs.len() >= limit
            {
                break;
            }
        }
        Ok(runs)
    }

    fn append_audit(&self, event: AuditEvent) -> Result<AuditEntry, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, entry_hash FROM audit_entries ORDER BY seq DESC LIMIT 1",
                params![],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        let (seq, prev_hash) = head.map_or_else(
            || (0u64, GENESIS_PREV_HASH.to_string()),
            |(seq, hash)| (u64::try_from(seq).unwrap_or(0).saturating_add(1), hash),
        );
        let entry =
            chain_entry(&prev_hash, seq, event).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let record = encode_json(&entry)?;
        tx.execute(
            "INSERT INTO audit_entries (seq, prev_hash, entry_hash, record_json) VALUES (?1, ?2, \
             ?3, ?4)",
            params![
                i64::try_from(entry.seq).unwrap_or(i64::MAX),
                entry.prev_hash,
                entry.entry_hash,
                record,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn list_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT record_json FROM audit_entries ORDER BY seq")
            .map_err(db_err)?;
        let rows = statement.query_map(params![], |row| row.get::<_, String>(0)).map_err(db_err)?;
        let mut entries = Vec::new();
        for raw in rows {
            let raw = raw.map_err(db_err)?;
            entries.push(decode_json(&raw)?);
        }
        Ok(entries)
    }
}
