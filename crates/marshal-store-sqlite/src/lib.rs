// crates/marshal-store-sqlite/src/lib.rs
// ============================================================================
// Module: Run Marshal SQLite Store Library
// Description: Durable RunStore implementation backed by SQLite.
// Purpose: Persist runs, transitions, commands, and audit entries across
//          restarts.
// Dependencies: marshal-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides the production [`marshal_core::RunStore`]
//! implementation. Runs, transitions, commands, and hash-chained audit
//! entries live in relational tables with the secondary indexes the health
//! monitor and dashboard queries need. Loads fail closed on corrupt rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteRunStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
