// crates/marshal-cli/src/main.rs
// ============================================================================
// Module: Run Marshal CLI Entry Point
// Description: Command dispatcher for serving and validating configuration.
// Purpose: Wire config, store, publisher, lifecycle, monitor, and server.
// Dependencies: clap, marshal-config, marshal-core, marshal-events,
//               marshal-http, marshal-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! The `marshal` binary starts the orchestrator control plane (`serve`) or
//! validates a configuration file (`check-config`). Process lifecycle on
//! serve: build the store, start the health monitor, serve HTTP until
//! ctrl-c, then stop the listener first (draining in-flight requests) and
//! the background monitor second.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use marshal_config::EventsKind;
use marshal_config::MarshalConfig;
use marshal_config::StoreKind;
use marshal_core::core::time::SystemClock;
use marshal_core::interfaces::SharedEventPublisher;
use marshal_core::interfaces::SharedRunStore;
use marshal_core::runtime::HealthConfig;
use marshal_core::runtime::HealthMonitor;
use marshal_core::runtime::Lifecycle;
use marshal_core::runtime::LifecycleConfig;
use marshal_events::LogPublisher;
use marshal_events::NoopPublisher;
use marshal_http::AppState;
use marshal_http::ServerLimits;
use marshal_store_sqlite::SqliteRunStore;
use marshal_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "marshal", version, about = "Run orchestration control plane", arg_required_else_help = true)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the orchestrator control plane.
    Serve,
    /// Validate the configuration file and print a summary.
    CheckConfig,
}

/// CLI execution errors.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error("{0}")]
    Config(#[from] marshal_config::ConfigError),
    /// Store construction failed.
    #[error("store init failed: {0}")]
    Store(String),
    /// Event publisher construction failed.
    #[error("events init failed: {0}")]
    Events(String),
    /// Serve configuration is incomplete.
    #[error("{0}")]
    Serve(String),
    /// HTTP server failed.
    #[error("{0}")]
    Http(#[from] marshal_http::ServerError),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr();
            let _ = writeln!(stderr, "marshal: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed CLI to its command handler.
fn dispatch(cli: &Cli) -> Result<(), CliError> {
    let config = MarshalConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Serve => run_serve(config),
        Command::CheckConfig => run_check_config(&config),
    }
}

// ============================================================================
// SECTION: Check Config
// ============================================================================

/// Validates configuration and prints a short summary.
fn run_check_config(config: &MarshalConfig) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    let bind = config.server.bind.as_deref().unwrap_or("(unset)");
    let store = match config.store.kind {
        StoreKind::Memory => "memory".to_string(),
        StoreKind::Sqlite => format!(
            "sqlite ({})",
            config.store.path.as_deref().map_or_else(String::new, |p| p.display().to_string())
        ),
    };
    let events = match config.events.kind {
        EventsKind::Noop => "noop",
        EventsKind::Stderr => "stderr",
        EventsKind::File => "file",
    };
    let _ = writeln!(stdout, "config ok");
    let _ = writeln!(stdout, "  server.bind            = {bind}");
    let _ = writeln!(stdout, "  store                  = {store}");
    let _ = writeln!(stdout, "  events                 = {events}");
    let _ = writeln!(stdout, "  health.scan_interval   = {}ms", config.health.scan_interval_ms);
    let _ = writeln!(stdout, "  health.stale_after     = {}ms", config.health.stale_after_ms);
    let _ =
        writeln!(stdout, "  health.unresponsive    = {}ms", config.health.unresponsive_after_ms);
    let _ = writeln!(stdout, "  health.auto_terminate  = {}", config.health.auto_terminate);
    Ok(())
}

// ============================================================================
// SECTION: Serve
// ============================================================================

/// Builds the run store from configuration.
fn build_store(config: &MarshalConfig) -> Result<SharedRunStore, CliError> {
    match config.store.kind {
        StoreKind::Memory => {
            Ok(SharedRunStore::from_store(marshal_core::runtime::InMemoryRunStore::new()))
        }
        StoreKind::Sqlite => {
            let path = config
                .store
                .path
                .clone()
                .ok_or_else(|| CliError::Store("sqlite store requires store.path".to_string()))?;
            let store = SqliteRunStore::new(SqliteStoreConfig {
                path,
                busy_timeout_ms: config.store.busy_timeout_ms.unwrap_or(5_000),
                journal_mode: config.store.journal_mode,
                sync_mode: config.store.sync_mode,
            })
            .map_err(|err| CliError::Store(err.to_string()))?;
            Ok(SharedRunStore::from_store(store))
        }
    }
}

/// Builds the event publisher from configuration.
fn build_publisher(config: &MarshalConfig) -> Result<SharedEventPublisher, CliError> {
    match config.events.kind {
        EventsKind::Noop => Ok(SharedEventPublisher::from_publisher(NoopPublisher)),
        EventsKind::Stderr => Ok(SharedEventPublisher::from_publisher(LogPublisher::new(
            io::stderr(),
            config.events.subject_prefix.clone(),
        ))),
        EventsKind::File => {
            let path = config
                .events
                .path
                .clone()
                .ok_or_else(|| CliError::Events("file events require events.path".to_string()))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| CliError::Events(err.to_string()))?;
            Ok(SharedEventPublisher::from_publisher(LogPublisher::new(
                file,
                config.events.subject_prefix.clone(),
            )))
        }
    }
}

/// Starts the control plane and serves until ctrl-c.
fn run_serve(config: MarshalConfig) -> Result<(), CliError> {
    let bind = config
        .server
        .bind
        .as_deref()
        .ok_or_else(|| CliError::Serve("server.bind is required for serve".to_string()))?;
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| CliError::Serve(format!("server.bind is not a socket address: {bind}")))?;
    let store = build_store(&config)?;
    let publisher = build_publisher(&config)?;
    let lifecycle = Lifecycle::new(
        store,
        publisher,
        Arc::new(SystemClock),
        LifecycleConfig {
            start_trigger: config.lifecycle.start_trigger,
            ..LifecycleConfig::default()
        },
    );
    let monitor = HealthMonitor::new(
        lifecycle.clone(),
        HealthConfig {
            scan_interval_ms: config.health.scan_interval_ms,
            stale_after_ms: config.health.stale_after_ms,
            unresponsive_after_ms: config.health.unresponsive_after_ms,
            auto_terminate: config.health.auto_terminate,
        },
    );
    let limits = ServerLimits {
        max_body_bytes: config.server.max_body_bytes,
        request_timeout_ms: config.server.request_timeout_ms,
        heartbeat_min_interval_ms: config.server.heartbeat_throttle.min_interval_ms,
        heartbeat_throttle_entries: config.server.heartbeat_throttle.max_entries,
    };
    let state = AppState::new(lifecycle, limits);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Serve(format!("runtime init failed: {err}")))?;
    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));
        let serve_result = marshal_http::serve(addr, state, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
        // Listener is down and drained; stop background tasks second.
        let _ = shutdown_tx.send(true);
        let _ = monitor_handle.await;
        serve_result.map_err(CliError::from)
    })
}
