//! ContextFlow IPC - Main entry point.
//!
//! This binary starts the local bridge the desktop UI talks to:
//! - Structured JSON logging
//! - Loopback-only listener guarded by a shared token
//! - Graceful shutdown that ends every session and drains queued track calls
//!
//! # Configuration
//!
//! See [`contextflow_ipc::config`] for environment variable configuration.
//!
//! # Handshake
//!
//! Once listening, the server prints one JSON line to stdout for the desktop
//! shell that spawned it: `{"event":"ready","port":17321,"token":"..."}`. The
//! token is generated unless `CONTEXTFLOW_IPC_TOKEN` is set. It never goes to
//! the log.
//!
//! # Example
//!
//! ```bash
//! CONTEXTFLOW_BACKEND_URL=http://localhost:3001 \
//! CONTEXTFLOW_IPC_PORT=17321 \
//! cargo run --bin contextflow-ipc
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use contextflow_ipc::auth::generate_token;
use contextflow_ipc::config::Config;
use contextflow_ipc::routes::{create_router, AppState};
use contextflow_tracker::probe::SystemProbe;
use contextflow_tracker::session::SessionTracker;

/// Time allowed for queued track-file calls after the listener closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  CONTEXTFLOW_IPC_PORT        - Loopback port (default: 17321)");
            eprintln!("  CONTEXTFLOW_IPC_TOKEN       - Shared request token, 16+ chars (default: generated)");
            eprintln!("  CONTEXTFLOW_IPC_ORIGINS     - Allowed UI origins (default: http://localhost:3000)");
            eprintln!("  CONTEXTFLOW_BACKEND_URL     - Task Store URL (default: http://localhost:3001)");
            eprintln!("  CONTEXTFLOW_BUFFER_SIZE     - Event and track queue capacity (default: 1000)");
            eprintln!("  CONTEXTFLOW_TRACK_RETRY_LIMIT - Track-file attempts, 1-10 (default: 3)");
            eprintln!("  RUST_LOG                    - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        backend_url = %config.tracker.backend_url,
        recent_dir = ?config.tracker.recent_dir,
        retry_limit = config.tracker.retry_limit,
        allowed_origins = ?config.allowed_origins,
        generated_token = config.api_token.is_none(),
        "ContextFlow IPC starting"
    );

    let probe = Arc::new(SystemProbe::new(config.tracker.recent_dir.clone()));
    let tracker = match SessionTracker::from_config(&config.tracker, probe) {
        Ok(tracker) => Arc::new(tracker),
        Err(err) => {
            error!(error = %err, "Failed to create session tracker");
            return ExitCode::from(1);
        }
    };

    let api_token = config.api_token.clone().unwrap_or_else(generate_token);
    let state = AppState::with_components(
        Arc::clone(&tracker),
        Arc::new(contextflow_tracker::SystemOpener),
        Arc::new(contextflow_tracker::SystemPicker),
        api_token.as_str(),
    )
    .with_allowed_origins(config.allowed_origins.clone());
    let app = create_router(state);

    let bind_addr = config.bind_addr();
    let listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => {
            info!(address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let port = listener.local_addr().map_or(bind_addr.port(), |addr| addr.port());
    println!(
        "{}",
        serde_json::json!({ "event": "ready", "port": port, "token": api_token })
    );

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");

    let unsent = tracker.shutdown(DRAIN_TIMEOUT).await;
    if unsent > 0 {
        warn!(unsent, "Track-file calls abandoned at shutdown");
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    // stdout carries only the ready line.
    let json_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
