//! ContextFlow Tracker - headless session tracking.
//!
//! # Commands
//!
//! - `contextflow-tracker watch --task <id>`: Track one task session until Ctrl+C
//! - `contextflow-tracker resume --task <id>`: Reopen a task's tracked files
//! - `contextflow-tracker probe`: Print what the OS probes currently see
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use contextflow_tracker::config::{auth_token_from_env, Config};
use contextflow_tracker::launcher::{resume_task, SystemOpener};
use contextflow_tracker::probe::{
    run_bounded, PlatformProbe, SharedProbe, SystemProbe, PROCESS_TIMEOUT, RECENT_LIST_TIMEOUT,
    WINDOW_TIMEOUT,
};
use contextflow_tracker::session::SessionTracker;
use contextflow_tracker::store::{RetryPolicy, TaskStoreClient};
use contextflow_tracker::types::TrackerEvent;
use contextflow_tracker::window::TitleMatcher;

/// Time allowed for queued track-file calls on shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// ContextFlow Tracker - attributes the files you open to a task.
#[derive(Parser, Debug)]
#[command(name = "contextflow-tracker")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    CONTEXTFLOW_BACKEND_URL          Task Store URL (default: http://localhost:3001)
    CONTEXTFLOW_AUTH_TOKEN           Bearer token when --token is not given
    CONTEXTFLOW_RECENT_DIR           Recent-items folder (default: Windows Recent)
    CONTEXTFLOW_RECENT_INTERVAL_MS   Recent-items scan interval (default: 2000)
    CONTEXTFLOW_WINDOW_INTERVAL_MS   Window scan interval (default: 2000)
    CONTEXTFLOW_PROCESS_INTERVAL_MS  Process scan interval (default: 4000)
    CONTEXTFLOW_RESUME_DELAY_MS      Delay between reopened files (default: 250)
    CONTEXTFLOW_TRACK_RETRY_LIMIT    Track-file attempts, 1-10 (default: 3)

EXAMPLES:
    # Track a task until Ctrl+C
    contextflow-tracker watch --task 64f0c2 --token $TOKEN

    # Reopen everything tracked for a task
    contextflow-tracker resume --task 64f0c2
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Track a task session until interrupted.
    Watch {
        /// Task id to attribute discovered files to.
        #[arg(short, long)]
        task: String,

        /// Task Store bearer token (falls back to CONTEXTFLOW_AUTH_TOKEN).
        #[arg(long)]
        token: Option<String>,
    },

    /// Reopen the files tracked for a task.
    Resume {
        /// Task id to resume.
        #[arg(short, long)]
        task: String,

        /// Task Store bearer token (falls back to CONTEXTFLOW_AUTH_TOKEN).
        #[arg(long)]
        token: Option<String>,
    },

    /// Print a one-shot snapshot of the OS probes.
    Probe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    init_logging();

    match cli.command {
        Command::Watch { task, token } => runtime.block_on(run_watch(task, token)),
        Command::Resume { task, token } => runtime.block_on(run_resume(task, token)),
        Command::Probe => runtime.block_on(run_probe()),
    }
}

fn resolve_token(token: Option<String>) -> Result<String> {
    match token {
        Some(token) => Ok(token),
        None => auth_token_from_env().context("No --token given"),
    }
}

fn system_probe(config: &Config) -> SharedProbe {
    Arc::new(SystemProbe::new(config.recent_dir.clone()))
}

/// Runs one tracking session until a shutdown signal arrives.
async fn run_watch(task: String, token: Option<String>) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let token = resolve_token(token)?;

    info!(
        backend_url = %config.backend_url,
        recent_dir = ?config.recent_dir,
        retry_limit = config.retry_limit,
        "Configuration loaded"
    );

    let tracker =
        SessionTracker::from_config(&config, system_probe(&config)).context("Failed to create session tracker")?;
    let mut events = tracker.subscribe();

    tracker
        .start(&task, &token)
        .await
        .context("Failed to start session")?;

    info!(task_id = %task, "Tracking. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }

            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let unsent = tracker
        .shutdown(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS))
        .await;
    if unsent > 0 {
        error!(unsent, "Some files could not be sent to the Task Store");
    }

    info!("Tracker stopped");
    Ok(())
}

fn log_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::FileDiscovered(discovered) => info!(
            task_id = %discovered.task_id,
            path = %discovered.path,
            source = %discovered.source,
            "Discovered"
        ),
        TrackerEvent::FileTracked { task_id, path } => info!(task_id = %task_id, path = %path, "Tracked"),
        TrackerEvent::TrackFailed { task_id, path, error } => {
            warn!(task_id = %task_id, path = %path, error = %error, "Track failed")
        }
    }
}

/// Fetches a task's files from the Task Store and reopens them.
async fn run_resume(task: String, token: Option<String>) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let token = resolve_token(token)?;

    let store = TaskStoreClient::new(&config.backend_url, RetryPolicy::with_attempts(config.retry_limit))
        .context("Failed to create Task Store client")?;
    let report = resume_task(&store, &SystemOpener, &task, &token, config.resume_delay)
        .await
        .context("Failed to resume task")?;

    for (path, error) in &report.failed {
        eprintln!("Could not open {}: {}", path, error);
    }
    println!(
        "Opened {} of {} files",
        report.opened.len(),
        report.opened.len() + report.failed.len()
    );
    Ok(())
}

/// Prints what each probe reports right now.
async fn run_probe() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let probe = system_probe(&config);

    match &config.recent_dir {
        Some(dir) => println!("Recent folder:   {}", dir.display()),
        None => println!("Recent folder:   (none on this platform)"),
    }

    match run_bounded(&probe, RECENT_LIST_TIMEOUT, |p: &dyn PlatformProbe| p.list_recent_shortcuts()).await {
        Ok(shortcuts) => println!("Shortcuts:       {}", shortcuts.len()),
        Err(e) => println!("Shortcuts:       error: {}", e),
    }

    match run_bounded(&probe, WINDOW_TIMEOUT, |p: &dyn PlatformProbe| p.foreground_window()).await {
        Ok(Some(window)) => {
            println!("Focused window:  {}", window.title);
            println!("  process:       {}", window.process_name.as_deref().unwrap_or("unknown"));
            let matcher = TitleMatcher::new(&config.extra_title_suffixes);
            for path in matcher.candidates(&window.title) {
                println!("  path:          {}", path);
            }
        }
        Ok(None) => println!("Focused window:  none"),
        Err(e) => println!("Focused window:  error: {}", e),
    }

    match run_bounded(&probe, PROCESS_TIMEOUT, |p: &dyn PlatformProbe| p.list_running_executables()).await {
        Ok(executables) => println!("Executables:     {}", executables.len()),
        Err(e) => println!("Executables:     error: {}", e),
    }

    Ok(())
}

/// Initializes the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
