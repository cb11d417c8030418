//! OS probes behind a small, testable interface.
//!
//! Every OS-level signal the session scanners consume goes through the
//! [`PlatformProbe`] trait:
//!
//! - [`PlatformProbe::list_recent_shortcuts`]: shortcut files in the recent-items folder
//! - [`PlatformProbe::resolve_shortcut`]: shortcut file to target path
//! - [`PlatformProbe::foreground_window`]: title and owning process of the focused window
//! - [`PlatformProbe::list_running_executables`]: executable paths of running processes
//!
//! Probe methods are synchronous and may block (file I/O, subprocesses, OS
//! calls). Callers never invoke them directly from async code; they go through
//! [`run_bounded`], which runs the call on the blocking pool and gives up after
//! a timeout. A timed-out call is reported as [`ProbeError::Timeout`] and the
//! blocking work is left to finish on its own.
//!
//! Implementations:
//!
//! - [`SystemProbe`]: the real OS (recent folder via the filesystem, processes
//!   via `sysinfo`, focused window via the platform API or helper tool)
//! - [`ScriptedProbe`]: an in-memory probe driven by tests and demos

mod foreground;
pub mod scripted;
pub mod system;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::shortcut::{read_shortcut_target, ShortcutError};

pub use scripted::{ProbeCalls, ScriptedProbe};
pub use system::SystemProbe;

/// Timeout for a single foreground-window query.
pub const WINDOW_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for a running-process enumeration (also bounds the session-start snapshot).
pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for listing the recent-items folder.
pub const RECENT_LIST_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur while probing the OS.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The probe did not answer within its time budget.
    #[error("probe timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A shortcut could not be resolved.
    #[error("shortcut error: {0}")]
    Shortcut(#[from] ShortcutError),

    /// A helper command failed or produced unusable output.
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// The blocking task running the probe panicked or was cancelled.
    #[error("probe task failed: {0}")]
    Task(String),

    /// The probe is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

/// A shortcut file in the recent-items folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutEntry {
    /// File name, used as the baseline key.
    pub name: String,
    /// Full path of the shortcut file.
    pub path: PathBuf,
    /// Last modification time of the shortcut file.
    pub modified: SystemTime,
}

/// The currently focused window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    /// Window title text.
    pub title: String,
    /// Name of the owning process, when it could be determined.
    pub process_name: Option<String>,
}

/// A running process's executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunningExecutable {
    /// Absolute executable path.
    pub path: String,
    /// Process name as reported by the OS.
    pub name: String,
}

impl RunningExecutable {
    #[must_use]
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// OS-level data sources consumed by the session scanners.
pub trait PlatformProbe: Send + Sync + 'static {
    /// Lists shortcut files in the recent-items folder.
    ///
    /// A missing folder yields an empty list, not an error.
    fn list_recent_shortcuts(&self) -> Result<Vec<ShortcutEntry>, ProbeError>;

    /// Resolves a shortcut file to its target path.
    fn resolve_shortcut(&self, shortcut: &Path) -> Result<String, ProbeError> {
        Ok(read_shortcut_target(shortcut)?)
    }

    /// Returns the focused window, or `None` if no window has focus.
    fn foreground_window(&self) -> Result<Option<ForegroundWindow>, ProbeError>;

    /// Lists the executables of all running processes.
    fn list_running_executables(&self) -> Result<Vec<RunningExecutable>, ProbeError>;
}

/// Shared, thread-safe probe handle.
pub type SharedProbe = Arc<dyn PlatformProbe>;

/// Runs a probe call on the blocking pool, giving up after `timeout`.
///
/// # Errors
///
/// Returns the probe's own error, [`ProbeError::Timeout`] if it does not finish
/// in time, or [`ProbeError::Task`] if the blocking task panicked.
pub async fn run_bounded<T, F>(probe: &SharedProbe, timeout: Duration, call: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PlatformProbe) -> Result<T, ProbeError> + Send + 'static,
{
    let probe = Arc::clone(probe);
    let task = tokio::task::spawn_blocking(move || call(probe.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ProbeError::Task(join_err.to_string())),
        Err(_) => Err(ProbeError::Timeout {
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
