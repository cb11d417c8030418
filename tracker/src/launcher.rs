//! Opening files with the user's default applications.
//!
//! [`resume_open`] reopens a task's files one after another with a fixed pause
//! between them so the desktop is not flooded with simultaneous launches. A
//! file that fails to open is logged and skipped.
//!
//! Only absolute paths without control characters are handed to the platform
//! handler. On Windows the shell is invoked through `ShellExecuteW`, so no
//! command interpreter ever parses the path.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::{require_task_id, require_token};
use crate::store::TaskStoreClient;

/// Errors that can occur opening a file.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The path was empty.
    #[error("empty path")]
    EmptyPath,

    /// The platform opener could not be started.
    #[error("failed to open {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The path is not something the opener accepts.
    #[error("cannot open {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Opening is refused for this path.
    #[error("refused to open {0}")]
    Refused(String),
}

/// Checks that `path` may be handed to a platform opener.
///
/// Accepts absolute POSIX paths, drive paths (`C:\x`) and UNC paths. Returns
/// the path with surrounding whitespace removed.
///
/// # Errors
///
/// Returns [`LaunchError::EmptyPath`] or [`LaunchError::InvalidPath`].
pub fn check_open_path(path: &str) -> Result<&str, LaunchError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(LaunchError::EmptyPath);
    }

    let invalid = |reason| LaunchError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.chars().any(char::is_control) {
        return Err(invalid("contains control characters"));
    }
    if !is_absolute(path) {
        return Err(invalid("not an absolute path"));
    }
    Ok(path)
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/');
    drive || path.starts_with("\\\\") || path.starts_with('/') || Path::new(path).is_absolute()
}

/// Opens a path with its default application.
pub trait Opener: Send + Sync + 'static {
    /// Starts opening `path` without waiting for the application to exit.
    fn open(&self, path: &str) -> Result<(), LaunchError>;
}

/// Shared, thread-safe opener handle.
pub type SharedOpener = Arc<dyn Opener>;

/// Opener that hands paths to the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn open(&self, path: &str) -> Result<(), LaunchError> {
        let path = check_open_path(path)?;
        shell_open(path).map_err(|source| LaunchError::Spawn {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(target_os = "windows")]
fn shell_open(path: &str) -> std::io::Result<()> {
    use windows_sys::Win32::UI::Shell::ShellExecuteW;
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    let wide = |s: &str| s.encode_utf16().chain(std::iter::once(0)).collect::<Vec<u16>>();
    let verb = wide("open");
    let file = wide(path);

    // SAFETY: both strings are NUL-terminated and outlive the call; null
    // parameters and directory are permitted.
    let result = unsafe {
        ShellExecuteW(
            0,
            verb.as_ptr(),
            file.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            SW_SHOWNORMAL,
        )
    };

    // Values above 32 mean success.
    if result > 32 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "windows"))]
fn shell_open(path: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    const OPENER: &str = "open";
    #[cfg(not(target_os = "macos"))]
    const OPENER: &str = "xdg-open";

    let mut child = std::process::Command::new(OPENER).arg(path).spawn()?;
    // Reap the launcher so it does not linger as a zombie.
    std::thread::spawn(move || child.wait());
    Ok(())
}

/// Outcome of a [`resume_open`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResumeReport {
    /// Paths handed to the opener successfully, in order.
    pub opened: Vec<String>,
    /// Paths that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Opens `files` in order, pausing `delay` between consecutive files.
///
/// Failures are not retried; the next file is opened regardless.
pub async fn resume_open(opener: &dyn Opener, files: &[String], delay: Duration) -> ResumeReport {
    let mut report = ResumeReport::default();

    for (index, path) in files.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match opener.open(path) {
            Ok(()) => {
                debug!(path = %path, "Opened file");
                report.opened.push(path.clone());
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to open file");
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    info!(
        opened = report.opened.len(),
        failed = report.failed.len(),
        "Resume finished"
    );
    report
}

/// Fetches the files tracked for `task_id` and opens them newest first.
///
/// # Errors
///
/// Returns [`TrackerError::Session`](crate::TrackerError::Session) for empty
/// arguments and [`TrackerError::Store`](crate::TrackerError::Store) if the
/// files cannot be fetched. Files that fail to open are only reported.
pub async fn resume_task(
    store: &TaskStoreClient,
    opener: &dyn Opener,
    task_id: &str,
    token: &str,
    delay: Duration,
) -> crate::Result<ResumeReport> {
    let task_id = require_task_id(task_id)?;
    let token = require_token(token)?;

    let resume = store.resume_files(task_id, token).await?;
    info!(task_id, title = %resume.title, files = resume.files.len(), "Resuming task");

    let paths: Vec<String> = resume.files.into_iter().map(|f| f.path).collect();
    Ok(resume_open(opener, &paths, delay).await)
}

/// Opener that records calls instead of launching anything.
///
/// Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingOpener {
    calls: Mutex<Vec<(String, Instant)>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes opening `path` fail.
    pub fn fail_on(&self, path: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }

    /// Paths passed to [`Opener::open`], in call order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Call times, in call order.
    #[must_use]
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

impl Opener for RecordingOpener {
    fn open(&self, path: &str) -> Result<(), LaunchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), Instant::now()));

        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.iter().any(|p| p == path) {
            return Err(LaunchError::Refused(path.to_string()));
        }
        Ok(())
    }
}
