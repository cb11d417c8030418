//! Native multi-file picker.
//!
//! The dialog is shown through a helper each desktop already ships: a
//! PowerShell `OpenFileDialog` on Windows, `osascript` on macOS and `zenity`
//! elsewhere. Cancelling the dialog is not an error; it yields no files. A
//! dialog left open longer than [`PICK_TIMEOUT`] is closed and reported as an
//! error.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::command::{output_within, CommandError};

/// How long the dialog may stay open.
pub const PICK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Errors that can occur showing the picker.
#[derive(Error, Debug)]
pub enum PickError {
    /// The dialog helper could not be started.
    #[error("failed to start {program}: {source}")]
    Unavailable {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The dialog was still open at [`PICK_TIMEOUT`].
    #[error("{program} was closed after {secs}s without a selection")]
    TimedOut { program: &'static str, secs: u64 },

    /// The dialog helper exited with an error.
    #[error("{program} failed: {message}")]
    Failed {
        program: &'static str,
        message: String,
    },

    /// The picker task panicked or was cancelled.
    #[error("picker task failed: {0}")]
    Task(String),
}

/// Lets the user choose files.
pub trait FilePicker: Send + Sync + 'static {
    /// Shows the dialog and blocks until the user confirms or cancels.
    fn pick_files(&self) -> Result<Vec<String>, PickError>;
}

/// Shared, thread-safe picker handle.
pub type SharedPicker = Arc<dyn FilePicker>;

/// Picker backed by the platform's native dialog.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPicker;

#[cfg(target_os = "windows")]
const PICKER: (&str, &[&str]) = (
    "powershell",
    &[
        "-NoProfile",
        "-STA",
        "-Command",
        "Add-Type -AssemblyName System.Windows.Forms; \
         $d = New-Object System.Windows.Forms.OpenFileDialog; \
         $d.Multiselect = $true; \
         if ($d.ShowDialog() -eq 'OK') { $d.FileNames -join \"`n\" }",
    ],
);

#[cfg(target_os = "macos")]
const PICKER: (&str, &[&str]) = (
    "osascript",
    &[
        "-e",
        "set picked to choose file with multiple selections allowed",
        "-e",
        "set out to \"\"",
        "-e",
        "repeat with f in picked",
        "-e",
        "set out to out & POSIX path of f & linefeed",
        "-e",
        "end repeat",
        "-e",
        "return out",
    ],
);

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PICKER: (&str, &[&str]) = (
    "zenity",
    &["--file-selection", "--multiple", "--separator=\n"],
);

impl FilePicker for SystemPicker {
    fn pick_files(&self) -> Result<Vec<String>, PickError> {
        let (program, args) = PICKER;
        let output = output_within(program, args, PICK_TIMEOUT).map_err(|e| match e {
            CommandError::TimedOut { .. } => PickError::TimedOut {
                program,
                secs: PICK_TIMEOUT.as_secs(),
            },
            CommandError::Spawn { source, .. } => PickError::Unavailable { program, source },
        })?;

        if !output.status.success() {
            // zenity and osascript both exit 1 when the user cancels.
            if output.status.code() == Some(1) {
                debug!(program, "File picker cancelled");
                return Ok(Vec::new());
            }
            return Err(PickError::Failed {
                program,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_selection(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_selection(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Picker that returns a preset selection.
///
/// Used by tests and headless runs.
#[derive(Debug, Default)]
pub struct FixedPicker {
    selection: Mutex<Vec<String>>,
}

impl FixedPicker {
    #[must_use]
    pub fn new<I, P>(selection: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            selection: Mutex::new(selection.into_iter().map(Into::into).collect()),
        }
    }

    /// Replaces the preset selection.
    pub fn set_selection<I, P>(&self, selection: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        *self.selection.lock().unwrap_or_else(PoisonError::into_inner) =
            selection.into_iter().map(Into::into).collect();
    }
}

impl FilePicker for FixedPicker {
    fn pick_files(&self) -> Result<Vec<String>, PickError> {
        Ok(self
            .selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
