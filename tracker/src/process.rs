//! Process-baseline monitor.
//!
//! Snapshots the executables running when a session starts and reports
//! executables that appear afterwards, skipping well-known OS processes.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::probe::{run_bounded, ProbeError, RunningExecutable, SharedProbe, PROCESS_TIMEOUT};

/// OS and desktop-shell processes never attributed to a task.
///
/// Matched case-insensitively against the process name, with or without `.exe`.
pub const SYSTEM_PROCESSES: &[&str] = &[
    // Windows
    "applicationframehost",
    "audiodg",
    "conhost",
    "csrss",
    "ctfmon",
    "dllhost",
    "dwm",
    "explorer",
    "fontdrvhost",
    "lsass",
    "msmpeng",
    "registry",
    "runtimebroker",
    "searchhost",
    "searchindexer",
    "searchprotocolhost",
    "securityhealthservice",
    "services",
    "shellexperiencehost",
    "sihost",
    "smss",
    "spoolsv",
    "startmenuexperiencehost",
    "svchost",
    "system",
    "taskhostw",
    "textinputhost",
    "wininit",
    "winlogon",
    "wmiprvse",
    "wudfhost",
    // macOS
    "kernel_task",
    "launchd",
    "mdworker",
    "windowserver",
    // Linux
    "dbus-daemon",
    "kworker",
    "systemd",
    "xdg-desktop-portal",
];

/// Per-session process state.
#[derive(Debug)]
pub struct ProcessMonitor {
    baseline: Option<HashSet<String>>,
    denylist: HashSet<String>,
}

impl ProcessMonitor {
    /// Creates a monitor without a baseline.
    ///
    /// `extra_denylist` adds process names to [`SYSTEM_PROCESSES`].
    #[must_use]
    pub fn new(extra_denylist: &[String]) -> Self {
        let denylist = SYSTEM_PROCESSES
            .iter()
            .map(|name| normalize_name(name))
            .chain(extra_denylist.iter().map(|name| normalize_name(name)))
            .filter(|name| !name.is_empty())
            .collect();

        Self {
            baseline: None,
            denylist,
        }
    }

    /// Records `executables` as the baseline.
    #[must_use]
    pub fn with_baseline(mut self, executables: &[RunningExecutable]) -> Self {
        self.baseline = Some(executables.iter().map(|e| e.path.clone()).collect());
        self
    }

    /// Enumerates running processes and records them as the baseline.
    ///
    /// Bounded by [`PROCESS_TIMEOUT`]. On failure the first successful scan
    /// becomes the baseline instead.
    pub async fn capture(probe: &SharedProbe, extra_denylist: &[String]) -> Self {
        let monitor = Self::new(extra_denylist);
        match enumerate(probe).await {
            Ok(executables) => {
                debug!(executables = executables.len(), "Captured process baseline");
                monitor.with_baseline(&executables)
            }
            Err(e) => {
                warn!(error = %e, "Failed to capture process baseline");
                monitor
            }
        }
    }

    /// Returns true once a baseline has been recorded.
    #[must_use]
    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Returns true if the baseline contains `path`.
    #[must_use]
    pub fn in_baseline(&self, path: &str) -> bool {
        self.baseline.as_ref().is_some_and(|b| b.contains(path))
    }

    /// Returns true if `name` is a denylisted system process.
    #[must_use]
    pub fn is_denied(&self, name: &str) -> bool {
        self.denylist.contains(&normalize_name(name))
    }

    /// Returns the executables that are neither in the baseline nor denylisted.
    ///
    /// Without a baseline the listing seeds it and nothing is returned.
    pub fn filter(&mut self, executables: Vec<RunningExecutable>) -> Vec<String> {
        if self.baseline.is_none() {
            self.baseline = Some(executables.into_iter().map(|e| e.path).collect());
            return Vec::new();
        }

        executables
            .into_iter()
            .filter(|e| !self.in_baseline(&e.path))
            .filter(|e| {
                let denied = self.is_denied(&e.name) || self.is_denied(file_name(&e.path));
                if denied {
                    debug!(name = %e.name, "Skipping system process");
                }
                !denied
            })
            .map(|e| e.path)
            .collect()
    }

    /// Runs one scan tick and returns new executable paths.
    pub async fn scan(&mut self, probe: &SharedProbe) -> Vec<String> {
        match enumerate(probe).await {
            Ok(executables) => self.filter(executables),
            Err(e) => {
                debug!(error = %e, "Process enumeration failed");
                Vec::new()
            }
        }
    }
}

async fn enumerate(probe: &SharedProbe) -> Result<Vec<RunningExecutable>, ProbeError> {
    run_bounded(probe, PROCESS_TIMEOUT, |p| p.list_running_executables()).await
}

fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}
