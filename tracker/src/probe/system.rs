//! Probe backed by the running operating system.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};
use tracing::trace;

use super::foreground;
use super::{ForegroundWindow, PlatformProbe, ProbeError, RunningExecutable, ShortcutEntry};
use crate::shortcut::is_shortcut;

/// Probe that reads the real recent-items folder, process table and focused window.
pub struct SystemProbe {
    recent_dir: Option<PathBuf>,
    system: Mutex<System>,
}

impl SystemProbe {
    /// Creates a probe watching `recent_dir` for shortcut files.
    ///
    /// With `None` the recent-items signal is silent (platforms without a
    /// shortcut-based recent folder).
    #[must_use]
    pub fn new(recent_dir: Option<PathBuf>) -> Self {
        Self {
            recent_dir,
            system: Mutex::new(System::new()),
        }
    }

    /// Returns the folder this probe lists.
    #[must_use]
    pub fn recent_dir(&self) -> Option<&PathBuf> {
        self.recent_dir.as_ref()
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(pid);
        system.refresh_process(pid);
        system.process(pid).map(|process| process.name().to_string())
    }
}

impl PlatformProbe for SystemProbe {
    fn list_recent_shortcuts(&self) -> Result<Vec<ShortcutEntry>, ProbeError> {
        let Some(dir) = &self.recent_dir else {
            return Ok(Vec::new());
        };

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(dir = %dir.display(), "Recent folder does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut shortcuts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !is_shortcut(&path) {
                continue;
            }
            // Entries can vanish between listing and stat.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            shortcuts.push(ShortcutEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                modified: metadata.modified()?,
            });
        }

        Ok(shortcuts)
    }

    fn foreground_window(&self) -> Result<Option<ForegroundWindow>, ProbeError> {
        let Some(raw) = foreground::query()? else {
            return Ok(None);
        };

        let process_name = raw
            .process_name
            .or_else(|| raw.pid.and_then(|pid| self.process_name(pid)));

        Ok(Some(ForegroundWindow {
            title: raw.title,
            process_name,
        }))
    }

    fn list_running_executables(&self) -> Result<Vec<RunningExecutable>, ProbeError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let mut seen = HashSet::new();
        let executables = system
            .processes()
            .values()
            .filter_map(|process| {
                let path = process.exe()?.to_string_lossy().into_owned();
                if path.is_empty() || !seen.insert(path.clone()) {
                    return None;
                }
                Some(RunningExecutable::new(path, process.name()))
            })
            .collect();

        Ok(executables)
    }
}
