//! In-memory probe for tests and demos.
//!
//! [`ScriptedProbe`] answers every [`PlatformProbe`] query from state the caller
//! sets up front and mutates between scans. It also counts queries so tests can
//! assert on scanner behaviour.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::{ForegroundWindow, PlatformProbe, ProbeError, RunningExecutable, ShortcutEntry};
use crate::shortcut::ShortcutError;

/// Number of times each probe method was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCalls {
    pub recent: usize,
    pub resolve: usize,
    pub window: usize,
    pub process: usize,
}

#[derive(Default)]
struct State {
    shortcuts: Vec<ShortcutEntry>,
    targets: HashMap<PathBuf, String>,
    window: Option<ForegroundWindow>,
    executables: Vec<RunningExecutable>,
    resolve_delay: Option<Duration>,
    fail_recent: bool,
    fail_window: bool,
    fail_processes: bool,
    calls: ProbeCalls,
}

/// A probe whose answers are scripted by the caller.
#[derive(Default)]
pub struct ScriptedProbe {
    state: Mutex<State>,
}

impl ScriptedProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a shortcut (or replaces one with the same name).
    ///
    /// `target` of `None` makes resolution fail for this shortcut.
    pub fn add_shortcut(&self, name: &str, modified: SystemTime, target: Option<&str>) {
        let path = PathBuf::from(name);
        let mut state = self.state();
        state.shortcuts.retain(|s| s.name != name);
        state.shortcuts.push(ShortcutEntry {
            name: name.to_string(),
            path: path.clone(),
            modified,
        });
        match target {
            Some(target) => {
                state.targets.insert(path, target.to_string());
            }
            None => {
                state.targets.remove(&path);
            }
        }
    }

    /// Updates the modification time of an existing shortcut.
    pub fn touch_shortcut(&self, name: &str, modified: SystemTime) {
        let mut state = self.state();
        if let Some(entry) = state.shortcuts.iter_mut().find(|s| s.name == name) {
            entry.modified = modified;
        }
    }

    /// Removes a shortcut from the listing.
    pub fn remove_shortcut(&self, name: &str) {
        self.state().shortcuts.retain(|s| s.name != name);
    }

    /// Sets the focused window.
    pub fn set_window(&self, title: &str, process_name: Option<&str>) {
        self.state().window = Some(ForegroundWindow {
            title: title.to_string(),
            process_name: process_name.map(str::to_string),
        });
    }

    /// Reports that no window has focus.
    pub fn clear_window(&self) {
        self.state().window = None;
    }

    /// Replaces the running-process table.
    pub fn set_executables<I, P>(&self, executables: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.state().executables = executables
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                let name = path
                    .rsplit(['\\', '/'])
                    .next()
                    .unwrap_or(path)
                    .to_string();
                RunningExecutable::new(path, name)
            })
            .collect();
    }

    /// Delays every shortcut resolution by `delay`.
    pub fn set_resolve_delay(&self, delay: Duration) {
        self.state().resolve_delay = Some(delay);
    }

    /// Makes recent-folder listing fail.
    pub fn fail_recent(&self, fail: bool) {
        self.state().fail_recent = fail;
    }

    /// Makes foreground-window queries fail.
    pub fn fail_window(&self, fail: bool) {
        self.state().fail_window = fail;
    }

    /// Makes process enumeration fail.
    pub fn fail_processes(&self, fail: bool) {
        self.state().fail_processes = fail;
    }

    /// Returns how often each probe method has been called.
    #[must_use]
    pub fn calls(&self) -> ProbeCalls {
        self.state().calls
    }
}

fn scripted_failure(command: &str) -> ProbeError {
    ProbeError::Command {
        command: command.to_string(),
        message: "scripted failure".to_string(),
    }
}

impl PlatformProbe for ScriptedProbe {
    fn list_recent_shortcuts(&self) -> Result<Vec<ShortcutEntry>, ProbeError> {
        let mut state = self.state();
        state.calls.recent += 1;
        if state.fail_recent {
            return Err(scripted_failure("list-recent"));
        }
        Ok(state.shortcuts.clone())
    }

    fn resolve_shortcut(&self, shortcut: &Path) -> Result<String, ProbeError> {
        let (delay, target) = {
            let mut state = self.state();
            state.calls.resolve += 1;
            (state.resolve_delay, state.targets.get(shortcut).cloned())
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        target.ok_or(ProbeError::Shortcut(ShortcutError::NoTarget))
    }

    fn foreground_window(&self) -> Result<Option<ForegroundWindow>, ProbeError> {
        let mut state = self.state();
        state.calls.window += 1;
        if state.fail_window {
            return Err(scripted_failure("foreground-window"));
        }
        Ok(state.window.clone())
    }

    fn list_running_executables(&self) -> Result<Vec<RunningExecutable>, ProbeError> {
        let mut state = self.state();
        state.calls.process += 1;
        if state.fail_processes {
            return Err(scripted_failure("list-processes"));
        }
        Ok(state.executables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_shortcuts_resolve_to_targets() {
        let probe = ScriptedProbe::new();
        probe.add_shortcut("a.lnk", SystemTime::UNIX_EPOCH, Some("C:\\a.txt"));
        probe.add_shortcut("broken.lnk", SystemTime::UNIX_EPOCH, None);

        let listed = probe.list_recent_shortcuts().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(probe.resolve_shortcut(Path::new("a.lnk")).unwrap(), "C:\\a.txt");
        assert!(probe.resolve_shortcut(Path::new("broken.lnk")).is_err());
        assert_eq!(probe.calls().recent, 1);
        assert_eq!(probe.calls().resolve, 2);
    }

    #[test]
    fn touch_updates_modification_time() {
        let probe = ScriptedProbe::new();
        probe.add_shortcut("a.lnk", SystemTime::UNIX_EPOCH, Some("C:\\a.txt"));
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        probe.touch_shortcut("a.lnk", later);

        assert_eq!(probe.list_recent_shortcuts().unwrap()[0].modified, later);
    }

    #[test]
    fn executables_derive_names_from_paths() {
        let probe = ScriptedProbe::new();
        probe.set_executables(["C:\\Tools\\foo.exe", "/usr/bin/vim"]);

        let names: Vec<String> = probe
            .list_running_executables()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["foo.exe", "vim"]);
    }

    #[test]
    fn failures_are_reported_and_counted() {
        let probe = ScriptedProbe::new();
        probe.fail_window(true);

        assert!(probe.foreground_window().is_err());
        assert_eq!(probe.calls().window, 1);

        probe.fail_window(false);
        assert!(probe.foreground_window().unwrap().is_none());
    }
}
