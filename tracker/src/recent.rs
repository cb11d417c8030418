//! Recent-items scanner.
//!
//! Tracks the shortcut files in the OS recent-items folder. The first
//! successful listing becomes the baseline (name → modification time); later
//! listings classify each shortcut as new, re-touched or unchanged, and the
//! targets of new and re-touched shortcuts become candidate paths.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::probe::{run_bounded, ProbeError, SharedProbe, ShortcutEntry, RECENT_LIST_TIMEOUT};
use crate::shortcut::RESOLVE_TIMEOUT;

/// How a shortcut differs from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutChange {
    /// The name was not in the baseline.
    New,
    /// The name was in the baseline with an older modification time.
    Modified,
}

/// Per-session recent-items state.
#[derive(Debug, Default)]
pub struct RecentScanner {
    baseline: Option<HashMap<String, SystemTime>>,
}

impl RecentScanner {
    /// Creates a scanner with no baseline yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scanner whose baseline is `entries`.
    #[must_use]
    pub fn with_baseline(entries: &[ShortcutEntry]) -> Self {
        Self {
            baseline: Some(
                entries
                    .iter()
                    .map(|entry| (entry.name.clone(), entry.modified))
                    .collect(),
            ),
        }
    }

    /// Lists the folder and records the result as the baseline.
    ///
    /// A failed listing leaves the scanner without a baseline; the next
    /// successful scan then seeds it instead of reporting changes.
    pub async fn capture(probe: &SharedProbe) -> Self {
        match list(probe).await {
            Ok(entries) => {
                debug!(shortcuts = entries.len(), "Captured recent-items baseline");
                Self::with_baseline(&entries)
            }
            Err(e) => {
                warn!(error = %e, "Failed to capture recent-items baseline");
                Self::new()
            }
        }
    }

    /// Returns true once a baseline has been recorded.
    #[must_use]
    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Number of shortcuts known to the baseline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.baseline.as_ref().map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classifies a listing against the baseline and updates it.
    ///
    /// Baseline timestamps are updated as soon as a shortcut is classified, so
    /// each touch is reported once. Without a baseline the listing seeds it
    /// and nothing is reported.
    pub fn classify(&mut self, entries: Vec<ShortcutEntry>) -> Vec<(ShortcutEntry, ShortcutChange)> {
        let Some(baseline) = self.baseline.as_mut() else {
            *self = Self::with_baseline(&entries);
            return Vec::new();
        };

        let mut changes = Vec::new();
        for entry in entries {
            let change = match baseline.get(&entry.name) {
                None => Some(ShortcutChange::New),
                Some(known) if entry.modified > *known => Some(ShortcutChange::Modified),
                Some(_) => None,
            };

            if let Some(change) = change {
                baseline.insert(entry.name.clone(), entry.modified);
                changes.push((entry, change));
            }
        }

        changes
    }

    /// Runs one scan tick and returns the resolved target paths.
    ///
    /// Listing failures and unresolvable shortcuts yield no candidates.
    pub async fn scan(&mut self, probe: &SharedProbe) -> Vec<String> {
        let entries = match list(probe).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Recent-items listing failed");
                return Vec::new();
            }
        };

        let mut targets = Vec::new();
        for (entry, change) in self.classify(entries) {
            let shortcut = entry.path.clone();
            match run_bounded(probe, RESOLVE_TIMEOUT, move |p| p.resolve_shortcut(&shortcut)).await {
                Ok(target) if !target.is_empty() => {
                    debug!(shortcut = %entry.name, ?change, target = %target, "Resolved recent shortcut");
                    targets.push(target);
                }
                Ok(_) => debug!(shortcut = %entry.name, "Shortcut has an empty target"),
                Err(e) => debug!(shortcut = %entry.name, error = %e, "Shortcut unresolved"),
            }
        }

        targets
    }
}

async fn list(probe: &SharedProbe) -> Result<Vec<ShortcutEntry>, ProbeError> {
    run_bounded(probe, RECENT_LIST_TIMEOUT, |p| p.list_recent_shortcuts()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ScriptedProbe;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn entry(name: &str, modified: SystemTime) -> ShortcutEntry {
        ShortcutEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            modified,
        }
    }

    #[test]
    fn unchanged_shortcuts_are_ignored() {
        let mut scanner = RecentScanner::with_baseline(&[entry("report.lnk", at(10))]);
        assert!(scanner.classify(vec![entry("report.lnk", at(10))]).is_empty());
    }

    #[test]
    fn newer_mtime_is_modified_once() {
        let mut scanner = RecentScanner::with_baseline(&[entry("report.lnk", at(10))]);

        let changes = scanner.classify(vec![entry("report.lnk", at(20))]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, ShortcutChange::Modified);

        assert!(scanner.classify(vec![entry("report.lnk", at(20))]).is_empty());
    }

    #[test]
    fn unseen_name_is_new() {
        let mut scanner = RecentScanner::with_baseline(&[]);
        let changes = scanner.classify(vec![entry("fresh.lnk", at(5))]);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.name, "fresh.lnk");
        assert_eq!(changes[0].1, ShortcutChange::New);
        assert_eq!(scanner.len(), 1);
    }

    #[test]
    fn older_mtime_is_ignored() {
        let mut scanner = RecentScanner::with_baseline(&[entry("report.lnk", at(10))]);
        assert!(scanner.classify(vec![entry("report.lnk", at(5))]).is_empty());
    }

    #[test]
    fn first_listing_without_baseline_seeds_it() {
        let mut scanner = RecentScanner::new();
        assert!(!scanner.has_baseline());

        assert!(scanner.classify(vec![entry("a.lnk", at(1))]).is_empty());
        assert!(scanner.has_baseline());
        assert_eq!(scanner.classify(vec![entry("b.lnk", at(1))]).len(), 1);
    }

    #[tokio::test]
    async fn scan_resolves_modified_shortcut() {
        let scripted = Arc::new(ScriptedProbe::new());
        scripted.add_shortcut("report.lnk", at(10), Some("C:\\docs\\report.docx"));
        let probe: SharedProbe = scripted.clone();

        let mut scanner = RecentScanner::capture(&probe).await;
        assert!(scanner.scan(&probe).await.is_empty());

        scripted.touch_shortcut("report.lnk", at(20));
        assert_eq!(scanner.scan(&probe).await, vec!["C:\\docs\\report.docx"]);
        assert!(scanner.scan(&probe).await.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_shortcut_is_skipped() {
        let probe = ScriptedProbe::new();
        probe.add_shortcut("broken.lnk", at(1), None);
        probe.add_shortcut("good.lnk", at(1), Some("C:\\good.txt"));
        let probe: SharedProbe = Arc::new(probe);

        let mut scanner = RecentScanner::with_baseline(&[]);
        assert_eq!(scanner.scan(&probe).await, vec!["C:\\good.txt"]);
    }

    #[tokio::test]
    async fn slow_resolution_times_out_without_stalling() {
        let probe = ScriptedProbe::new();
        probe.set_resolve_delay(RESOLVE_TIMEOUT + Duration::from_secs(1));
        probe.add_shortcut("slow.lnk", at(1), Some("C:\\slow.txt"));
        let probe: SharedProbe = Arc::new(probe);

        let mut scanner = RecentScanner::with_baseline(&[]);
        let started = std::time::Instant::now();
        let targets = scanner.scan(&probe).await;

        assert!(targets.is_empty());
        assert!(started.elapsed() < RESOLVE_TIMEOUT + Duration::from_millis(900));
    }

    #[tokio::test]
    async fn listing_failure_yields_no_candidates() {
        let probe = ScriptedProbe::new();
        probe.fail_recent(true);
        let probe: SharedProbe = Arc::new(probe);

        let mut scanner = RecentScanner::capture(&probe).await;
        assert!(!scanner.has_baseline());
        assert!(scanner.scan(&probe).await.is_empty());
    }
}
