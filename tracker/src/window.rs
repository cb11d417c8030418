//! Foreground-window title matching.
//!
//! Two heuristics turn a window title into candidate paths:
//!
//! - Editor titles (`● main.rs - C:\work\app - Visual Studio Code`) are split
//!   into ` - ` segments after the known suffix and unsaved marker are
//!   stripped; segments that look like a path with an extension are kept.
//! - Any title is searched for embedded Windows drive paths
//!   (`C:\dir\file.ext`).

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::probe::{run_bounded, ForegroundWindow, SharedProbe, WINDOW_TIMEOUT};

/// Title suffix of Visual Studio Code windows.
pub const VSCODE_TITLE_SUFFIX: &str = " - Visual Studio Code";

/// Markers editors prepend to the title of a file with unsaved changes.
const UNSAVED_MARKERS: &[char] = &['●', '•', '*'];

/// A drive path ends at the first extension followed by whitespace, a closing
/// delimiter or the end of the title, so `a.tar.gz` keeps its full name.
static DRIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"([A-Za-z]:\\(?:[^\\/:*?"<>|\r\n]+\\)*[^\\/:*?"<>|\r\n]*?\.[A-Za-z0-9]{1,10})(?:[\s"')\],;]|$)"#,
    )
    .expect("drive path regex is valid")
});

/// Extracts candidate paths from window titles.
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    suffixes: Vec<String>,
}

impl Default for TitleMatcher {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl TitleMatcher {
    /// Creates a matcher for Visual Studio Code plus `extra_suffixes`.
    ///
    /// Extra suffixes are matched as written, so include the separator
    /// (`" - Sublime Text"`).
    #[must_use]
    pub fn new(extra_suffixes: &[String]) -> Self {
        let mut suffixes = vec![VSCODE_TITLE_SUFFIX.to_string()];
        suffixes.extend(
            extra_suffixes
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned(),
        );
        Self { suffixes }
    }

    /// Returns the editor suffixes this matcher recognises.
    #[must_use]
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Returns the candidate paths encoded in `title`, without duplicates.
    #[must_use]
    pub fn candidates(&self, title: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut push = |path: String| {
            if !found.contains(&path) {
                found.push(path);
            }
        };

        for segment in self.editor_segments(title) {
            if !has_extension(segment) {
                continue;
            }
            if has_separator(segment) {
                push(segment.to_string());
            } else {
                debug!(file = %segment, "Editor title names a bare file, not tracking");
            }
        }

        for caps in DRIVE_PATH.captures_iter(title) {
            if let Some(m) = caps.get(1) {
                push(m.as_str().to_string());
            }
        }

        found
    }

    fn editor_segments<'a>(&self, title: &'a str) -> Vec<&'a str> {
        let title = title.trim();
        let Some(body) = self
            .suffixes
            .iter()
            .find_map(|suffix| title.strip_suffix(suffix.as_str()))
        else {
            return Vec::new();
        };

        let body = body.trim_start_matches(|c: char| UNSAVED_MARKERS.contains(&c) || c.is_whitespace());

        body.split(" - ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Queries the focused window and returns its candidate paths.
    ///
    /// A failed or timed-out query yields no candidates.
    pub async fn scan(&self, probe: &SharedProbe) -> Vec<String> {
        match run_bounded(probe, WINDOW_TIMEOUT, |p| p.foreground_window()).await {
            Ok(Some(ForegroundWindow { title, process_name })) => {
                let candidates = self.candidates(&title);
                if !candidates.is_empty() {
                    debug!(
                        process = process_name.as_deref().unwrap_or("unknown"),
                        candidates = candidates.len(),
                        "Window title encodes paths"
                    );
                }
                candidates
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!(error = %e, "Foreground window query failed");
                Vec::new()
            }
        }
    }
}

fn has_separator(segment: &str) -> bool {
    segment.contains(['\\', '/'])
}

fn has_extension(segment: &str) -> bool {
    let name = segment.rsplit(['\\', '/']).next().unwrap_or(segment);
    match name.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < name.len() && !name.ends_with(' '),
        None => false,
    }
}
