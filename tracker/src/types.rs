//! Event and wire types for ContextFlow session tracking.
//!
//! This module defines the types exchanged between the tracker, the Task Store
//! and the desktop UI. All types serialize to camelCase JSON to match the
//! backend and the UI process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which signal attributed a path to the active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// A new or re-touched shortcut in the OS recent-items folder.
    Recent,
    /// A path encoded in the focused window's title.
    Window,
    /// An executable launched after the session baseline.
    Process,
    /// A file chosen explicitly through the native picker.
    Manual,
}

impl FileSource {
    /// Returns the lowercase name used in logs and JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Window => "window",
            Self::Process => "process",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path newly attributed to a task during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFileEvent {
    /// Task the path was attributed to.
    pub task_id: String,

    /// Absolute file or executable path.
    pub path: String,

    /// Which scanner (or the picker) found it.
    pub source: FileSource,

    /// When the tracker first saw the path.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredFileEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(task_id: impl Into<String>, path: impl Into<String>, source: FileSource) -> Self {
        Self {
            task_id: task_id.into(),
            path: path.into(),
            source,
            discovered_at: Utc::now(),
        }
    }
}

/// Notifications pushed to the UI process.
///
/// Uses serde's internally tagged representation so the UI can switch on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    /// A scanner or the picker attributed a new path to a task.
    FileDiscovered(DiscoveredFileEvent),

    /// The Task Store accepted the path.
    #[serde(rename_all = "camelCase")]
    FileTracked { task_id: String, path: String },

    /// The Task Store call failed after all attempts; the path was dropped.
    #[serde(rename_all = "camelCase")]
    TrackFailed {
        task_id: String,
        path: String,
        error: String,
    },
}

impl TrackerEvent {
    /// Returns the task this event belongs to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::FileDiscovered(event) => &event.task_id,
            Self::FileTracked { task_id, .. } | Self::TrackFailed { task_id, .. } => task_id,
        }
    }

    /// Returns the wire name of the event variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileDiscovered(_) => "fileDiscovered",
            Self::FileTracked { .. } => "fileTracked",
            Self::TrackFailed { .. } => "trackFailed",
        }
    }
}

/// Body of the Task Store track-file call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFileRequest {
    pub task_id: String,
    pub path: String,
}

/// A previously tracked file, as returned by the Task Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeFile {
    /// Absolute path of the file.
    pub path: String,

    /// Last time the file was attributed to the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened: Option<DateTime<Utc>>,
}

impl ResumeFile {
    /// Creates a resume entry without a timestamp.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            last_opened: None,
        }
    }
}

/// Resume payload for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeFiles {
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub files: Vec<ResumeFile>,
}

impl ResumeFiles {
    /// Sorts files newest `lastOpened` first; entries without a timestamp go last.
    pub fn sort_newest_first(&mut self) {
        self.files
            .sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
    }
}
