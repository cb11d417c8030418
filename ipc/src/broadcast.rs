//! Event stream filtering for UI subscribers.
//!
//! The tracker broadcasts every [`TrackerEvent`] on a single channel. Each
//! WebSocket subscriber may narrow what it receives with a
//! [`SubscriberFilter`] built from its query string:
//!
//! - `taskId`: only events for that task
//! - `type`: only one event kind (`fileDiscovered`, `fileTracked`, `trackFailed`)
//!
//! # Example
//!
//! ```rust
//! use contextflow_ipc::broadcast::{EventKind, SubscriberFilter};
//! use contextflow_tracker::types::TrackerEvent;
//!
//! let event = TrackerEvent::FileTracked {
//!     task_id: "64f0c2".to_string(),
//!     path: "C:\\docs\\report.docx".to_string(),
//! };
//!
//! let filter = SubscriberFilter::new()
//!     .with_task_id("64f0c2")
//!     .with_event_kind(EventKind::FileTracked);
//!
//! assert!(filter.matches(&event));
//! ```

use serde::{Deserialize, Serialize};

use contextflow_tracker::types::TrackerEvent;

/// Kind of a [`TrackerEvent`], as used in the `type` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    FileDiscovered,
    FileTracked,
    TrackFailed,
}

impl EventKind {
    /// Returns the kind of `event`.
    #[must_use]
    pub fn of(event: &TrackerEvent) -> Self {
        match event {
            TrackerEvent::FileDiscovered(_) => Self::FileDiscovered,
            TrackerEvent::FileTracked { .. } => Self::FileTracked,
            TrackerEvent::TrackFailed { .. } => Self::TrackFailed,
        }
    }
}

/// Filter criteria for selecting which events a subscriber receives.
///
/// All set criteria must match; unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberFilter {
    /// Only events for this task.
    pub task_id: Option<String>,

    /// Only events of this kind.
    pub event_kind: Option<EventKind>,
}

impl SubscriberFilter {
    /// Creates a filter that matches all events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[must_use]
    pub fn with_event_kind(mut self, kind: EventKind) -> Self {
        self.event_kind = Some(kind);
        self
    }

    /// Checks if an event matches this filter's criteria.
    #[must_use]
    pub fn matches(&self, event: &TrackerEvent) -> bool {
        if let Some(ref task_id) = self.task_id {
            if event.task_id() != task_id {
                return false;
            }
        }

        if let Some(kind) = self.event_kind {
            if EventKind::of(event) != kind {
                return false;
            }
        }

        true
    }

    /// Returns `true` if no criteria are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.event_kind.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextflow_tracker::types::{DiscoveredFileEvent, FileSource};

    fn discovered(task_id: &str) -> TrackerEvent {
        TrackerEvent::FileDiscovered(DiscoveredFileEvent::new(task_id, "/a.txt", FileSource::Window))
    }

    fn tracked(task_id: &str) -> TrackerEvent {
        TrackerEvent::FileTracked {
            task_id: task_id.to_string(),
            path: "/a.txt".to_string(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SubscriberFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&discovered("t1")));
        assert!(filter.matches(&tracked("t2")));
    }

    #[test]
    fn task_filter() {
        let filter = SubscriberFilter::new().with_task_id("t1");
        assert!(filter.matches(&discovered("t1")));
        assert!(!filter.matches(&tracked("t2")));
    }

    #[test]
    fn kind_filter() {
        let filter = SubscriberFilter::new().with_event_kind(EventKind::FileTracked);
        assert!(filter.matches(&tracked("t1")));
        assert!(!filter.matches(&discovered("t1")));
    }

    #[test]
    fn filters_combine_with_and() {
        let filter = SubscriberFilter::new()
            .with_task_id("t1")
            .with_event_kind(EventKind::FileTracked);
        assert!(filter.matches(&tracked("t1")));
        assert!(!filter.matches(&tracked("t2")));
        assert!(!filter.matches(&discovered("t1")));
    }

    #[test]
    fn event_kind_matches_wire_tag() {
        for event in [discovered("t"), tracked("t")] {
            let kind = serde_json::to_value(EventKind::of(&event)).unwrap();
            assert_eq!(kind, event.kind());
        }
    }

    #[test]
    fn event_kind_parses_from_query_value() {
        let kind: EventKind = serde_json::from_str("\"trackFailed\"").unwrap();
        assert_eq!(kind, EventKind::TrackFailed);
    }
}
