//! Integration tests for session tracking against a mock Task Store.
//!
//! These tests drive [`SessionTracker`] with a [`ScriptedProbe`] and verify:
//! - Each distinct path produces exactly one track-file call per session
//! - Executables running at session start are never reported
//! - Ending a session stops all OS queries and is idempotent
//! - Restarting on another task publishes nothing for the old task
//! - Re-touched recent shortcuts are reported once

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use contextflow_tracker::config::ScanIntervals;
use contextflow_tracker::probe::{ScriptedProbe, SharedProbe};
use contextflow_tracker::session::{SessionTracker, TrackerSettings};
use contextflow_tracker::store::{RetryPolicy, TaskStoreClient};
use contextflow_tracker::types::{FileSource, TrackerEvent};

// ============================================================================
// Test Helpers
// ============================================================================

const TICK: Duration = Duration::from_millis(20);

fn settings() -> TrackerSettings {
    TrackerSettings {
        intervals: ScanIntervals {
            recent: TICK,
            window: TICK,
            process: TICK,
        },
        ..TrackerSettings::default()
    }
}

fn tracker(store: &MockServer, probe: &Arc<ScriptedProbe>) -> SessionTracker {
    let client = TaskStoreClient::new(&store.uri(), RetryPolicy::fast(1)).unwrap();
    let probe: SharedProbe = probe.clone();
    SessionTracker::new(probe, client, settings())
}

fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Collects every event currently buffered in `rx`.
fn drain(rx: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn discovered(events: &[TrackerEvent]) -> Vec<(String, FileSource)> {
    events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::FileDiscovered(d) => Some((d.path.clone(), d.source)),
            _ => None,
        })
        .collect()
}

async fn accept_all(store: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/todos/[^/]+/files/track$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(store)
        .await;
}

// ============================================================================
// Dedup
// ============================================================================

#[tokio::test]
async fn same_path_from_two_sources_is_tracked_once() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/t1/files/track"))
        .and(body_json(json!({ "taskId": "t1", "path": "C:\\docs\\plan.txt" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    let probe = Arc::new(ScriptedProbe::new());
    let tracker = tracker(&store, &probe);
    let mut rx = tracker.subscribe();

    tracker.start("t1", "tok").await.unwrap();

    // The same file appears in the recent folder and in an editor title.
    probe.add_shortcut("plan.txt.lnk", at(100), Some("C:\\docs\\plan.txt"));
    probe.set_window("Editing C:\\docs\\plan.txt", Some("notepad.exe"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let events = drain(&mut rx);
    assert_eq!(discovered(&events).len(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        TrackerEvent::FileTracked { path, .. } if path == "C:\\docs\\plan.txt"
    )));

    tracker.end("t1").await.unwrap();
    store.verify().await;
}

// ============================================================================
// Baseline exclusion
// ============================================================================

#[tokio::test]
async fn baseline_executables_are_not_reported() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/t1/files/track"))
        .and(body_json(json!({ "taskId": "t1", "path": "C:\\Tools\\foo.exe" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    let probe = Arc::new(ScriptedProbe::new());
    probe.set_executables(["C:\\Windows\\System32\\explorer.exe"]);
    let tracker = tracker(&store, &probe);
    let mut rx = tracker.subscribe();

    tracker.start("t1", "tok").await.unwrap();
    probe.set_executables(["C:\\Windows\\System32\\explorer.exe", "C:\\Tools\\foo.exe"]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        discovered(&drain(&mut rx)),
        vec![("C:\\Tools\\foo.exe".to_string(), FileSource::Process)]
    );

    tracker.end("t1").await.unwrap();
    store.verify().await;
}

// ============================================================================
// Idempotent end
// ============================================================================

#[tokio::test]
async fn end_stops_all_probe_calls() {
    let store = MockServer::start().await;
    let probe = Arc::new(ScriptedProbe::new());
    let tracker = tracker(&store, &probe);

    tracker.start("t1", "tok").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(tracker.end("t1").await.unwrap());
    assert!(!tracker.end("t1").await.unwrap());

    // Let any query already handed to the blocking pool land.
    tokio::time::sleep(TICK).await;
    let after_end = probe.calls();
    assert!(after_end.window > 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(probe.calls(), after_end);
}

// ============================================================================
// Restart isolation
// ============================================================================

#[tokio::test]
async fn restart_publishes_nothing_for_previous_task() {
    let store = MockServer::start().await;
    // Slow responses keep task A's track call in flight across the restart.
    Mock::given(method("POST"))
        .and(path("/api/todos/a/files/track"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&store)
        .await;
    accept_all(&store).await;

    let probe = Arc::new(ScriptedProbe::new());
    let tracker = tracker(&store, &probe);

    probe.set_window("C:\\a\\notes.md - Visual Studio Code", Some("Code.exe"));
    tracker.start("a", "tok").await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(tracker.tracked_paths("a").await, vec!["C:\\a\\notes.md"]);

    tracker.start("b", "tok").await.unwrap();
    let mut rx = tracker.subscribe();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.task_id() == "b"), "events: {:?}", events);

    // Task B starts with an empty tracked set and rediscovers the file.
    assert!(events.iter().any(|e| matches!(
        e,
        TrackerEvent::FileDiscovered(d) if d.path == "C:\\a\\notes.md"
    )));
    assert!(!tracker.is_active("a").await);
}

// ============================================================================
// Recent shortcuts
// ============================================================================

#[tokio::test]
async fn retouched_shortcut_is_reported_once() {
    let store = MockServer::start().await;
    accept_all(&store).await;

    let probe = Arc::new(ScriptedProbe::new());
    probe.add_shortcut("report.lnk", at(100), Some("C:\\docs\\report.docx"));
    let tracker = tracker(&store, &probe);
    let mut rx = tracker.subscribe();

    tracker.start("t1", "tok").await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(discovered(&drain(&mut rx)).is_empty());

    probe.touch_shortcut("report.lnk", at(200));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        discovered(&drain(&mut rx)),
        vec![("C:\\docs\\report.docx".to_string(), FileSource::Recent)]
    );
    tracker.end("t1").await.unwrap();
}

#[tokio::test]
async fn failing_probes_do_not_stop_other_scanners() {
    let store = MockServer::start().await;
    accept_all(&store).await;

    let probe = Arc::new(ScriptedProbe::new());
    probe.fail_recent(true);
    probe.fail_processes(true);
    let tracker = tracker(&store, &probe);
    let mut rx = tracker.subscribe();

    tracker.start("t1", "tok").await.unwrap();
    probe.set_window("C:\\src\\lib.rs - Visual Studio Code", Some("Code.exe"));
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(
        discovered(&drain(&mut rx)),
        vec![("C:\\src\\lib.rs".to_string(), FileSource::Window)]
    );
    assert!(tracker.is_active("t1").await);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_drains_queued_track_calls() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/t1/files/track"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .expect(2)
        .mount(&store)
        .await;

    let probe = Arc::new(ScriptedProbe::new());
    let tracker = tracker(&store, &probe);

    tracker.start("t1", "tok").await.unwrap();
    let count = tracker
        .track_manual("t1", "tok", vec!["/a.txt".to_string(), "/b.txt".to_string()])
        .await;
    assert_eq!(count, 2);

    assert_eq!(tracker.shutdown(Duration::from_secs(2)).await, 0);
    assert!(tracker.active_tasks().await.is_empty());
    store.verify().await;
}
