//! Integration tests for the Task Store client and resume flow.
//!
//! These tests verify:
//! - Transient failures (5xx, 429) are retried until success
//! - Client errors fail on the first attempt
//! - Exhausted retries are reported with the attempt count
//! - Resume files come back newest first and reopen in that order

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use contextflow_tracker::launcher::{resume_open, resume_task, RecordingOpener};
use contextflow_tracker::session::SessionError;
use contextflow_tracker::store::{RetryPolicy, StoreError, TaskStoreClient};
use contextflow_tracker::TrackerError;

fn client(store: &MockServer, attempts: u8) -> TaskStoreClient {
    TaskStoreClient::new(&store.uri(), RetryPolicy::fast(attempts)).unwrap()
}

// ============================================================================
// Track-file retries
// ============================================================================

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/t1/files/track"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/todos/t1/files/track"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    client(&store, 3)
        .track_file("t1", "/a.txt", "tok")
        .await
        .unwrap();
    store.verify().await;
}

#[tokio::test]
async fn task_id_with_reserved_characters_stays_in_its_segment() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/a%2Fb%3Fc/files/track"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    client(&store, 1)
        .track_file("a/b?c", "/a.txt", "tok")
        .await
        .unwrap();
    store.verify().await;
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    client(&store, 2)
        .track_file("t1", "/a.txt", "tok")
        .await
        .unwrap();
    store.verify().await;
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Task not found"))
        .expect(1)
        .mount(&store)
        .await;

    let err = client(&store, 5)
        .track_file("missing", "/a.txt", "tok")
        .await
        .unwrap_err();

    match err {
        StoreError::Status { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Task not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    store.verify().await;
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&store)
        .await;

    let err = client(&store, 3)
        .track_file("t1", "/a.txt", "bad")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized));
}

#[tokio::test]
async fn persistent_failure_exhausts_retries() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&store)
        .await;

    let err = client(&store, 3)
        .track_file("t1", "/a.txt", "tok")
        .await
        .unwrap_err();

    match err {
        StoreError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.starts_with("500"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    store.verify().await;
}

#[tokio::test]
async fn single_attempt_policy_drops_on_first_failure() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&store)
        .await;

    let err = client(&store, 1)
        .track_file("t1", "/a.txt", "tok")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RetriesExhausted { attempts: 1, .. }));
    store.verify().await;
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn resume_files_are_sorted_newest_first() {
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos/t1/resume"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "taskId": "t1",
            "title": "Write report",
            "files": [
                { "path": "C:\\old.txt", "lastOpened": "2024-01-01T00:00:00Z" },
                { "path": "C:\\new.txt", "lastOpened": "2024-03-01T00:00:00Z" },
                { "path": "C:\\mid.txt", "lastOpened": "2024-02-01T00:00:00Z" }
            ]
        })))
        .mount(&store)
        .await;

    let resume = client(&store, 1).resume_files("t1", "tok").await.unwrap();

    assert_eq!(resume.title, "Write report");
    let paths: Vec<&str> = resume.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["C:\\new.txt", "C:\\mid.txt", "C:\\old.txt"]);
}

#[tokio::test]
async fn resume_open_paces_files_and_skips_failures() {
    let opener = RecordingOpener::new();
    opener.fail_on("a.txt");

    let files = vec!["a.txt".to_string(), "b.txt".to_string()];
    let report = resume_open(&opener, &files, Duration::from_millis(250)).await;

    assert_eq!(report.opened, vec!["b.txt"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "a.txt");

    let times = opener.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1].duration_since(times[0]) >= Duration::from_millis(250));
}

#[tokio::test]
async fn resume_with_unknown_task_fails() {
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&store)
        .await;

    let err = client(&store, 1).resume_files("nope", "tok").await.unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 404, .. }));
}

#[tokio::test]
async fn resume_task_opens_newest_first() {
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos/t1/resume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "taskId": "t1",
            "title": "Write report",
            "files": [
                { "path": "/old.txt", "lastOpened": "2024-01-01T00:00:00Z" },
                { "path": "/new.txt", "lastOpened": "2024-03-01T00:00:00Z" }
            ]
        })))
        .mount(&store)
        .await;

    let opener = RecordingOpener::new();
    let report = resume_task(&client(&store, 1), &opener, "t1", "tok", Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(report.opened, vec!["/new.txt", "/old.txt"]);
    assert_eq!(opener.opened(), vec!["/new.txt", "/old.txt"]);
}

#[tokio::test]
async fn resume_task_reports_store_and_argument_errors() {
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&store)
        .await;
    let opener = RecordingOpener::new();

    let err = resume_task(&client(&store, 1), &opener, "t1", "bad", Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Store(StoreError::Unauthorized)));

    let err = resume_task(&client(&store, 1), &opener, " ", "tok", Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Session(SessionError::MissingTaskId)));

    assert!(opener.opened().is_empty());
}
