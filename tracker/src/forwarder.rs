//! Outbound track-file queue.
//!
//! Scanners never talk to the Task Store themselves. Each newly discovered
//! path becomes a [`TrackJob`] on a bounded channel; the forwarding task
//! drains the channel, calls [`TaskStoreClient::track_file`] (which owns the
//! retry policy) and broadcasts the outcome as a [`TrackerEvent`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::SessionShared;
use crate::store::TaskStoreClient;
use crate::types::TrackerEvent;

/// Maximum number of track calls in flight at once.
const MAX_IN_FLIGHT: usize = 8;

/// One path waiting to be recorded in the Task Store.
pub struct TrackJob {
    pub task_id: String,
    pub path: String,
    pub token: String,
    /// Session that discovered the path; results are only published while it is active.
    pub(crate) session: Option<Arc<SessionShared>>,
}

impl std::fmt::Debug for TrackJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackJob")
            .field("task_id", &self.task_id)
            .field("path", &self.path)
            .field("attached", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl TrackJob {
    fn publish(&self, events: &broadcast::Sender<TrackerEvent>, event: TrackerEvent) {
        match &self.session {
            Some(session) => {
                if !session.publish(event) {
                    debug!(task_id = %self.task_id, path = %self.path, "Session ended, result not published");
                }
            }
            None => {
                let _ = events.send(event);
            }
        }
    }
}

/// Why a job could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Full,
    Closed,
}

/// Sending half of the outbound queue, with a count of unfinished jobs.
#[derive(Clone)]
pub(crate) struct Outbound {
    tx: mpsc::Sender<TrackJob>,
    pending: Arc<AtomicUsize>,
}

impl Outbound {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<TrackJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                pending: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Queues a job without waiting.
    pub(crate) fn try_enqueue(&self, job: TrackJob) -> Result<(), EnqueueError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(match e {
                    TrySendError::Full(_) => EnqueueError::Full,
                    TrySendError::Closed(_) => EnqueueError::Closed,
                })
            }
        }
    }

    /// Jobs queued or in flight.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pending)
    }
}

/// Spawns the forwarding task.
///
/// The task ends once every [`Outbound`] handle has been dropped and the
/// queue is drained.
pub(crate) fn spawn(
    store: TaskStoreClient,
    rx: mpsc::Receiver<TrackJob>,
    events: broadcast::Sender<TrackerEvent>,
    pending: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(run(store, rx, events, pending))
}

async fn run(
    store: TaskStoreClient,
    mut rx: mpsc::Receiver<TrackJob>,
    events: broadcast::Sender<TrackerEvent>,
    pending: Arc<AtomicUsize>,
) {
    let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let store = store.clone();
        let events = events.clone();
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let event = forward(&store, &job).await;
            job.publish(&events, event);
            pending.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    debug!("Outbound queue closed, forwarder exiting");
}

async fn forward(store: &TaskStoreClient, job: &TrackJob) -> TrackerEvent {
    match store.track_file(&job.task_id, &job.path, &job.token).await {
        Ok(()) => {
            info!(task_id = %job.task_id, path = %job.path, "File tracked");
            TrackerEvent::FileTracked {
                task_id: job.task_id.clone(),
                path: job.path.clone(),
            }
        }
        Err(e) => {
            warn!(task_id = %job.task_id, path = %job.path, error = %e, "Dropping path after failed track-file call");
            TrackerEvent::TrackFailed {
                task_id: job.task_id.clone(),
                path: job.path.clone(),
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RetryPolicy;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(task_id: &str, path: &str) -> TrackJob {
        TrackJob {
            task_id: task_id.to_string(),
            path: path.to_string(),
            token: "secret".to_string(),
            session: None,
        }
    }

    #[tokio::test]
    async fn unattached_job_publishes_file_tracked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/todos/t1/files/track"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({ "taskId": "t1", "path": "/a.txt" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = TaskStoreClient::new(&server.uri(), RetryPolicy::fast(1)).unwrap();
        let (events, mut rx_events) = broadcast::channel(16);
        let (outbound, rx) = Outbound::channel(4);
        let handle = spawn(store, rx, events, outbound.pending_counter());

        outbound.try_enqueue(job("t1", "/a.txt")).unwrap();

        let event = rx_events.recv().await.unwrap();
        assert_eq!(
            event,
            TrackerEvent::FileTracked {
                task_id: "t1".to_string(),
                path: "/a.txt".to_string(),
            }
        );

        drop(outbound);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_job_publishes_track_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Todo not found"))
            .mount(&server)
            .await;

        let store = TaskStoreClient::new(&server.uri(), RetryPolicy::fast(3)).unwrap();
        let (events, mut rx_events) = broadcast::channel(16);
        let (outbound, rx) = Outbound::channel(4);
        let _handle = spawn(store, rx, events, outbound.pending_counter());

        outbound.try_enqueue(job("t1", "/a.txt")).unwrap();

        match rx_events.recv().await.unwrap() {
            TrackerEvent::TrackFailed { error, .. } => assert!(error.contains("404")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_counting() {
        let (outbound, _rx) = Outbound::channel(1);

        outbound.try_enqueue(job("t1", "/a")).unwrap();
        assert_eq!(outbound.try_enqueue(job("t1", "/b")), Err(EnqueueError::Full));
        assert_eq!(outbound.pending(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (outbound, rx) = Outbound::channel(1);
        drop(rx);
        assert_eq!(outbound.try_enqueue(job("t1", "/a")), Err(EnqueueError::Closed));
        assert_eq!(outbound.pending(), 0);
    }
}
