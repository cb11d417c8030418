//! Session lifecycle and scanner orchestration.
//!
//! [`SessionTracker`] keeps a registry of sessions keyed by task id. At most
//! one session is active across the whole tracker: starting a session stops
//! every other one before the new baselines are captured.
//!
//! An active session runs three scanner tasks on independent timers:
//!
//! | Scanner | Default period | Source |
//! |---------|----------------|--------|
//! | [`RecentScanner`] | 2s | [`FileSource::Recent`] |
//! | [`TitleMatcher`] | 2s | [`FileSource::Window`] |
//! | [`ProcessMonitor`] | 4s | [`FileSource::Process`] |
//!
//! Every candidate path goes through the session's tracked set. A path seen
//! for the first time is broadcast as [`TrackerEvent::FileDiscovered`] and
//! queued for the Task Store. The active flag lives under the same lock as the
//! tracked set, so once [`SessionTracker::end`] returns no further event for
//! that session is published, even by scans or track calls still in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{Config, ScanIntervals};
use crate::forwarder::{self, EnqueueError, Outbound, TrackJob};
use crate::launcher::{check_open_path, resume_open, LaunchError, Opener, SharedOpener};
use crate::picker::{PickError, SharedPicker};
use crate::probe::SharedProbe;
use crate::process::ProcessMonitor;
use crate::recent::RecentScanner;
use crate::store::{RetryPolicy, TaskStoreClient};
use crate::types::{DiscoveredFileEvent, FileSource, TrackerEvent};
use crate::window::TitleMatcher;

/// Default event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Poll interval while draining the outbound queue on shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default pause between files opened from one pick.
const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(250);

/// Errors returned by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The task id was empty.
    #[error("missing task id")]
    MissingTaskId,

    /// The auth token was empty.
    #[error("missing auth token")]
    MissingAuthToken,

    /// The file picker failed.
    #[error("file picker failed: {0}")]
    Pick(#[from] PickError),

    /// A file could not be opened.
    #[error("could not open file: {0}")]
    Open(#[from] LaunchError),
}

/// Tuning for a [`SessionTracker`].
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub intervals: ScanIntervals,
    /// Editor title suffixes added to the Visual Studio Code pattern.
    pub title_suffixes: Vec<String>,
    /// Process names added to the system denylist.
    pub process_denylist: Vec<String>,
    /// Capacity of the outbound queue and the event channel.
    pub buffer_size: usize,
    /// Pause between consecutive files opened together.
    pub open_delay: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            intervals: ScanIntervals::default(),
            title_suffixes: Vec::new(),
            process_denylist: Vec::new(),
            buffer_size: DEFAULT_EVENT_CAPACITY,
            open_delay: DEFAULT_OPEN_DELAY,
        }
    }
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            intervals: config.intervals,
            title_suffixes: config.extra_title_suffixes.clone(),
            process_denylist: config.extra_process_denylist.clone(),
            buffer_size: config.buffer_size,
            open_delay: config.resume_delay,
        }
    }
}

/// Snapshot of an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub tracked: usize,
}

#[derive(Debug)]
struct SessionState {
    active: bool,
    tracked: HashSet<String>,
}

/// State shared between a session's scanners, the registry and the forwarder.
pub(crate) struct SessionShared {
    task_id: String,
    token: String,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<TrackerEvent>,
    outbound: Outbound,
}

impl SessionShared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.state().active
    }

    fn deactivate(&self) {
        self.state().active = false;
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            task_id: self.task_id.clone(),
            started_at: self.started_at,
            tracked: self.state().tracked.len(),
        }
    }

    /// Attributes `path` to this session.
    ///
    /// Returns true if the path was new and has been queued for the Task Store.
    fn record(self: &Arc<Self>, path: String, source: FileSource) -> bool {
        let mut state = self.state();
        if !state.active || !state.tracked.insert(path.clone()) {
            return false;
        }

        let job = TrackJob {
            task_id: self.task_id.clone(),
            path: path.clone(),
            token: self.token.clone(),
            session: Some(Arc::clone(self)),
        };

        match self.outbound.try_enqueue(job) {
            Ok(()) => {}
            Err(e) => {
                // Forget the path so a later tick can offer it again.
                state.tracked.remove(&path);
                match e {
                    EnqueueError::Full => {
                        warn!(task_id = %self.task_id, path = %path, "Outbound queue full, deferring path");
                    }
                    EnqueueError::Closed => {
                        warn!(task_id = %self.task_id, path = %path, "Outbound queue closed, path not forwarded");
                    }
                }
                return false;
            }
        }

        info!(task_id = %self.task_id, path = %path, source = %source, "Discovered file");
        let _ = self
            .events
            .send(TrackerEvent::FileDiscovered(DiscoveredFileEvent::new(
                self.task_id.clone(),
                path,
                source,
            )));
        true
    }

    /// Broadcasts `event` if the session is still active.
    pub(crate) fn publish(&self, event: TrackerEvent) -> bool {
        let state = self.state();
        if !state.active {
            return false;
        }
        let _ = self.events.send(event);
        true
    }

    fn tracked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state().tracked.iter().cloned().collect();
        paths.sort();
        paths
    }
}

struct SessionHandle {
    shared: Arc<SessionShared>,
    scanners: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    fn stop(self) {
        self.shared.deactivate();
        for scanner in self.scanners {
            scanner.abort();
        }
    }
}

/// One of a session's three scanners.
enum Scanner {
    Recent(RecentScanner),
    Window(TitleMatcher),
    Process(ProcessMonitor),
}

impl Scanner {
    fn source(&self) -> FileSource {
        match self {
            Self::Recent(_) => FileSource::Recent,
            Self::Window(_) => FileSource::Window,
            Self::Process(_) => FileSource::Process,
        }
    }

    async fn scan(&mut self, probe: &SharedProbe) -> Vec<String> {
        match self {
            Self::Recent(scanner) => scanner.scan(probe).await,
            Self::Window(matcher) => matcher.scan(probe).await,
            Self::Process(monitor) => monitor.scan(probe).await,
        }
    }
}

async fn run_scanner(shared: Arc<SessionShared>, probe: SharedProbe, mut scanner: Scanner, period: Duration) {
    let source = scanner.source();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; scanning starts one period in.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !shared.is_active() {
            break;
        }

        let candidates = scanner.scan(&probe).await;
        for path in candidates {
            shared.record(path, source);
        }
    }

    debug!(task_id = %shared.task_id, source = %source, "Scanner stopped");
}

/// Owns every session and the outbound track-file queue.
pub struct SessionTracker {
    probe: SharedProbe,
    settings: TrackerSettings,
    registry: tokio::sync::Mutex<HashMap<String, SessionHandle>>,
    events: broadcast::Sender<TrackerEvent>,
    outbound: Outbound,
    forwarder: JoinHandle<()>,
    created_at: Instant,
}

impl SessionTracker {
    /// Creates a tracker and spawns its forwarding task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(probe: SharedProbe, store: TaskStoreClient, settings: TrackerSettings) -> Self {
        let capacity = settings.buffer_size.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (outbound, rx) = Outbound::channel(capacity);
        let forwarder = forwarder::spawn(store, rx, events.clone(), outbound.pending_counter());

        Self {
            probe,
            settings,
            registry: tokio::sync::Mutex::new(HashMap::new()),
            events,
            outbound,
            forwarder,
            created_at: Instant::now(),
        }
    }

    /// Creates a tracker whose Task Store client and settings come from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Store`](crate::TrackerError::Store) if the
    /// backend URL is unusable.
    pub fn from_config(config: &Config, probe: SharedProbe) -> crate::Result<Self> {
        let store = TaskStoreClient::new(&config.backend_url, RetryPolicy::with_attempts(config.retry_limit))?;
        Ok(Self::new(probe, store, TrackerSettings::from(config)))
    }

    /// Pause between consecutive files opened together.
    #[must_use]
    pub fn open_delay(&self) -> Duration {
        self.settings.open_delay
    }

    /// Subscribes to discovery and tracking events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Number of live event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Time since the tracker was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Track-file calls queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.pending()
    }

    /// Starts a session for `task_id`, replacing any active session.
    ///
    /// Previous sessions are stopped before the new baselines are captured.
    /// Returns once both baselines are in place and the scanners run.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTaskId`] or
    /// [`SessionError::MissingAuthToken`] for empty arguments.
    pub async fn start(&self, task_id: &str, token: &str) -> Result<SessionInfo, SessionError> {
        let task_id = require_task_id(task_id)?;
        let token = require_token(token)?;

        let mut registry = self.registry.lock().await;
        for (previous, handle) in registry.drain() {
            handle.stop();
            info!(task_id = %previous, "Stopped previous session");
        }

        let (recent, process) = tokio::join!(
            RecentScanner::capture(&self.probe),
            ProcessMonitor::capture(&self.probe, &self.settings.process_denylist),
        );
        let matcher = TitleMatcher::new(&self.settings.title_suffixes);

        let shared = Arc::new(SessionShared {
            task_id: task_id.to_string(),
            token: token.to_string(),
            started_at: Utc::now(),
            state: Mutex::new(SessionState {
                active: true,
                tracked: HashSet::new(),
            }),
            events: self.events.clone(),
            outbound: self.outbound.clone(),
        });

        let intervals = self.settings.intervals;
        let scanners: Vec<JoinHandle<()>> = [
            (Scanner::Recent(recent), intervals.recent),
            (Scanner::Window(matcher), intervals.window),
            (Scanner::Process(process), intervals.process),
        ]
        .into_iter()
        .map(|(scanner, period)| {
            tokio::spawn(run_scanner(
                Arc::clone(&shared),
                Arc::clone(&self.probe),
                scanner,
                period,
            ))
        })
        .collect();

        let info = shared.info();
        registry.insert(task_id.to_string(), SessionHandle { shared, scanners });
        info!(task_id, "Session started");
        Ok(info)
    }

    /// Ends the session for `task_id`.
    ///
    /// Returns whether a session was running. Ending a task without a session
    /// is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTaskId`] for an empty task id.
    pub async fn end(&self, task_id: &str) -> Result<bool, SessionError> {
        let task_id = require_task_id(task_id)?;

        let handle = self.registry.lock().await.remove(task_id);
        match handle {
            Some(handle) => {
                let tracked = handle.shared.info().tracked;
                handle.stop();
                info!(task_id, tracked, "Session ended");
                Ok(true)
            }
            None => {
                debug!(task_id, "No active session to end");
                Ok(false)
            }
        }
    }

    /// Ends every session. Returns how many were running.
    pub async fn end_all(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let count = registry.len();
        for (task_id, handle) in registry.drain() {
            handle.stop();
            info!(task_id = %task_id, "Session ended");
        }
        count
    }

    /// Returns true if `task_id` has an active session.
    pub async fn is_active(&self, task_id: &str) -> bool {
        self.registry
            .lock()
            .await
            .get(task_id)
            .is_some_and(|handle| handle.shared.is_active())
    }

    /// Task ids with an active session.
    pub async fn active_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.registry.lock().await.keys().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Details of the session for `task_id`, if one is running.
    pub async fn session(&self, task_id: &str) -> Option<SessionInfo> {
        self.registry
            .lock()
            .await
            .get(task_id)
            .map(|handle| handle.shared.info())
    }

    /// Paths the session for `task_id` has attributed so far, sorted.
    pub async fn tracked_paths(&self, task_id: &str) -> Vec<String> {
        self.registry
            .lock()
            .await
            .get(task_id)
            .map(|handle| handle.shared.tracked_paths())
            .unwrap_or_default()
    }

    /// Shows the file picker and attributes every chosen file to `task_id`.
    ///
    /// With an `opener` the chosen files are also opened, in order and paced
    /// by [`TrackerSettings::open_delay`]. A file that fails to open is still
    /// attributed.
    ///
    /// Works whether or not a session is running. With an active session for
    /// `task_id` the picks share its tracked set, so files it already reported
    /// are not sent again. Returns the number of distinct files chosen.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTaskId`],
    /// [`SessionError::MissingAuthToken`] or [`SessionError::Pick`].
    pub async fn pick_and_track(
        &self,
        task_id: &str,
        token: &str,
        picker: SharedPicker,
        opener: Option<SharedOpener>,
    ) -> Result<usize, SessionError> {
        let task_id = require_task_id(task_id)?;
        let token = require_token(token)?;

        let picked = tokio::task::spawn_blocking(move || picker.pick_files())
            .await
            .map_err(|e| PickError::Task(e.to_string()))??;
        let picked = distinct_paths(picked);

        if let Some(opener) = opener {
            resume_open(opener.as_ref(), &picked, self.settings.open_delay).await;
        }

        Ok(self.track_manual(task_id, token, picked).await)
    }

    /// Opens `path` with `opener` and attributes it to `task_id` with
    /// [`FileSource::Manual`].
    ///
    /// Nothing is tracked if the file cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTaskId`],
    /// [`SessionError::MissingAuthToken`] or [`SessionError::Open`].
    pub async fn open_and_track(&self, task_id: &str, token: &str, path: &str, opener: &dyn Opener) -> Result<(), SessionError> {
        let task_id = require_task_id(task_id)?;
        let token = require_token(token)?;
        let path = check_open_path(path)?;

        opener.open(path)?;
        self.track_manual(task_id, token, vec![path.to_string()]).await;
        Ok(())
    }

    /// Attributes explicitly chosen `paths` to `task_id` with [`FileSource::Manual`].
    ///
    /// Returns the number of distinct non-empty paths accepted.
    pub async fn track_manual(&self, task_id: &str, token: &str, paths: Vec<String>) -> usize {
        let session = self
            .registry
            .lock()
            .await
            .get(task_id)
            .map(|handle| Arc::clone(&handle.shared));

        let paths = distinct_paths(paths);
        let count = paths.len();
        for path in paths {
            match &session {
                Some(shared) if shared.is_active() => {
                    shared.record(path, FileSource::Manual);
                }
                _ => self.forward_unattached(task_id, token, path),
            }
        }

        info!(task_id, files = count, "Manual files picked");
        count
    }

    fn forward_unattached(&self, task_id: &str, token: &str, path: String) {
        let job = TrackJob {
            task_id: task_id.to_string(),
            path: path.clone(),
            token: token.to_string(),
            session: None,
        };
        if let Err(e) = self.outbound.try_enqueue(job) {
            warn!(task_id, path = %path, error = ?e, "Could not queue picked file");
            return;
        }

        info!(task_id, path = %path, source = %FileSource::Manual, "Discovered file");
        let _ = self
            .events
            .send(TrackerEvent::FileDiscovered(DiscoveredFileEvent::new(
                task_id,
                path,
                FileSource::Manual,
            )));
    }

    /// Ends every session and waits up to `timeout` for queued track calls.
    ///
    /// Returns the number of track calls still unfinished.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let ended = self.end_all().await;
        if ended > 0 {
            info!(sessions = ended, "Ended sessions for shutdown");
        }

        let deadline = Instant::now() + timeout;
        while self.outbound.pending() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let remaining = self.outbound.pending();
        if remaining > 0 {
            warn!(remaining, "Shutdown with track-file calls still pending");
        }
        remaining
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.try_lock() {
            for (_, handle) in registry.drain() {
                handle.stop();
            }
        }
        self.forwarder.abort();
    }
}

/// Drops empty and repeated paths, keeping first-seen order.
fn distinct_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| !path.trim().is_empty() && seen.insert(path.clone()))
        .collect()
}

pub(crate) fn require_task_id(task_id: &str) -> Result<&str, SessionError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(SessionError::MissingTaskId);
    }
    Ok(task_id)
}

pub(crate) fn require_token(token: &str) -> Result<&str, SessionError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(SessionError::MissingAuthToken);
    }
    Ok(token)
}
