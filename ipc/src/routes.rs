//! HTTP route handlers for the ContextFlow IPC server.
//!
//! The desktop UI drives the tracker through these endpoints:
//!
//! - `POST /sessions/start` - Start tracking a task
//! - `POST /sessions/end` - Stop tracking a task
//! - `POST /sessions/resume` - Reopen a task's files
//! - `POST /sessions/pick` - Open and attribute files chosen in a native dialog
//! - `POST /sessions/open` - Open one file and attribute it
//! - `GET /events` - WebSocket stream of tracker events
//! - `GET /health` - Health check endpoint
//!
//! Every route requires the server token (see [`crate::auth`]). `POST` bodies
//! must be sent as `application/json`. CORS admits only the configured UI
//! origins.
//!
//! Successful calls answer `{ "ok": true, ... }`; failures answer
//! `{ "ok": false, "error": "..." }` (see [`IpcError`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use contextflow_ipc::auth::generate_token;
//! use contextflow_ipc::routes::{create_router, AppState};
//! use contextflow_tracker::{RetryPolicy, SessionTracker, SystemProbe, TaskStoreClient, TrackerSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = TaskStoreClient::new("http://localhost:3001", RetryPolicy::default()).unwrap();
//!     let probe = Arc::new(SystemProbe::new(None));
//!     let tracker = SessionTracker::new(probe, store, TrackerSettings::default());
//!     let app = create_router(AppState::new(tracker, generate_token()));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:17321").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method,
    },
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use contextflow_tracker::launcher::{resume_open, SharedOpener, SystemOpener};
use contextflow_tracker::picker::{SharedPicker, SystemPicker};
use contextflow_tracker::session::{SessionInfo, SessionTracker};

use crate::auth::require_token;
use crate::broadcast::{EventKind, SubscriberFilter};
use crate::config::DEFAULT_ALLOWED_ORIGIN;
use crate::error::IpcError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (256 KB).
const MAX_BODY_SIZE: usize = 256 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and event source.
    pub tracker: Arc<SessionTracker>,

    /// Opens files for `POST /sessions/resume`.
    pub opener: SharedOpener,

    /// Native dialog for `POST /sessions/pick`.
    pub picker: SharedPicker,

    /// Browser origins admitted by CORS.
    pub allowed_origins: Vec<String>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,

    api_token: Arc<str>,
}

impl AppState {
    /// Creates state backed by the platform opener and picker.
    #[must_use]
    pub fn new(tracker: SessionTracker, api_token: impl Into<String>) -> Self {
        Self::with_components(
            Arc::new(tracker),
            Arc::new(SystemOpener),
            Arc::new(SystemPicker),
            api_token,
        )
    }

    /// Creates state with a custom opener and picker.
    ///
    /// Useful for testing, where nothing should actually be launched.
    #[must_use]
    pub fn with_components(
        tracker: Arc<SessionTracker>,
        opener: SharedOpener,
        picker: SharedPicker,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            opener,
            picker,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            start_time: Instant::now(),
            api_token: Arc::from(api_token.into()),
        }
    }

    /// Replaces the origins admitted by CORS.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Token every request must present.
    #[must_use]
    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tracker", &"<SessionTracker>")
            .field("allowed_origins", &self.allowed_origins)
            .field("start_time", &self.start_time)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Token checks run on every route. CORS is the outermost layer so preflight
/// requests are answered without a token.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .route("/sessions/start", post(post_start))
        .route("/sessions/end", post(post_end))
        .route("/sessions/resume", post(post_resume))
        .route("/sessions/pick", post(post_pick))
        .route("/sessions/open", post(post_open))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/events", get(get_events))
        .route("/health", get(get_health))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unusable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Parses a JSON request body, which must be declared as `application/json`.
fn parse_body<T: DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> Result<T, IpcError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err(IpcError::UnsupportedMediaType);
    }

    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Failed to parse request body");
        IpcError::InvalidRequest(e.to_string())
    })
}

// ============================================================================
// POST /sessions/start
// ============================================================================

/// Request body for starting a session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub task_id: String,

    #[serde(default, alias = "token")]
    pub auth_token: String,
}

/// Response body for a started session.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub ok: bool,
    pub session: SessionInfoBody,
}

/// Session details as sent to the UI.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoBody {
    pub task_id: String,
    pub started_at: String,
    pub tracked: usize,
}

impl From<SessionInfo> for SessionInfoBody {
    fn from(info: SessionInfo) -> Self {
        Self {
            task_id: info.task_id,
            started_at: info.started_at.to_rfc3339(),
            tracked: info.tracked,
        }
    }
}

/// POST /sessions/start - Start tracking a task.
///
/// Any running session, for this or another task, is ended first.
///
/// # Responses
///
/// - `200 OK` - `{ "ok": true, "session": { ... } }`
/// - `400 Bad Request` - Missing task id or auth token, or malformed JSON
/// - `401 Unauthorized` - Missing or wrong server token
/// - `415 Unsupported Media Type` - Body not sent as JSON
async fn post_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StartResponse>, IpcError> {
    let request: StartRequest = parse_body(&headers, &body)?;

    let info = state
        .tracker
        .start(&request.task_id, &request.auth_token)
        .await?;

    Ok(Json(StartResponse {
        ok: true,
        session: info.into(),
    }))
}

// ============================================================================
// POST /sessions/end
// ============================================================================

/// Request body naming a task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    #[serde(default)]
    pub task_id: String,
}

/// Response body for an ended session.
#[derive(Debug, Serialize, Deserialize)]
pub struct EndResponse {
    pub ok: bool,
    /// Whether a session was running.
    pub ended: bool,
}

/// POST /sessions/end - Stop tracking a task.
///
/// Ending a task with no running session succeeds with `ended: false`.
async fn post_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EndResponse>, IpcError> {
    let request: EndRequest = parse_body(&headers, &body)?;
    let ended = state.tracker.end(&request.task_id).await?;
    Ok(Json(EndResponse { ok: true, ended }))
}

// ============================================================================
// POST /sessions/resume
// ============================================================================

/// A file to reopen: either a bare path or a resume-file object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResumeEntry {
    Path(String),
    File { path: String },
}

impl ResumeEntry {
    fn into_path(self) -> String {
        match self {
            Self::Path(path) | Self::File { path } => path,
        }
    }
}

/// Request body for reopening files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    #[serde(default)]
    pub task_id: String,

    #[serde(default)]
    pub files: Vec<ResumeEntry>,
}

/// Per-file outcome of a resume.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeFailure {
    pub path: String,
    pub error: String,
}

/// Response body for a resume.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub ok: bool,
    pub opened: Vec<String>,
    pub failed: Vec<ResumeFailure>,
}

/// POST /sessions/resume - Reopen files in order.
///
/// Files open one at a time with the configured delay between them. A file
/// that fails to open is reported and skipped.
async fn post_resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResumeResponse>, IpcError> {
    let request: ResumeRequest = parse_body(&headers, &body)?;
    let files: Vec<String> = request
        .files
        .into_iter()
        .map(ResumeEntry::into_path)
        .collect();

    info!(task_id = %request.task_id, files = files.len(), "Resuming files");

    let report = resume_open(state.opener.as_ref(), &files, state.tracker.open_delay()).await;

    Ok(Json(ResumeResponse {
        ok: true,
        opened: report.opened,
        failed: report
            .failed
            .into_iter()
            .map(|(path, error)| ResumeFailure { path, error })
            .collect(),
    }))
}

// ============================================================================
// POST /sessions/pick
// ============================================================================

/// Response body for a pick.
#[derive(Debug, Serialize, Deserialize)]
pub struct PickResponse {
    pub ok: bool,
    /// Distinct files chosen.
    pub count: usize,
}

/// POST /sessions/pick - Open and attribute files chosen in a native dialog.
///
/// Accepts the same body as `POST /sessions/start`. Works whether or not a
/// session is running. A cancelled dialog answers `count: 0`.
async fn post_pick(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PickResponse>, IpcError> {
    let request: StartRequest = parse_body(&headers, &body)?;

    let count = state
        .tracker
        .pick_and_track(
            &request.task_id,
            &request.auth_token,
            Arc::clone(&state.picker),
            Some(Arc::clone(&state.opener)),
        )
        .await?;

    Ok(Json(PickResponse { ok: true, count }))
}

// ============================================================================
// POST /sessions/open
// ============================================================================

/// Request body for opening one file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    #[serde(default)]
    pub task_id: String,

    #[serde(default, alias = "token")]
    pub auth_token: String,

    #[serde(default)]
    pub path: String,
}

/// Response body for an opened file.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenResponse {
    pub ok: bool,
    pub path: String,
}

/// POST /sessions/open - Open one file and attribute it to a task.
///
/// # Responses
///
/// - `200 OK` - `{ "ok": true, "path": "..." }`
/// - `400 Bad Request` - Missing arguments, or a path that is not absolute
/// - `500 Internal Server Error` - The platform opener could not be started
async fn post_open(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OpenResponse>, IpcError> {
    let request: OpenRequest = parse_body(&headers, &body)?;

    state
        .tracker
        .open_and_track(
            &request.task_id,
            &request.auth_token,
            &request.path,
            state.opener.as_ref(),
        )
        .await?;

    Ok(Json(OpenResponse {
        ok: true,
        path: request.path.trim().to_string(),
    }))
}

// ============================================================================
// GET /events - WebSocket Subscription
// ============================================================================

/// Query parameters for the event stream.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQueryParams {
    /// Only events for this task.
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,

    /// Only events of this type.
    #[serde(rename = "type")]
    pub event_type: Option<EventKind>,
}

impl EventsQueryParams {
    /// Builds a `SubscriberFilter` from the query parameters.
    fn to_filter(&self) -> SubscriberFilter {
        let mut filter = SubscriberFilter::new();

        if let Some(ref task_id) = self.task_id {
            filter = filter.with_task_id(task_id.clone());
        }

        if let Some(kind) = self.event_type {
            filter = filter.with_event_kind(kind);
        }

        filter
    }
}

/// GET /events - WebSocket stream of tracker events.
///
/// Each matching [`contextflow_tracker::TrackerEvent`] is sent as a JSON text
/// message tagged with `type` (`fileDiscovered`, `fileTracked`, `trackFailed`).
async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQueryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let filter = params.to_filter();
    info!(filter = ?filter, "Event subscriber connecting");

    ws.on_upgrade(move |socket| handle_websocket(socket, state.tracker, filter))
}

/// Forwards matching tracker events to an established WebSocket.
async fn handle_websocket(
    socket: axum::extract::ws::WebSocket,
    tracker: Arc<SessionTracker>,
    filter: SubscriberFilter,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = tracker.subscribe();
    drop(tracker);

    info!("Event subscriber connected");

    let forward_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }

                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            trace!(kind = event.kind(), task_id = event.task_id(), "Sending event");
                            if let Err(err) = sender.send(Message::Text(json.into())).await {
                                debug!(error = %err, "Failed to send event to subscriber");
                                break;
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "Failed to serialize event");
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event subscriber lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("Subscriber sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    info!("Event subscriber disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Task ids with a running session.
    pub active_sessions: Vec<String>,

    /// Number of live event subscribers.
    pub connections: usize,

    /// Track-file calls queued or in flight.
    pub pending_tracks: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.tracker.active_tasks().await,
        connections: state.tracker.subscriber_count(),
        pending_tracks: state.tracker.pending(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
