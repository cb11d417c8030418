//! HTTP client for the ContextFlow Task Store.
//!
//! The Task Store is the backend that owns tasks and their tracked files. The
//! tracker uses two endpoints:
//!
//! - `POST {base}/api/todos/{taskId}/files/track` records a discovered path
//! - `GET {base}/api/todos/{taskId}/resume` lists a task's files for resuming
//!
//! Both authenticate with a bearer token. Track calls are retried on transient
//! failures (connect errors, timeouts, 5xx, 429) with exponential backoff
//! (500ms → 8s, ±25% jitter); other 4xx responses fail immediately.
//!
//! # Example
//!
//! ```no_run
//! use contextflow_tracker::store::{RetryPolicy, TaskStoreClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = TaskStoreClient::new("http://localhost:3001", RetryPolicy::default()).unwrap();
//!     client.track_file("64f0c2", "C:\\docs\\report.docx", "token").await.unwrap();
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::{ResumeFiles, TrackFileRequest};

/// Initial retry delay.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Maximum retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Default number of attempts per track call.
const DEFAULT_MAX_ATTEMPTS: u8 = 3;

/// HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur talking to the Task Store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Task Store rejected the request.
    #[error("task store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The bearer token was rejected (401/403).
    #[error("authentication rejected by task store")]
    Unauthorized,

    /// Transient failures persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u8, last_error: String },

    /// The base URL could not be used.
    #[error("invalid task store URL: {0}")]
    InvalidUrl(String),
}

/// Backoff settings for track-file calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 disables retrying).
    pub max_attempts: u8,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Default delays with the given attempt count (clamped to at least 1).
    #[must_use]
    pub fn with_attempts(max_attempts: u8) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: INITIAL_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// Millisecond delays so tests exercising retries run quickly.
    #[must_use]
    pub fn fast(max_attempts: u8) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u8) -> Duration {
        let factor = 2u32.saturating_pow(u32::from(attempt.saturating_sub(1)));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Outcome of one HTTP attempt.
enum Attempt {
    Done,
    Retry { error: String, wait: Option<Duration> },
}

/// Task Store HTTP client.
#[derive(Debug, Clone)]
pub struct TaskStoreClient {
    base_url: Url,
    client: Client,
    retry: RetryPolicy,
}

impl TaskStoreClient {
    /// Creates a client for `base_url` (trailing `/` ignored).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] for a non-HTTP URL, or
    /// [`StoreError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, StoreError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base() => url,
            _ => return Err(StoreError::InvalidUrl(trimmed.to_string())),
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            base_url,
            client,
            retry,
        })
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Returns the retry policy for track calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Builds `{base}/api/todos/{task_id}/{tail}`, encoding `task_id` as a single segment.
    fn task_url(&self, task_id: &str, tail: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "todos", task_id])
            .extend(tail);
        Ok(url)
    }

    /// Records `path` against `task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unauthorized`] or [`StoreError::Status`] for
    /// rejected requests and [`StoreError::RetriesExhausted`] once transient
    /// failures used up every attempt.
    pub async fn track_file(&self, task_id: &str, path: &str, token: &str) -> Result<(), StoreError> {
        let url = self.task_url(task_id, &["files", "track"])?;
        let body = TrackFileRequest {
            task_id: task_id.to_string(),
            path: path.to_string(),
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            debug!(task_id, path, attempt, "Sending track-file request");

            let Attempt::Retry { error, wait } = self.try_track(&url, &body, token).await? else {
                return Ok(());
            };

            if attempt >= self.retry.max_attempts {
                return Err(StoreError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = wait.unwrap_or_else(|| add_jitter(self.retry.delay_for(attempt)));
            warn!(
                task_id,
                path,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Track-file failed, will retry"
            );
            sleep(delay).await;
        }
    }

    async fn try_track(&self, url: &Url, body: &TrackFileRequest, token: &str) -> Result<Attempt, StoreError> {
        let response = match self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Ok(Attempt::Retry {
                    error: e.to_string(),
                    wait: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Attempt::Done);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = parse_retry_after(&response).map(|d| d.min(self.retry.max_delay));
                Ok(Attempt::Retry {
                    error: "rate limited".to_string(),
                    wait,
                })
            }
            _ if status.is_server_error() => {
                let message = response.text().await.unwrap_or_default();
                Ok(Attempt::Retry {
                    error: format!("{}: {}", status.as_u16(), message),
                    wait: None,
                })
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(StoreError::Status {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Fetches the files tracked for `task_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the request fails or is rejected.
    pub async fn resume_files(&self, task_id: &str, token: &str) -> Result<ResumeFiles, StoreError> {
        let url = self.task_url(task_id, &["resume"])?;
        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut files: ResumeFiles = response.json().await?;
        files.sort_newest_first();
        Ok(files)
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Adds ±25% jitter to a duration.
fn add_jitter(duration: Duration) -> Duration {
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * JITTER_FACTOR;
    if range <= 0.0 {
        return duration;
    }
    let jitter = rng.random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_trailing_slash() {
        let client = TaskStoreClient::new("http://localhost:3001/", RetryPolicy::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3001");
        assert_eq!(
            client.task_url("abc", &["files", "track"]).unwrap().as_str(),
            "http://localhost:3001/api/todos/abc/files/track"
        );
    }

    #[test]
    fn task_id_is_a_single_encoded_segment() {
        let client = TaskStoreClient::new("http://localhost:3001", RetryPolicy::default()).unwrap();
        assert_eq!(
            client.task_url("a/b?c#d", &["resume"]).unwrap().as_str(),
            "http://localhost:3001/api/todos/a%2Fb%3Fc%23d/resume"
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let client = TaskStoreClient::new("https://example.com/store/", RetryPolicy::default()).unwrap();
        assert_eq!(
            client.task_url("t1", &["files", "track"]).unwrap().as_str(),
            "https://example.com/store/api/todos/t1/files/track"
        );
    }

    #[test]
    fn new_rejects_non_http_url() {
        let err = TaskStoreClient::new("localhost:3001", RetryPolicy::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUrl(_)));
    }

    #[test]
    fn retry_policy_clamps_attempts() {
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), Duration::from_secs(8));
    }

    #[test]
    fn add_jitter_stays_within_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..100 {
            let secs = add_jitter(base).as_secs_f64();
            assert!((3.0..=5.0).contains(&secs), "Jitter out of bounds: {}", secs);
        }
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::Status {
            status: 404,
            message: "Todo not found".to_string(),
        };
        assert_eq!(err.to_string(), "task store returned 404: Todo not found");

        let err = StoreError::RetriesExhausted {
            attempts: 3,
            last_error: "503: unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: 503: unavailable");
    }
}
