//! Error types for the ContextFlow IPC server.
//!
//! # Error Types
//!
//! - [`ConfigError`] - Configuration errors raised at startup
//! - [`IpcError`] - Request errors, rendered to the UI as `{ "ok": false, "error": ... }`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use contextflow_tracker::launcher::LaunchError;
use contextflow_tracker::session::SessionError;

use crate::auth::AuthError;

/// Errors that occur while loading the server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value failed to parse or is invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// The configuration key that has an invalid value.
        key: String,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// The embedded tracker configuration is invalid.
    #[error("tracker configuration: {0}")]
    Tracker(#[from] contextflow_tracker::ConfigError),
}

/// Errors returned by IPC request handlers.
#[derive(Error, Debug)]
pub enum IpcError {
    /// A session operation was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request did not carry the server token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request body is not declared as JSON.
    #[error("expected Content-Type: application/json")]
    UnsupportedMediaType,

    /// The request body or query string could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl IpcError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(
                SessionError::MissingTaskId
                | SessionError::MissingAuthToken
                | SessionError::Open(LaunchError::EmptyPath | LaunchError::InvalidPath { .. }),
            ) => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::Open(LaunchError::Refused(_))) => StatusCode::FORBIDDEN,
            Self::Session(SessionError::Pick(_) | SessionError::Open(LaunchError::Spawn { .. })) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Failure body sent to the UI.
#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl IntoResponse for IpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Request rejected");
        }

        let body = ErrorBody {
            ok: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
