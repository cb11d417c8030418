//! Shared-secret authentication for the IPC server.
//!
//! The server listens on loopback, but any local process or web page can reach
//! loopback ports. Every route therefore requires the token the desktop shell
//! received when it launched the server:
//!
//! - `Authorization: Bearer <token>` on any request
//! - `?token=<token>` on `GET` requests, since browsers cannot set headers on
//!   a WebSocket upgrade
//!
//! Tokens are compared in constant time.

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::error::IpcError;
use crate::routes::AppState;

/// Size of a generated token in random bytes.
pub const TOKEN_BYTES: usize = 32;

/// Why a request was not authenticated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing token")]
    MissingToken,

    /// The presented token does not match.
    #[error("invalid token")]
    InvalidToken,
}

/// Generates a random token, base64-url encoded without padding.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares `provided` against `expected` in constant time.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] for an empty token and
/// [`AuthError::InvalidToken`] for a mismatch.
pub fn validate_token(provided: &str, expected: &str) -> Result<(), AuthError> {
    if provided.is_empty() {
        return Err(AuthError::MissingToken);
    }
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Middleware rejecting requests without the server token.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, IpcError> {
    let provided = match bearer_token(request.headers()) {
        Some(token) => Some(token.to_string()),
        None if request.method() == Method::GET => Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(query)| query.token),
        None => None,
    };

    let Some(provided) = provided else {
        debug!(path = %request.uri().path(), "Request without token");
        return Err(AuthError::MissingToken.into());
    };
    validate_token(&provided, state.api_token())?;

    Ok(next.run(request).await)
}
