//! IPC server configuration.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CONTEXTFLOW_IPC_PORT` | No | 17321 | Port bound on 127.0.0.1 |
//! | `CONTEXTFLOW_IPC_TOKEN` | No | generated | Shared secret every request must carry, at least 16 characters |
//! | `CONTEXTFLOW_IPC_ORIGINS` | No | `http://localhost:3000` | Comma-separated browser origins allowed by CORS |
//!
//! Every `CONTEXTFLOW_*` tracker variable (backend URL, scan intervals, resume
//! delay, ...) is read as well; see `contextflow_tracker::config`.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};

use crate::error::ConfigError;

/// Default IPC port.
pub const DEFAULT_PORT: u16 = 17321;

/// Origin of the desktop UI's renderer.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Shortest accepted `CONTEXTFLOW_IPC_TOKEN`.
const MIN_TOKEN_LEN: usize = 16;

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Loopback port the UI connects to.
    pub port: u16,

    /// Shared secret from the environment. `None` means one is generated at startup.
    pub api_token: Option<String>,

    /// Browser origins allowed to call the server.
    pub allowed_origins: Vec<String>,

    /// Tracker settings shared with the headless CLI.
    pub tracker: contextflow_tracker::Config,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the port or any tracker variable is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_port()?,
            api_token: parse_token()?,
            allowed_origins: parse_origins()?,
            tracker: contextflow_tracker::Config::from_env()?,
        })
    }

    /// Address the server binds to. Always loopback.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

fn parse_port() -> Result<u16, ConfigError> {
    match env::var("CONTEXTFLOW_IPC_PORT") {
        Ok(value) => match value.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid {
                key: "CONTEXTFLOW_IPC_PORT".to_string(),
                reason: "must be between 1 and 65535".to_string(),
            }),
            Ok(port) => Ok(port),
        },
        Err(_) => Ok(DEFAULT_PORT),
    }
}

fn parse_token() -> Result<Option<String>, ConfigError> {
    let Ok(value) = env::var("CONTEXTFLOW_IPC_TOKEN") else {
        return Ok(None);
    };
    let token = value.trim();
    if token.len() < MIN_TOKEN_LEN {
        return Err(ConfigError::Invalid {
            key: "CONTEXTFLOW_IPC_TOKEN".to_string(),
            reason: format!("must be at least {MIN_TOKEN_LEN} characters"),
        });
    }
    Ok(Some(token.to_string()))
}

fn parse_origins() -> Result<Vec<String>, ConfigError> {
    let Ok(value) = env::var("CONTEXTFLOW_IPC_ORIGINS") else {
        return Ok(vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);
    };

    let origins: Vec<String> = value
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() {
        return Err(ConfigError::Invalid {
            key: "CONTEXTFLOW_IPC_ORIGINS".to_string(),
            reason: "must list at least one origin".to_string(),
        });
    }
    if let Some(bad) = origins
        .iter()
        .find(|o| !(o.starts_with("http://") || o.starts_with("https://")) || o.contains('*'))
    {
        return Err(ConfigError::Invalid {
            key: "CONTEXTFLOW_IPC_ORIGINS".to_string(),
            reason: format!("'{bad}' is not an http(s) origin"),
        });
    }
    Ok(origins)
}
