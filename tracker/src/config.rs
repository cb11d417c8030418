//! Configuration module for ContextFlow Tracker.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CONTEXTFLOW_BACKEND_URL` | No | `http://localhost:3001` | Task Store base URL |
//! | `CONTEXTFLOW_RECENT_DIR` | No | Windows Recent folder | Shortcut directory to scan |
//! | `CONTEXTFLOW_RECENT_INTERVAL_MS` | No | 2000 | Recent-items scan interval |
//! | `CONTEXTFLOW_WINDOW_INTERVAL_MS` | No | 2000 | Foreground-window scan interval |
//! | `CONTEXTFLOW_PROCESS_INTERVAL_MS` | No | 4000 | Process scan interval |
//! | `CONTEXTFLOW_RESUME_DELAY_MS` | No | 250 | Delay between files opened on resume |
//! | `CONTEXTFLOW_BUFFER_SIZE` | No | 1000 | Outbound queue and event channel capacity |
//! | `CONTEXTFLOW_TRACK_RETRY_LIMIT` | No | 3 | Max track-file attempts (1-10) |
//! | `CONTEXTFLOW_EDITOR_TITLE_SUFFIXES` | No | - | Extra comma-separated editor title suffixes |
//! | `CONTEXTFLOW_PROCESS_DENYLIST` | No | - | Extra comma-separated process names to ignore |
//!
//! # Example
//!
//! ```no_run
//! use contextflow_tracker::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Backend URL: {}", config.backend_url);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default Task Store base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";

/// Default recent-items scan interval in milliseconds.
const DEFAULT_RECENT_INTERVAL_MS: u64 = 2000;

/// Default foreground-window scan interval in milliseconds.
const DEFAULT_WINDOW_INTERVAL_MS: u64 = 2000;

/// Default process scan interval in milliseconds.
const DEFAULT_PROCESS_INTERVAL_MS: u64 = 4000;

/// Default delay between files opened by `resume_open`.
const DEFAULT_RESUME_DELAY_MS: u64 = 250;

/// Default outbound queue capacity.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default number of track-file attempts.
const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Minimum allowed retry limit.
const MIN_RETRY_LIMIT: u8 = 1;

/// Maximum allowed retry limit.
const MAX_RETRY_LIMIT: u8 = 10;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Scan intervals for the three session scanners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanIntervals {
    /// Recent-items shortcut scan.
    pub recent: Duration,
    /// Foreground-window title scan.
    pub window: Duration,
    /// Running-process scan.
    pub process: Duration,
}

impl Default for ScanIntervals {
    fn default() -> Self {
        Self {
            recent: Duration::from_millis(DEFAULT_RECENT_INTERVAL_MS),
            window: Duration::from_millis(DEFAULT_WINDOW_INTERVAL_MS),
            process: Duration::from_millis(DEFAULT_PROCESS_INTERVAL_MS),
        }
    }
}

/// Configuration for the ContextFlow Tracker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Task Store base URL, without a trailing slash.
    pub backend_url: String,

    /// Directory holding the OS recent-items shortcuts.
    /// If `None`, the recent-items scanner always sees zero shortcuts.
    pub recent_dir: Option<PathBuf>,

    /// Scanner tick intervals.
    pub intervals: ScanIntervals,

    /// Delay between consecutive opens during resume.
    pub resume_delay: Duration,

    /// Capacity of the outbound track queue and the event channel.
    pub buffer_size: usize,

    /// Maximum attempts per track-file call.
    pub retry_limit: u8,

    /// Editor window title suffixes recognised in addition to the built-in ones.
    pub extra_title_suffixes: Vec<String>,

    /// Process names ignored in addition to the built-in system denylist.
    pub extra_process_denylist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            recent_dir: default_recent_dir(),
            intervals: ScanIntervals::default(),
            resume_delay: Duration::from_millis(DEFAULT_RESUME_DELAY_MS),
            buffer_size: DEFAULT_BUFFER_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            extra_title_suffixes: Vec::new(),
            extra_process_denylist: Vec::new(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// Every variable is optional; unset variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a numeric variable cannot be parsed, is zero,
    /// or (for the retry limit) falls outside `1..=10`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_url = env::var("CONTEXTFLOW_BACKEND_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

        let recent_dir = env::var("CONTEXTFLOW_RECENT_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .or_else(default_recent_dir);

        let intervals = ScanIntervals {
            recent: parse_millis("CONTEXTFLOW_RECENT_INTERVAL_MS", DEFAULT_RECENT_INTERVAL_MS)?,
            window: parse_millis("CONTEXTFLOW_WINDOW_INTERVAL_MS", DEFAULT_WINDOW_INTERVAL_MS)?,
            process: parse_millis(
                "CONTEXTFLOW_PROCESS_INTERVAL_MS",
                DEFAULT_PROCESS_INTERVAL_MS,
            )?,
        };

        let resume_delay = parse_millis("CONTEXTFLOW_RESUME_DELAY_MS", DEFAULT_RESUME_DELAY_MS)?;

        let buffer_size = match env::var("CONTEXTFLOW_BUFFER_SIZE") {
            Ok(val) => {
                let size = val
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "CONTEXTFLOW_BUFFER_SIZE".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "CONTEXTFLOW_BUFFER_SIZE".to_string(),
                        message: "buffer size must be greater than 0".to_string(),
                    });
                }
                size
            }
            Err(_) => DEFAULT_BUFFER_SIZE,
        };

        let retry_limit = match env::var("CONTEXTFLOW_TRACK_RETRY_LIMIT") {
            Ok(val) => {
                let limit = val.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
                    key: "CONTEXTFLOW_TRACK_RETRY_LIMIT".to_string(),
                    message: format!("expected integer 1-10, got '{val}'"),
                })?;
                if !(MIN_RETRY_LIMIT..=MAX_RETRY_LIMIT).contains(&limit) {
                    return Err(ConfigError::InvalidValue {
                        key: "CONTEXTFLOW_TRACK_RETRY_LIMIT".to_string(),
                        message: format!(
                            "retry limit must be between {MIN_RETRY_LIMIT} and {MAX_RETRY_LIMIT}, got {limit}"
                        ),
                    });
                }
                limit
            }
            Err(_) => DEFAULT_RETRY_LIMIT,
        };

        Ok(Self {
            backend_url,
            recent_dir,
            intervals,
            resume_delay,
            buffer_size,
            retry_limit,
            extra_title_suffixes: parse_list("CONTEXTFLOW_EDITOR_TITLE_SUFFIXES"),
            extra_process_denylist: parse_list("CONTEXTFLOW_PROCESS_DENYLIST"),
        })
    }
}

/// Reads the Task Store bearer token used by the headless CLI.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if `CONTEXTFLOW_AUTH_TOKEN` is unset or blank.
pub fn auth_token_from_env() -> Result<String, ConfigError> {
    env::var("CONTEXTFLOW_AUTH_TOKEN")
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar("CONTEXTFLOW_AUTH_TOKEN".to_string()))
}

/// Returns the platform's recent-items shortcut folder, if it has one.
///
/// Only Windows keeps a shortcut-based recent-files record
/// (`%APPDATA%\Microsoft\Windows\Recent`).
#[must_use]
pub fn default_recent_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        directories::BaseDirs::new().map(|dirs| {
            dirs.data_dir()
                .join("Microsoft")
                .join("Windows")
                .join("Recent")
        })
    } else {
        None
    }
}

/// Parses a positive millisecond duration from an environment variable.
fn parse_millis(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let millis = match env::var(key) {
        Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected positive integer, got '{val}'"),
        })?,
        Err(_) => default,
    };

    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be at least 1 millisecond".to_string(),
        });
    }

    Ok(Duration::from_millis(millis))
}

/// Parses a comma-separated list, dropping empty entries.
fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|val| {
            val.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all CONTEXTFLOW_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("CONTEXTFLOW_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("CONTEXTFLOW_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_defaults_when_nothing_set() {
        with_clean_env(|| {
            let config = Config::from_env().expect("should parse empty environment");

            assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
            assert_eq!(config.intervals, ScanIntervals::default());
            assert_eq!(config.resume_delay, Duration::from_millis(250));
            assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
            assert_eq!(config.retry_limit, DEFAULT_RETRY_LIMIT);
            assert!(config.extra_title_suffixes.is_empty());
            assert!(config.extra_process_denylist.is_empty());
            assert_eq!(config.recent_dir, default_recent_dir());
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_BACKEND_URL", "https://api.contextflow.dev/");
            env::set_var("CONTEXTFLOW_RECENT_DIR", "/custom/recent");
            env::set_var("CONTEXTFLOW_RECENT_INTERVAL_MS", "1500");
            env::set_var("CONTEXTFLOW_WINDOW_INTERVAL_MS", "1000");
            env::set_var("CONTEXTFLOW_PROCESS_INTERVAL_MS", "5000");
            env::set_var("CONTEXTFLOW_RESUME_DELAY_MS", "100");
            env::set_var("CONTEXTFLOW_BUFFER_SIZE", "64");
            env::set_var("CONTEXTFLOW_TRACK_RETRY_LIMIT", "1");
            env::set_var("CONTEXTFLOW_EDITOR_TITLE_SUFFIXES", " - Sublime Text, - Notepad++");
            env::set_var("CONTEXTFLOW_PROCESS_DENYLIST", "slack.exe,,teams.exe");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.backend_url, "https://api.contextflow.dev");
            assert_eq!(config.recent_dir, Some(PathBuf::from("/custom/recent")));
            assert_eq!(config.intervals.recent, Duration::from_millis(1500));
            assert_eq!(config.intervals.window, Duration::from_millis(1000));
            assert_eq!(config.intervals.process, Duration::from_millis(5000));
            assert_eq!(config.resume_delay, Duration::from_millis(100));
            assert_eq!(config.buffer_size, 64);
            assert_eq!(config.retry_limit, 1);
            assert_eq!(
                config.extra_title_suffixes,
                vec!["- Sublime Text".to_string(), "- Notepad++".to_string()]
            );
            assert_eq!(
                config.extra_process_denylist,
                vec!["slack.exe".to_string(), "teams.exe".to_string()]
            );
        });
    }

    #[test]
    #[serial]
    fn test_invalid_interval_rejected() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_WINDOW_INTERVAL_MS", "soon");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "CONTEXTFLOW_WINDOW_INTERVAL_MS"
            ));
        });
    }

    #[test]
    #[serial]
    fn test_zero_interval_rejected() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_PROCESS_INTERVAL_MS", "0");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "CONTEXTFLOW_PROCESS_INTERVAL_MS" && message.contains("at least 1")
            ));
        });
    }

    #[test]
    #[serial]
    fn test_zero_buffer_size_rejected() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_BUFFER_SIZE", "0");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "CONTEXTFLOW_BUFFER_SIZE" && message.contains("greater than 0")
            ));
        });
    }

    #[test]
    #[serial]
    fn test_retry_limit_out_of_range_rejected() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_TRACK_RETRY_LIMIT", "11");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "CONTEXTFLOW_TRACK_RETRY_LIMIT" && message.contains("between 1 and 10")
            ));
        });
    }

    #[test]
    #[serial]
    fn test_missing_auth_token() {
        with_clean_env(|| {
            let err = auth_token_from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref s) if s == "CONTEXTFLOW_AUTH_TOKEN"));

            env::set_var("CONTEXTFLOW_AUTH_TOKEN", "  ");
            assert!(auth_token_from_env().is_err());

            env::set_var("CONTEXTFLOW_AUTH_TOKEN", " secret ");
            assert_eq!(auth_token_from_env().unwrap(), "secret");
        });
    }

    #[test]
    #[serial]
    fn test_blank_recent_dir_falls_back_to_default() {
        with_clean_env(|| {
            env::set_var("CONTEXTFLOW_RECENT_DIR", "   ");

            let config = Config::from_env().expect("should parse");
            assert_eq!(config.recent_dir, default_recent_dir());
        });
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "CONTEXTFLOW_BUFFER_SIZE".to_string(),
            message: "expected positive integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for CONTEXTFLOW_BUFFER_SIZE: expected positive integer"
        );
    }
}
