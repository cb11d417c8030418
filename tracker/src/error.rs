//! Error types for the ContextFlow Tracker.
//!
//! Each subsystem keeps its own focused error enum (`ProbeError`,
//! `StoreError`, ...) next to the code that produces it. [`TrackerError`] is
//! returned by the entry points that cross subsystems, such as
//! [`SessionTracker::from_config`](crate::session::SessionTracker::from_config)
//! and [`resume_task`](crate::launcher::resume_task).

use thiserror::Error;

use crate::session::SessionError;
use crate::store::StoreError;

/// Errors that can occur during tracker operations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Task Store communication failed.
    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    /// A session operation was rejected.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
