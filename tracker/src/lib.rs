//! ContextFlow Tracker - desktop file-activity tracking for task sessions.
//!
//! While a task session is active the tracker polls three OS signals and
//! attributes the files and applications the user touches to that task:
//!
//! - shortcuts appearing in the OS recent-items folder
//! - file paths encoded in the focused window's title
//! - executables launched after the session started
//!
//! Each newly seen path is broadcast to subscribers and recorded in the
//! ContextFlow Task Store. Files tracked earlier can be reopened in one go to
//! resume a task.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for tracker operations
//! - [`types`]: Event and wire types
//! - [`shortcut`]: Windows shell link (`.lnk`) parsing
//! - [`probe`]: OS probes behind the [`PlatformProbe`] trait
//! - [`recent`]: Recent-items baseline and change detection
//! - [`window`]: Window title path extraction
//! - [`process`]: Process baseline and system-process filtering
//! - [`session`]: Session registry and scanner orchestration
//! - [`store`]: Task Store HTTP client with retry
//! - [`forwarder`]: Outbound track-file queue
//! - [`launcher`]: Reopening files with their default applications
//! - [`picker`]: Native file picker

mod command;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod launcher;
pub mod picker;
pub mod probe;
pub mod process;
pub mod recent;
pub mod session;
pub mod shortcut;
pub mod store;
pub mod types;
pub mod window;

pub use config::{Config, ConfigError, ScanIntervals};
pub use error::{Result, TrackerError};
pub use launcher::{
    check_open_path, resume_open, resume_task, LaunchError, Opener, RecordingOpener, ResumeReport, SharedOpener,
    SystemOpener,
};
pub use picker::{FilePicker, FixedPicker, PickError, SharedPicker, SystemPicker};
pub use probe::{PlatformProbe, ProbeError, ScriptedProbe, SharedProbe, SystemProbe};
pub use session::{SessionError, SessionInfo, SessionTracker, TrackerSettings};
pub use store::{RetryPolicy, StoreError, TaskStoreClient};
pub use types::{DiscoveredFileEvent, FileSource, ResumeFile, ResumeFiles, TrackerEvent};
