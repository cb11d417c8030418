//! ContextFlow IPC - local bridge between the desktop UI and the tracker.
//!
//! This crate exposes the tracker's session operations over HTTP on the
//! loopback interface and streams tracker events to the UI over a WebSocket:
//! - Starting and ending task sessions
//! - Reopening a task's files
//! - Opening files, singly or from a native dialog, and attributing them
//! - Relaying `fileDiscovered` / `fileTracked` / `trackFailed` events
//!
//! The server holds no state of its own beyond the tracker; everything
//! durable lives in the Task Store. Every request must carry the token the
//! server was started with (see [`auth`]).

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod routes;
