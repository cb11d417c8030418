//! Helper programs run with a deadline.
//!
//! Probes and the picker shell out to tools such as `xdotool`, `osascript` or
//! `zenity`. A tool that hangs must not pin a blocking-pool thread forever, so
//! each run gets a deadline; when it passes the child is killed.
//!
//! [`output_within`] is synchronous. It is called from blocking-pool threads
//! (see [`run_bounded`](crate::probe::run_bounded)) and drives the child on the
//! surrounding Tokio runtime, falling back to a private one when there is none.

use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};

/// Errors from running a helper program.
#[derive(Error, Debug)]
pub(crate) enum CommandError {
    /// The program could not be started or waited on.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program was killed at the deadline.
    #[error("{program} did not finish within {millis}ms")]
    TimedOut { program: String, millis: u64 },
}

/// Runs `program` with `args`, collecting its output.
///
/// The child is killed if it has not exited within `deadline`. Must not be
/// called from async code; use a blocking-pool thread.
pub(crate) fn output_within(program: &str, args: &[&str], deadline: Duration) -> Result<Output, CommandError> {
    let spawn_error = |source| CommandError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let run = async {
        match tokio::time::timeout(deadline, command.output()).await {
            Ok(result) => result.map_err(spawn_error),
            Err(_) => Err(CommandError::TimedOut {
                program: program.to_string(),
                millis: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    };

    match Handle::try_current() {
        Ok(handle) => handle.block_on(run),
        Err(_) => Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(spawn_error)?
            .block_on(run),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread")]
    async fn hung_program_is_killed_at_deadline() {
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(|| output_within("sleep", &["5"], Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(matches!(result, Err(CommandError::TimedOut { millis: 100, .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finished_program_returns_output() {
        let output = tokio::task::spawn_blocking(|| output_within("echo", &["hello"], Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn works_without_a_runtime() {
        let output = output_within("true", &[], Duration::from_secs(5)).unwrap();
        assert!(output.status.success());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = output_within("contextflow-no-such-tool", &[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
