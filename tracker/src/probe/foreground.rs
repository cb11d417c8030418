//! Platform-specific foreground-window queries.
//!
//! Windows asks the window manager directly. macOS goes through System Events
//! via `osascript`, X11 desktops through `xdotool`. Helper tools are killed
//! once [`WINDOW_TIMEOUT`](super::WINDOW_TIMEOUT) passes.

use super::ProbeError;

/// Focused window as reported by the platform, before process lookup.
#[derive(Debug)]
pub(super) struct RawWindow {
    pub title: String,
    pub pid: Option<u32>,
    pub process_name: Option<String>,
}

#[cfg(windows)]
pub(super) fn query() -> Result<Option<RawWindow>, ProbeError> {
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    let mut buffer = [0u16; 1024];
    let mut pid: u32 = 0;

    // SAFETY: the handle comes straight from the window manager and the buffer
    // length passed matches the allocation.
    let len = unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd == 0 {
            return Ok(None);
        }
        GetWindowThreadProcessId(hwnd, &mut pid);
        GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32)
    };

    let len = usize::try_from(len).unwrap_or(0);
    Ok(Some(RawWindow {
        title: String::from_utf16_lossy(&buffer[..len]),
        pid: (pid != 0).then_some(pid),
        process_name: None,
    }))
}

#[cfg(target_os = "macos")]
pub(super) fn query() -> Result<Option<RawWindow>, ProbeError> {
    const SCRIPT: &str = r#"
tell application "System Events"
    set frontApp to first application process whose frontmost is true
    set appName to name of frontApp
    set winTitle to ""
    try
        set winTitle to name of front window of frontApp
    end try
end tell
return appName & linefeed & winTitle"#;

    let output = run("osascript", &["-e", SCRIPT])?;
    let mut lines = output.lines();
    let app = lines.next().unwrap_or_default().trim().to_string();
    let title = lines.next().unwrap_or_default().trim().to_string();

    if app.is_empty() && title.is_empty() {
        return Ok(None);
    }

    Ok(Some(RawWindow {
        title,
        pid: None,
        process_name: (!app.is_empty()).then_some(app),
    }))
}

#[cfg(all(unix, not(target_os = "macos")))]
pub(super) fn query() -> Result<Option<RawWindow>, ProbeError> {
    // Chained: prints the pid line, then the title line.
    let output = run("xdotool", &["getactivewindow", "getwindowpid", "getwindowname"])?;
    Ok(parse_xdotool(&output))
}

#[cfg(not(any(windows, unix)))]
pub(super) fn query() -> Result<Option<RawWindow>, ProbeError> {
    Err(ProbeError::Unsupported("foreground window"))
}

#[cfg(any(test, all(unix, not(target_os = "macos"))))]
fn parse_xdotool(output: &str) -> Option<RawWindow> {
    let mut lines = output.lines();
    let first = lines.next()?.trim();

    // Windows without _NET_WM_PID make xdotool skip the pid line.
    match first.parse::<u32>() {
        Ok(pid) => Some(RawWindow {
            title: lines.next().unwrap_or_default().trim_end().to_string(),
            pid: Some(pid),
            process_name: None,
        }),
        Err(_) => Some(RawWindow {
            title: first.to_string(),
            pid: None,
            process_name: None,
        }),
    }
}

#[cfg(unix)]
fn run(program: &str, args: &[&str]) -> Result<String, ProbeError> {
    use crate::command::{output_within, CommandError};

    let output = output_within(program, args, super::WINDOW_TIMEOUT).map_err(|e| match e {
        CommandError::TimedOut { millis, .. } => ProbeError::Timeout { millis },
        CommandError::Spawn { .. } => ProbeError::Command {
            command: program.to_string(),
            message: e.to_string(),
        },
    })?;

    if !output.status.success() {
        return Err(ProbeError::Command {
            command: program.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdotool_output_with_pid() {
        let raw = parse_xdotool("4242\nnotes.md - ~/work - Visual Studio Code\n").unwrap();
        assert_eq!(raw.pid, Some(4242));
        assert_eq!(raw.title, "notes.md - ~/work - Visual Studio Code");
    }

    #[test]
    fn xdotool_output_without_pid() {
        let raw = parse_xdotool("Terminal\n").unwrap();
        assert_eq!(raw.pid, None);
        assert_eq!(raw.title, "Terminal");
    }

    #[test]
    fn xdotool_empty_output() {
        assert!(parse_xdotool("").is_none());
    }
}
