//! Windows Shell Link (`.lnk`) target resolution.
//!
//! The OS recent-items folder is a directory of shortcut files, one per
//! recently opened document. This module reads the binary Shell Link format
//! just far enough to recover the target path:
//!
//! ```text
//! ShellLinkHeader (0x4C bytes, LinkFlags at 0x14)
//! [LinkTargetIDList]   u16 size + opaque item IDs      (HasLinkTargetIDList)
//! [LinkInfo]           local base path / network share (HasLinkInfo)
//! [StringData]         NAME, RELATIVE_PATH, WORKING_DIR, ... (counted strings)
//! ```
//!
//! The `LinkInfo` local base path (plus common path suffix) is preferred. When
//! a shortcut has no `LinkInfo`, the working directory joined with the relative
//! path's file name is used instead. Anything else is reported as
//! [`ShortcutError::NoTarget`] and callers skip the candidate.
//!
//! Parsing is synchronous and pure; the bounded wait lives in the probe layer
//! (see [`crate::probe::run_bounded`]).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use contextflow_tracker::shortcut::read_shortcut_target;
//!
//! let target = read_shortcut_target(Path::new(r"C:\Users\me\Recent\report.lnk"))?;
//! println!("{target}");
//! # Ok::<(), contextflow_tracker::shortcut::ShortcutError>(())
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Upper bound on how long shortcut resolution may take before it counts as unresolved.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// File extension of shortcut files, compared case-insensitively.
pub const SHORTCUT_EXTENSION: &str = "lnk";

/// Fixed size of the ShellLinkHeader.
const HEADER_SIZE: usize = 0x4C;

/// Shell Link class identifier `00021401-0000-0000-C000-000000000046`.
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];

/// Shortcuts are tiny; anything larger is not worth reading.
const MAX_SHORTCUT_BYTES: u64 = 1024 * 1024;

const HAS_LINK_TARGET_ID_LIST: u32 = 0x0000_0001;
const HAS_LINK_INFO: u32 = 0x0000_0002;
const HAS_NAME: u32 = 0x0000_0004;
const HAS_RELATIVE_PATH: u32 = 0x0000_0008;
const HAS_WORKING_DIR: u32 = 0x0000_0010;
const IS_UNICODE: u32 = 0x0000_0080;

const VOLUME_ID_AND_LOCAL_BASE_PATH: u32 = 0x0000_0001;
const COMMON_NETWORK_RELATIVE_LINK_AND_PATH_SUFFIX: u32 = 0x0000_0002;

/// LinkInfo headers at least this long carry Unicode path offsets.
const LINK_INFO_UNICODE_HEADER_SIZE: usize = 0x24;

/// Errors that can occur while reading a shortcut.
#[derive(Error, Debug)]
pub enum ShortcutError {
    /// The shortcut file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The data is shorter than a ShellLinkHeader.
    #[error("shortcut too short: {0} bytes")]
    TooShort(usize),

    /// The header size or class identifier does not match a Shell Link.
    #[error("not a shell link file")]
    InvalidHeader,

    /// A structure points past the end of the data.
    #[error("truncated shortcut: {0}")]
    Truncated(&'static str),

    /// The shortcut parsed but carries no usable target path.
    #[error("shortcut has no resolvable target")]
    NoTarget,
}

type Result<T> = std::result::Result<T, ShortcutError>;

/// Returns true if `path` has a `.lnk` extension.
#[must_use]
pub fn is_shortcut(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SHORTCUT_EXTENSION))
}

/// Reads a shortcut file from disk and returns its target path.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not contain a
/// resolvable Shell Link.
pub fn read_shortcut_target(path: &Path) -> Result<String> {
    let mut data = Vec::new();
    File::open(path)?
        .take(MAX_SHORTCUT_BYTES)
        .read_to_end(&mut data)?;
    parse_shortcut(&data)
}

/// Parses Shell Link bytes and returns the target path.
///
/// # Errors
///
/// Returns an error if the header is invalid, a structure is truncated, or no
/// target can be recovered.
pub fn parse_shortcut(data: &[u8]) -> Result<String> {
    if data.len() < HEADER_SIZE {
        return Err(ShortcutError::TooShort(data.len()));
    }
    if read_u32(data, 0)? as usize != HEADER_SIZE || data[4..20] != LINK_CLSID {
        return Err(ShortcutError::InvalidHeader);
    }

    let link_flags = read_u32(data, 0x14)?;
    let mut offset = HEADER_SIZE;

    if link_flags & HAS_LINK_TARGET_ID_LIST != 0 {
        let id_list_size = read_u16(data, offset)? as usize;
        offset += 2 + id_list_size;
    }

    let mut target = None;
    if link_flags & HAS_LINK_INFO != 0 {
        let rest = data
            .get(offset..)
            .ok_or(ShortcutError::Truncated("link info"))?;
        let info_size = read_u32(rest, 0)? as usize;
        let info = rest
            .get(..info_size)
            .ok_or(ShortcutError::Truncated("link info"))?;
        target = parse_link_info(info)?;
        offset += info_size;
    }

    if target.is_none() {
        target = parse_string_data(data, offset, link_flags)?;
    }

    target
        .filter(|path| !path.is_empty())
        .ok_or(ShortcutError::NoTarget)
}

fn parse_link_info(info: &[u8]) -> Result<Option<String>> {
    let header_size = read_u32(info, 4)? as usize;
    let info_flags = read_u32(info, 8)?;
    let has_unicode = header_size >= LINK_INFO_UNICODE_HEADER_SIZE;

    let suffix = match unicode_offset(info, has_unicode, 0x20)? {
        Some(off) => wide_string_at(info, off)?,
        None => ansi_string_at(info, read_u32(info, 0x18)? as usize)?,
    };

    if info_flags & VOLUME_ID_AND_LOCAL_BASE_PATH != 0 {
        let base = match unicode_offset(info, has_unicode, 0x1C)? {
            Some(off) => wide_string_at(info, off)?,
            None => ansi_string_at(info, read_u32(info, 0x10)? as usize)?,
        };
        return Ok(Some(join_suffix(base, &suffix)));
    }

    if info_flags & COMMON_NETWORK_RELATIVE_LINK_AND_PATH_SUFFIX != 0 {
        let link_offset = read_u32(info, 0x14)? as usize;
        let link = info
            .get(link_offset..)
            .ok_or(ShortcutError::Truncated("network link"))?;
        let net_name = ansi_string_at(link, read_u32(link, 8)? as usize)?;
        return Ok(Some(join_suffix(net_name, &suffix)));
    }

    Ok(None)
}

/// Returns the Unicode string offset stored at `field`, if the header has one.
fn unicode_offset(info: &[u8], has_unicode: bool, field: usize) -> Result<Option<usize>> {
    if !has_unicode {
        return Ok(None);
    }
    let off = read_u32(info, field)? as usize;
    Ok((off != 0).then_some(off))
}

fn parse_string_data(data: &[u8], mut offset: usize, link_flags: u32) -> Result<Option<String>> {
    let unicode = link_flags & IS_UNICODE != 0;
    let mut relative_path = None;
    let mut working_dir = None;

    for flag in [HAS_NAME, HAS_RELATIVE_PATH, HAS_WORKING_DIR] {
        if link_flags & flag == 0 {
            continue;
        }
        let (value, next) = read_counted_string(data, offset, unicode)?;
        offset = next;
        match flag {
            HAS_RELATIVE_PATH => relative_path = Some(value),
            HAS_WORKING_DIR => working_dir = Some(value),
            _ => {}
        }
    }

    Ok(match (working_dir, relative_path) {
        (Some(dir), Some(relative)) if !dir.is_empty() => {
            let name = relative
                .rsplit(|c| c == '\\' || c == '/')
                .next()
                .unwrap_or(relative.as_str());
            if name.is_empty() {
                None
            } else {
                Some(join_suffix(dir, name))
            }
        }
        _ => None,
    })
}

fn join_suffix(base: String, suffix: &str) -> String {
    if suffix.is_empty() {
        base
    } else if base.ends_with('\\') || base.ends_with('/') {
        format!("{base}{suffix}")
    } else {
        format!("{base}\\{suffix}")
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(ShortcutError::Truncated("u16 field"))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ShortcutError::Truncated("u32 field"))
}

/// Reads a NUL-terminated string in the system code page (decoded lossily).
fn ansi_string_at(data: &[u8], offset: usize) -> Result<String> {
    let bytes = data
        .get(offset..)
        .ok_or(ShortcutError::Truncated("string"))?;
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(ShortcutError::Truncated("unterminated string"))?;
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Reads a NUL-terminated UTF-16LE string.
fn wide_string_at(data: &[u8], offset: usize) -> Result<String> {
    let bytes = data
        .get(offset..)
        .ok_or(ShortcutError::Truncated("wide string"))?;
    let mut units = Vec::new();
    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        if unit == 0 {
            return Ok(String::from_utf16_lossy(&units));
        }
        units.push(unit);
    }
    Err(ShortcutError::Truncated("unterminated wide string"))
}

/// Reads a StringData entry: a u16 character count followed by the characters.
fn read_counted_string(data: &[u8], offset: usize, unicode: bool) -> Result<(String, usize)> {
    let count = read_u16(data, offset)? as usize;
    let start = offset + 2;
    let byte_len = if unicode { count * 2 } else { count };
    let bytes = data
        .get(start..start + byte_len)
        .ok_or(ShortcutError::Truncated("string data"))?;

    let value = if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };

    Ok((value, start + byte_len))
}
