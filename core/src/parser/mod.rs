//! Parse `sc64deployer` text output into structured values.
//!
//! Everything here is pure and synchronous. Malformed listing lines are
//! skipped and reported as [`ParseWarning`]s rather than failing the call.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::{ErrorKind, ParseError};
use crate::models::{EntryKind, Listing, ParseWarning, RemoteEntry};
use crate::paths::file_name;

/// Size column printed by `sd ls` for directories.
const DIR_SIZE_DASHES: &str = "----";

/// Size column used by the compact listing shape for directories.
const DIR_SIZE_MARKER: &str = "<DIR>";

/// Unit suffixes and their multipliers.
const UNITS: [(char, u128); 3] = [('K', 1 << 10), ('M', 1 << 20), ('G', 1 << 30)];

/// Upper bound on digits accepted in a size token; keeps the math in `u128`.
const MAX_SIZE_DIGITS: usize = 30;

/// Parse a size token such as `482`, `512K`, `1.5M` or `8.0G` into bytes.
///
/// Units are binary (K = 1024). A fractional value needs a unit; any
/// remainder below one byte is truncated.
pub fn parse_size_token(token: &str) -> Result<u64, ParseError> {
    let fail = |reason| ParseError {
        token: token.to_string(),
        reason,
    };

    let trimmed = token.trim();
    let (number, multiplier) = match trimmed.chars().last() {
        None => return Err(fail("empty token")),
        Some(c) if c.is_ascii_digit() => (trimmed, None),
        Some(c) => {
            let mult = UNITS
                .iter()
                .find(|(unit, _)| *unit == c)
                .map(|(_, mult)| *mult)
                .ok_or_else(|| fail("unknown unit suffix"))?;
            (&trimmed[..trimmed.len() - c.len_utf8()], Some(mult))
        }
    };

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) if i.is_empty() || f.is_empty() => {
            return Err(fail("incomplete decimal number"))
        }
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() {
        return Err(fail("missing number"));
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(fail("not a decimal number"));
    }
    if int_part.len() + frac_part.len() > MAX_SIZE_DIGITS {
        return Err(fail("number too large"));
    }

    let Some(multiplier) = multiplier else {
        if !frac_part.is_empty() {
            return Err(fail("fractional byte count"));
        }
        return int_part.parse::<u64>().map_err(|_| fail("number too large"));
    };

    let digits: u128 = format!("{int_part}{frac_part}")
        .parse()
        .map_err(|_| fail("number too large"))?;
    let scale = 10u128.pow(frac_part.len() as u32);
    let bytes = digits
        .checked_mul(multiplier)
        .ok_or_else(|| fail("number too large"))?
        / scale;
    u64::try_from(bytes).map_err(|_| fail("number too large"))
}

/// Outcome of parsing a single listing line.
enum ParsedLine {
    Entry(RemoteEntry),
    Malformed(String),
}

/// Parse the output of a directory listing.
///
/// Entries keep the order of the input. Paths are reported as printed by the
/// tool; a bare name stays relative and is resolved by the caller.
pub fn parse_listing(stdout: &str) -> Listing {
    let mut listing = Listing::default();

    for (idx, raw) in stdout.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            ParsedLine::Entry(entry) => listing.entries.push(entry),
            ParsedLine::Malformed(_) if is_header_line(line) => {}
            ParsedLine::Malformed(reason) => listing.warnings.push(ParseWarning {
                line_number: idx + 1,
                line: line.to_string(),
                reason,
            }),
        }
    }

    listing
}

fn parse_line(line: &str) -> ParsedLine {
    if let Some((meta, path)) = line.split_once(" | ") {
        parse_native_line(meta, path.trim())
    } else {
        parse_compact_line(line)
    }
}

/// `d ---- 2025-08-01 15:13:48 | /Games` or `f 512K 2024-05-07 17:53:52 | menu.n64`
fn parse_native_line(meta: &str, path: &str) -> ParsedLine {
    let fields: Vec<&str> = meta.split_whitespace().collect();
    let [kind, size, date, time] = fields[..] else {
        return ParsedLine::Malformed(format!(
            "expected 4 fields before '|', got {}",
            fields.len()
        ));
    };
    if path.is_empty() {
        return ParsedLine::Malformed("missing path".to_string());
    }

    let kind = match kind {
        "d" => EntryKind::Directory,
        "f" => EntryKind::File,
        other => return ParsedLine::Malformed(format!("unknown entry type '{other}'")),
    };
    let size_bytes = match entry_size(kind, size) {
        Ok(bytes) => bytes,
        Err(e) => return ParsedLine::Malformed(e.to_string()),
    };
    let modified_at = match parse_timestamp(date, Some(time)) {
        Some(ts) => ts,
        None => return ParsedLine::Malformed(format!("invalid timestamp '{date} {time}'")),
    };

    ParsedLine::Entry(RemoteEntry {
        name: file_name(path).to_string(),
        path: path.to_string(),
        kind,
        size_bytes,
        size_text: size.to_string(),
        modified_at: Some(modified_at),
    })
}

/// `fileA 512 2024-01-01` or `dirB <DIR> 2024-01-02 10:15`
fn parse_compact_line(line: &str) -> ParsedLine {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if !(2..=4).contains(&fields.len()) {
        return ParsedLine::Malformed(format!("expected 2 to 4 fields, got {}", fields.len()));
    }
    let name = fields[0];
    let size = fields[1];

    let kind = if size.eq_ignore_ascii_case(DIR_SIZE_MARKER) {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let size_bytes = match entry_size(kind, size) {
        Ok(bytes) => bytes,
        Err(e) => return ParsedLine::Malformed(e.to_string()),
    };
    let modified_at = match fields.get(2) {
        None => None,
        Some(date) => match parse_timestamp(date, fields.get(3).copied()) {
            Some(ts) => Some(ts),
            None => return ParsedLine::Malformed(format!("invalid date '{date}'")),
        },
    };

    ParsedLine::Entry(RemoteEntry {
        name: file_name(name).to_string(),
        path: name.to_string(),
        kind,
        size_bytes,
        size_text: size.to_string(),
        modified_at,
    })
}

fn entry_size(kind: EntryKind, size: &str) -> Result<u64, ParseError> {
    match kind {
        EntryKind::Directory => Ok(0),
        EntryKind::File if size == DIR_SIZE_DASHES => Ok(0),
        EntryKind::File => parse_size_token(size),
    }
}

fn parse_timestamp(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = match time {
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok()?,
    };
    Some(date.and_time(time))
}

/// Lines that carry no entry and are not worth a warning.
fn is_header_line(line: &str) -> bool {
    if line.chars().all(|c| matches!(c, '-' | '=' | '+' | '|' | ' ')) {
        return true;
    }
    let lower = line.to_lowercase();
    matches!(lower.split_whitespace().next(), Some("name" | "type"))
}

// --- Error detection ---

const DEVICE_MARKERS: [&str; 5] = [
    "no sc64 device",
    "device not found",
    "not connected",
    "couldn't open device",
    "could not open device",
];
const NOT_EMPTY_MARKERS: [&str; 1] = ["not empty"];
const PERMISSION_MARKERS: [&str; 4] = [
    "permission denied",
    "access denied",
    "read-only",
    "write protected",
];
const NOT_FOUND_MARKERS: [&str; 3] = ["no such file", "not found", "does not exist"];

/// Map tool output and exit code to an [`ErrorKind`].
///
/// Exit code `0` is success. Markers are matched case-insensitively in
/// priority order so that "device not found" is not read as a missing file.
pub fn detect_error_marker(stdout: &str, stderr: &str, exit_code: i32) -> Option<ErrorKind> {
    if exit_code == 0 {
        return None;
    }
    let haystack = format!("{stderr}\n{stdout}").to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| haystack.contains(m));

    let kind = if contains_any(&DEVICE_MARKERS) {
        ErrorKind::DeviceNotConnected
    } else if contains_any(&NOT_EMPTY_MARKERS) {
        ErrorKind::DirectoryNotEmpty
    } else if contains_any(&PERMISSION_MARKERS) {
        ErrorKind::PermissionDenied
    } else if contains_any(&NOT_FOUND_MARKERS) {
        ErrorKind::NotFound
    } else if matches!(exit_code, 126 | 127) {
        ErrorKind::ExecutableUnavailable
    } else {
        ErrorKind::Unknown
    };
    Some(kind)
}

/// Diagnostic text for a failed command: stderr, else stdout, else the code.
pub fn failure_message(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    format!("Command failed with code {exit_code}")
}
