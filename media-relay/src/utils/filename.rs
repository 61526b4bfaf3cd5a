//! Output file naming for the shared download directory.
//!
//! Concurrent downloads write into the same directory without any locking,
//! so names combine a strictly increasing timestamp with the source id.
//! Titles are sanitized so the name is valid on Windows, Linux and macOS.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Maximum number of characters of the title kept in a file name.
const MAX_TITLE_CHARS: usize = 80;

/// Last stamp handed out, in microseconds since the epoch.
static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Sanitize a string for use in filenames across all platforms.
///
/// Control characters and Windows-invalid characters become a single `_`
/// per run, leading/trailing spaces and dots are trimmed, reserved Windows
/// names get a `_` prefix, and an empty result becomes `"unnamed"`.
///
/// ```
/// use media_relay::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

/// A timestamp strictly greater than every one returned before it in this process.
pub fn unique_timestamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut previous = LAST_STAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(previous + 1);
        match LAST_STAMP_MICROS.compare_exchange_weak(
            previous,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
            Err(actual) => previous = actual,
        }
    }
}

/// Build `<timestamp>_<id>[_<title>].<ext>`.
pub fn output_file_name(id: &str, title: &str, extension: &str) -> String {
    let stamp = unique_timestamp().format("%Y%m%d_%H%M%S_%6f");
    let id = sanitize_filename(id);
    let title: String = sanitize_filename(title)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let title = title.trim_end_matches([' ', '.']);
    let extension = extension.trim_start_matches('.');

    if title.is_empty() || title == "unnamed" || title == id {
        format!("{stamp}_{id}.{extension}")
    } else {
        format!("{stamp}_{id}_{title}.{extension}")
    }
}
