//! Fetch progress parsed from the fetch tool's `--newline` stderr.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use process_utils::StderrObserver;
use regex::Regex;

use crate::progress::{ProgressBroadcaster, ProgressEvent, ProgressStatus};

fn download_line_regex() -> &'static Regex {
    static DOWNLOAD_LINE: OnceLock<Regex> = OnceLock::new();
    DOWNLOAD_LINE.get_or_init(|| Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%").unwrap())
}

/// Percentage from a line such as `[download]  42.3% of 10.00MiB at 1.2MiB/s`.
pub fn parse_download_percentage(line: &str) -> Option<f64> {
    let caps = download_line_regex().captures(line.trim_start())?;
    let percentage: f64 = caps.get(1)?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&percentage).then_some(percentage)
}

/// Observer publishing `downloading` events whenever the whole-number
/// percentage changes.
pub fn download_observer(progress: Arc<ProgressBroadcaster>, id: &str) -> StderrObserver {
    let id = id.to_string();
    let last = AtomicI64::new(-1);

    Arc::new(move |line: &str| {
        let Some(percentage) = parse_download_percentage(line) else {
            return;
        };
        let whole = percentage.floor() as i64;
        if last.swap(whole, Ordering::Relaxed) == whole {
            return;
        }
        progress.send_event(&ProgressEvent::new(
            id.as_str(),
            ProgressStatus::Downloading,
            format!("Downloading {percentage:.1}%"),
            percentage,
        ));
    })
}
