//! Logging setup.
//!
//! Console output always; a daily-rolling file when a log directory is
//! configured. Timestamps use the local timezone.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "media_relay=info,process_utils=info,tower_http=info";

/// Prefix of the rolling log files (`media-relay.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "media-relay.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. It is `None` when file logging is disabled.
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let console = fmt::layer().with_ansi(true).with_timer(LocalTimer);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync_with_op("creating log directory", dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}
