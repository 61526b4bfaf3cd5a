//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so failures in
//! the shared download directory are easy to attribute.

use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Size of a regular file, or `None` if it does not exist or is not a file.
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Remove a (possibly partial) file, ignoring files that are already gone.
pub async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
