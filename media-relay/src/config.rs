//! Runtime configuration loaded from environment variables.
//!
//! `.env` files are honoured through `dotenvy` in `main`. Every value has a
//! default so the service starts with nothing configured, as long as the
//! fetch and transcode tools are on `PATH`.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::Result;
use crate::utils::fs;

/// Default capacity of each progress subscriber channel.
pub const DEFAULT_PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Tool locations and working directories.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Fetch tool executable (yt-dlp compatible).
    pub ytdlp_path: PathBuf,
    /// Transcode tool executable (ffmpeg compatible).
    pub ffmpeg_path: PathBuf,
    /// Shared directory for persistent downloads.
    pub download_dir: PathBuf,
    /// Directory for downloads that are streamed back and then removed.
    pub temp_dir: PathBuf,
    /// Optional log directory; file logging is disabled when unset.
    pub log_dir: Option<PathBuf>,
    /// Overrides the browser-like User-Agent sent to media origins.
    pub proxy_user_agent: Option<String>,
    /// Buffered events per progress subscriber.
    pub progress_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            download_dir: PathBuf::from("./downloads"),
            temp_dir: std::env::temp_dir().join("media-relay"),
            log_dir: None,
            proxy_user_agent: None,
            progress_channel_capacity: DEFAULT_PROGRESS_CHANNEL_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `YTDLP_PATH`, `FFMPEG_PATH`
    /// - `DOWNLOAD_DIR`, `TEMP_DIR`, `LOG_DIR`
    /// - `PROXY_USER_AGENT`
    /// - `PROGRESS_CHANNEL_CAPACITY`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("YTDLP_PATH") {
            config.ytdlp_path = PathBuf::from(path);
        }
        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(dir) = get("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }
        config.log_dir = get("LOG_DIR").map(PathBuf::from);
        config.proxy_user_agent = get("PROXY_USER_AGENT");

        if let Some(raw) = get("PROGRESS_CHANNEL_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.progress_channel_capacity = capacity,
                _ => warn!(value = %raw, "Ignoring invalid PROGRESS_CHANNEL_CAPACITY"),
            }
        }

        config
    }

    /// Create the download and temp directories.
    pub async fn prepare(&self) -> Result<()> {
        fs::ensure_dir_all_with_op("creating download directory", &self.download_dir).await?;
        fs::ensure_dir_all_with_op("creating temp directory", &self.temp_dir).await?;
        Ok(())
    }

    /// Log the detected tool versions; missing tools are reported, not fatal.
    pub async fn log_tool_versions(&self) {
        for (tool, path) in [("fetch", &self.ytdlp_path), ("transcode", &self.ffmpeg_path)] {
            match process_utils::detect_version_async(path).await {
                Some(version) => info!(tool, path = %path.display(), %version, "Detected tool"),
                None => warn!(tool, path = %path.display(), "Tool not found or not runnable"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_environment() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.ytdlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.log_dir.is_none());
        assert_eq!(
            config.progress_channel_capacity,
            DEFAULT_PROGRESS_CHANNEL_CAPACITY
        );
    }

    #[test]
    fn reads_overrides_and_ignores_blank_or_invalid_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("YTDLP_PATH", "/opt/bin/yt-dlp"),
            ("FFMPEG_PATH", "  "),
            ("DOWNLOAD_DIR", "/srv/media"),
            ("PROGRESS_CHANNEL_CAPACITY", "zero"),
            ("LOG_DIR", "/var/log/media-relay"),
        ]);
        let config = AppConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.ytdlp_path, PathBuf::from("/opt/bin/yt-dlp"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.download_dir, PathBuf::from("/srv/media"));
        assert_eq!(
            config.progress_channel_capacity,
            DEFAULT_PROGRESS_CHANNEL_CAPACITY
        );
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/media-relay")));
    }

    #[tokio::test]
    async fn missing_tools_are_reported_without_failing() {
        let config = AppConfig {
            ytdlp_path: PathBuf::from("definitely-not-yt-dlp-4821"),
            ffmpeg_path: PathBuf::from("definitely-not-ffmpeg-4821"),
            ..AppConfig::default()
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), config.log_tool_versions())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prepare_creates_directories() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = AppConfig {
            download_dir: temp.path().join("downloads"),
            temp_dir: temp.path().join("tmp").join("nested"),
            ..AppConfig::default()
        };

        config.prepare().await.unwrap();
        assert!(config.download_dir.is_dir());
        assert!(config.temp_dir.is_dir());
    }
}
