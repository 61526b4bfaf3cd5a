use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::{Error, Result};

/// Browser-like User-Agent sent to media origins unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client used to relay origin bytes.
///
/// Decompression is disabled so the body and `Content-Length`/`Content-Range`
/// reach the caller exactly as the origin sent them. No overall request
/// timeout is set because relayed media bodies are long-lived.
pub fn build_relay_client() -> Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .no_gzip()
        .no_deflate()
        .pool_max_idle_per_host(8)
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))
}
