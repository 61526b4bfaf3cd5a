//! media-relay library crate.
//!
//! HTTP service that fetches, transcodes and relays media from web pages
//! through external fetch and transcode tools. The modules are exposed for
//! integration testing.

pub mod api;
pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod progress;
pub mod proxy;
pub mod utils;

#[cfg(all(test, unix))]
mod test_support;

pub use error::{Error, Result};
