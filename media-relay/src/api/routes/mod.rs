//! API route modules.
//!
//! Organizes routes by resource type.

pub mod downloads;
pub mod events;
pub mod health;
pub mod media;
pub mod proxy;
pub mod stream;

use axum::Router;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::downloader::MediaKind;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(media::router())
        .merge(downloads::router())
        .merge(stream::router())
        .merge(proxy::router())
        .merge(events::router());

    Router::new()
        .nest("/api", api)
        .nest("/health", health::router())
        .with_state(state)
}

/// Parse the `{kind}` path segment.
pub(crate) fn parse_kind(kind: &str) -> Result<MediaKind, ApiError> {
    kind.parse::<MediaKind>().map_err(ApiError::from)
}
