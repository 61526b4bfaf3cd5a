//! Origin relay route.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
};

use super::parse_kind;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::downloader::MediaRequest;

pub fn router() -> Router<AppState> {
    Router::new().route("/proxy/{kind}", get(proxy_media))
}

/// `GET /api/proxy/{video|audio}`
///
/// Resolves the direct media URL and relays it byte for byte, forwarding
/// `Range` so seeking works.
async fn proxy_media(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(request): Query<MediaRequest>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let response = state.proxy.proxy(kind, &request, &headers, &cancel).await?;
    Ok(response)
}
