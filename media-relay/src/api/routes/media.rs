//! Metadata routes.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::downloader::{MediaInfo, MediaRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/info", get(get_info))
        .route("/stream-info", get(get_stream_info))
}

/// `GET /api/info?url=&id=`
async fn get_info(
    State(state): State<AppState>,
    Query(request): Query<MediaRequest>,
) -> ApiResult<Json<MediaInfo>> {
    // Dropping the handler (client gone) cancels the tool run.
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let info = state
        .downloader
        .get_media_info(&request.url, &request.id, &cancel)
        .await?;
    Ok(Json(info))
}

/// `GET /api/stream-info?url=&resolution=&codec=&id=`
async fn get_stream_info(
    State(state): State<AppState>,
    Query(request): Query<MediaRequest>,
) -> ApiResult<Json<MediaInfo>> {
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let info = state
        .downloader
        .get_stream_info(
            &request.url,
            request.resolution.as_deref(),
            request.codec.as_deref(),
            &request.id,
            &cancel,
        )
        .await?;
    Ok(Json(info))
}
