//! Download routes.
//!
//! `POST /api/downloads` keeps the file in the download directory.
//! `GET /api/download/{kind}` downloads into the temp directory, streams the
//! file back as an attachment and removes it once the body is dropped.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::parse_kind;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::downloader::{MediaInfo, MediaKind, MediaRequest, OutputFormat};
use crate::error::Error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/downloads", post(create_download))
        .route("/download/{kind}", get(download_file))
}

#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    pub kind: MediaKind,
    #[serde(flatten)]
    pub request: MediaRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub path: String,
    pub filename: String,
    pub media_info: MediaInfo,
}

/// `POST /api/downloads`
async fn create_download(
    State(state): State<AppState>,
    Json(body): Json<CreateDownloadRequest>,
) -> ApiResult<(StatusCode, Json<DownloadResponse>)> {
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let (path, media_info) = state
        .downloader
        .download_to_file(body.kind, &body.request, false, &cancel)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DownloadResponse {
            filename: file_name(&path),
            path: path.display().to_string(),
            media_info,
        }),
    ))
}

/// `GET /api/download/{video|audio}`
async fn download_file(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(request): Query<MediaRequest>,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let (path, _info) = state
        .downloader
        .download_to_file(kind, &request, true, &cancel)
        .await?;
    let temp = TempFile(path);

    let file = tokio::fs::File::open(&temp.0)
        .await
        .map_err(|e| Error::io_path("opening downloaded file", &temp.0, e))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| Error::io_path("reading downloaded file", &temp.0, e))?
        .len();

    let filename = file_name(&temp.0);
    let content_type = temp
        .0
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| OutputFormat::parse(ext).ok())
        .map_or("application/octet-stream", OutputFormat::content_type);

    // The guard travels with the body and removes the file when it is dropped.
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _keep = &temp;
        chunk
    });

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn file_name(path: &FsPath) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `attachment` with an ASCII fallback and the UTF-8 name (RFC 6266).
fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Removes the file when dropped.
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Removed temp download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "Failed to remove temp download"),
        }
    }
}
