//! Live transcoding route.
//!
//! The response body is the transcoder's stdout. Tool failures that only
//! show up after the headers were sent end the body with an error, which
//! aborts the chunked response instead of finishing it cleanly.

use std::future::Future;
use std::io;
use std::pin::Pin;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use process_utils::PipelineHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::parse_kind;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::downloader::{MediaRequest, MediaStream};

pub fn router() -> Router<AppState> {
    Router::new().route("/stream/{kind}", get(stream_media))
}

/// `GET /api/stream/{video|audio}`
async fn stream_media(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(request): Query<MediaRequest>,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    // Owned by the body from here on: the pipeline lives as long as the response.
    let cancel = state.request_token();
    let stream = state.downloader.stream(kind, &request, &cancel)?;
    let content_type = stream.content_type();

    let mut response = Body::from_stream(body_stream(stream)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// Turn a [`MediaStream`] into a body stream that closes the pipeline at the end.
pub(crate) fn body_stream(stream: MediaStream) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let finisher = Finisher::new(&stream);
    let reader = ReaderStream::new(stream);

    futures::stream::unfold(Some((reader, finisher)), |state| async move {
        let (mut reader, mut finisher) = state?;
        match reader.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((reader, finisher)))),
            Some(Err(e)) => {
                if let Err(close_err) = finisher.finish().await {
                    debug!(error = %close_err, "Stream pipeline closed with error");
                }
                Some((Err(e), None))
            }
            None => match finisher.finish().await {
                Ok(()) => None,
                Err(e) => Some((Err(io::Error::other(e)), None)),
            },
        }
    })
}

type CloseFuture = Pin<Box<dyn Future<Output = crate::Result<()>> + Send>>;

/// Closes the pipeline exactly once.
///
/// Dropped before [`finish`](Self::finish) means the client went away: the
/// pipeline is cancelled and closed in the background so the processes are
/// reaped and the terminal progress event is still published.
struct Finisher {
    close: Option<CloseFuture>,
    handle: PipelineHandle,
}

impl Finisher {
    fn new(stream: &MediaStream) -> Self {
        Self {
            close: Some(Box::pin(stream.close())),
            handle: stream.handle(),
        }
    }

    async fn finish(&mut self) -> crate::Result<()> {
        match self.close.take() {
            Some(close) => close.await,
            None => Ok(()),
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        let Some(close) = self.close.take() else {
            return;
        };
        debug!("Stream body dropped before completion, cancelling pipeline");
        self.handle.cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = close.await
                        && !e.is_cancelled()
                    {
                        warn!(error = %e, "Abandoned stream pipeline failed");
                    }
                });
            }
            Err(_) => warn!("No runtime available to reap abandoned stream pipeline"),
        }
    }
}
