//! Progress event stream (Server-Sent Events).

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn router() -> Router<AppState> {
    Router::new().route("/events/{id}", get(subscribe))
}

/// `GET /api/events/{id}`
///
/// Subscribes before the client starts the operation it wants to watch.
/// The stream ends after the terminal event for `id`.
async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if id.trim().is_empty() {
        return Err(ApiError::bad_request("Progress id must not be empty"));
    }

    debug!(%id, "Progress subscriber connected");
    let mut rx = state.progress.register_client(&id);
    let events = futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    ))
}
