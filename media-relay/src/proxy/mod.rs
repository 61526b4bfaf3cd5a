//! Reverse proxy for resolved media URLs.
//!
//! The direct origin URL of a rendition is resolved through the
//! [`Downloader`], then fetched with the client's `Range` so players can
//! seek. The origin's status, headers and body are passed through as-is.
//! Failures before the origin answers become ordinary errors; failures
//! while the body is streaming truncate the response.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::{Downloader, MediaKind, MediaRequest, selector};
use crate::utils::http_client::DEFAULT_USER_AGENT;
use crate::{Error, Result};

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Client headers dropped in addition to hop-by-hop ones.
const STRIPPED_REQUEST: &[HeaderName] = &[
    header::HOST,
    header::COOKIE,
    header::AUTHORIZATION,
    header::CACHE_CONTROL,
    header::PRAGMA,
    header::USER_AGENT,
    header::CONTENT_LENGTH,
];

/// Resolves media URLs and relays the origin's response.
pub struct StreamProxy {
    downloader: Arc<Downloader>,
    client: reqwest::Client,
    user_agent: HeaderValue,
}

impl StreamProxy {
    /// `user_agent` overrides the default browser User-Agent.
    pub fn new(
        downloader: Arc<Downloader>,
        client: reqwest::Client,
        user_agent: Option<&str>,
    ) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .map_err(|e| Error::config(format!("Invalid proxy User-Agent: {e}")))?;
        Ok(Self {
            downloader,
            client,
            user_agent,
        })
    }

    /// Direct URL of the best video rendition.
    pub async fn resolve_video(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let info = self
            .downloader
            .get_stream_info(
                &request.url,
                request.resolution.as_deref(),
                request.codec.as_deref(),
                &request.id,
                cancel,
            )
            .await?;
        info.url.ok_or(Error::NoSuitableFormat(info.id))
    }

    /// Direct URL of the largest audio-only rendition.
    pub async fn resolve_audio(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let info = self
            .downloader
            .get_media_info(&request.url, &request.id, cancel)
            .await?;
        selector::select_audio(&info.formats)
            .and_then(|format| format.url.clone())
            .ok_or(Error::NoSuitableFormat(info.id))
    }

    pub async fn proxy_video(
        &self,
        request: &MediaRequest,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.proxy(MediaKind::Video, request, headers, cancel).await
    }

    pub async fn proxy_audio(
        &self,
        request: &MediaRequest,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.proxy(MediaKind::Audio, request, headers, cancel).await
    }

    pub async fn proxy(
        &self,
        kind: MediaKind,
        request: &MediaRequest,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let origin = match kind {
            MediaKind::Video => self.resolve_video(request, cancel).await?,
            MediaKind::Audio => self.resolve_audio(request, cancel).await?,
        };
        info!(id = %request.id, %kind, "Proxying resolved media");
        self.relay(&origin, headers, cancel).await
    }

    /// Fetch `origin` with the filtered client headers and stream it back.
    pub async fn relay(
        &self,
        origin: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let target = url::Url::parse(origin)
            .map_err(|e| Error::ProxyUpstream(format!("invalid origin url: {e}")))?;
        let outgoing = forward_request_headers(headers, &self.user_agent);
        debug!(origin = %target, range = ?outgoing.get(header::RANGE), "Relaying origin request");

        let send = self.client.get(target).headers(outgoing).send();
        let upstream = tokio::select! {
            response = send => response.map_err(|e| Error::ProxyUpstream(format!("origin request failed: {e}")))?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = upstream.status();
        let response_headers = forward_response_headers(upstream.headers());
        debug!(%status, "Origin responded");

        let origin_host = upstream.url().host_str().unwrap_or_default().to_string();
        let stream = upstream.bytes_stream().map_err(move |e| {
            let err = Error::ProxyUpstream(e.to_string());
            warn!(origin = %origin_host, error = %err, "Origin failed mid-stream, truncating response");
            std::io::Error::other(err)
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_hop_by_hop(name: &HeaderName, connection_tokens: &[String]) -> bool {
    HOP_BY_HOP.contains(name)
        || name.as_str() == "keep-alive"
        || connection_tokens.iter().any(|token| token == name.as_str())
}

/// Client headers to send to the origin.
///
/// `Range` passes through verbatim. Conditional and caching headers are
/// dropped so the origin never answers `304` to a player that has no cache
/// entry of the origin's bytes, and credentials never leak to the origin.
pub fn forward_request_headers(incoming: &HeaderMap, user_agent: &HeaderValue) -> HeaderMap {
    let tokens = connection_tokens(incoming);
    let mut outgoing = HeaderMap::with_capacity(incoming.len() + 1);

    for (name, value) in incoming {
        if is_hop_by_hop(name, &tokens)
            || STRIPPED_REQUEST.contains(name)
            || name.as_str().starts_with("if-")
        {
            continue;
        }
        outgoing.append(name.clone(), value.clone());
    }

    outgoing.insert(header::USER_AGENT, user_agent.clone());
    outgoing
}

/// Origin headers to return to the client.
pub fn forward_response_headers(origin: &HeaderMap) -> HeaderMap {
    let tokens = connection_tokens(origin);
    let mut headers = HeaderMap::with_capacity(origin.len());
    for (name, value) in origin {
        if !is_hop_by_hop(name, &tokens) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use crate::config::AppConfig;
    use crate::utils::http_client::build_relay_client;

    async fn upstream_handler(req: Request<Body>) -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("x-origin-secret"));
        headers.insert("x-origin-secret", HeaderValue::from_static("1"));

        // Echo what the origin saw so tests can inspect forwarded headers.
        for name in ["user-agent", "cookie", "if-none-match", "accept-language"] {
            if let Some(value) = req.headers().get(name) {
                let echo = HeaderName::from_bytes(format!("x-seen-{name}").as_bytes()).unwrap();
                headers.insert(echo, value.clone());
            }
        }

        match req.headers().get(header::RANGE) {
            Some(range) if range == "bytes=2-4" => {
                headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 2-4/10"));
                (StatusCode::PARTIAL_CONTENT, headers, "234")
            }
            _ => (StatusCode::OK, headers, "0123456789"),
        }
    }

    async fn spawn_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/media", get(upstream_handler));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/media")
    }

    fn proxy(config: &AppConfig, user_agent: Option<&str>) -> StreamProxy {
        let downloader = Arc::new(Downloader::new(config));
        StreamProxy::new(downloader, build_relay_client().unwrap(), user_agent).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn relay_forwards_range_and_filters_headers() {
        let origin = spawn_upstream().await;
        let proxy = proxy(&AppConfig::default(), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-4"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"etag\""));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));

        let response = proxy
            .relay(&origin, &headers, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let h = response.headers();
        assert_eq!(h[header::CONTENT_RANGE], "bytes 2-4/10");
        assert_eq!(h[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(h["x-seen-user-agent"], DEFAULT_USER_AGENT);
        assert_eq!(h["x-seen-accept-language"], "en");
        assert!(h.get("x-seen-cookie").is_none());
        assert!(h.get("x-seen-if-none-match").is_none());
        assert!(h.get(header::CONNECTION).is_none());
        assert!(h.get("x-origin-secret").is_none());

        assert_eq!(body_text(response).await, "234");
    }

    #[tokio::test]
    async fn relay_without_range_returns_full_body_with_custom_agent() {
        let origin = spawn_upstream().await;
        let proxy = proxy(&AppConfig::default(), Some("media-relay-test/1.0"));

        let response = proxy
            .relay(&origin, &HeaderMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-seen-user-agent"], "media-relay-test/1.0");
        assert_eq!(body_text(response).await, "0123456789");
    }

    #[tokio::test]
    async fn unreachable_origin_fails_before_streaming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = proxy(&AppConfig::default(), None);
        let err = proxy
            .relay(&format!("http://{addr}/gone"), &HeaderMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProxyUpstream(_)), "{err:?}");
    }

    /// Origin that promises 100 bytes, sends 10 and hangs up.
    async fn spawn_truncating_origin() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 100\r\n\r\n0123456789",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/media")
    }

    #[tokio::test]
    async fn origin_failure_mid_stream_truncates_body() {
        let origin = spawn_truncating_origin().await;
        let proxy = proxy(&AppConfig::default(), None);

        let response = proxy
            .relay(&origin, &HeaderMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        // Headers were already relayed when the origin gave up.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");

        let err = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Upstream error"), "{err}");
    }

    #[test]
    fn invalid_user_agent_is_a_config_error() {
        let downloader = Arc::new(Downloader::new(&AppConfig::default()));
        let client = build_relay_client().unwrap();
        assert!(matches!(
            StreamProxy::new(downloader, client, Some("bad\nagent")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn connection_listed_headers_are_stripped() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        incoming.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        incoming.insert("x-trace", HeaderValue::from_static("1"));
        incoming.insert(header::HOST, HeaderValue::from_static("relay.local"));
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        incoming.insert(header::IF_RANGE, HeaderValue::from_static("\"etag\""));
        incoming.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let outgoing = forward_request_headers(&incoming, &HeaderValue::from_static("ua"));
        let names: Vec<&str> = outgoing.keys().map(HeaderName::as_str).collect();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(outgoing.contains_key(header::ACCEPT));
        assert_eq!(outgoing[header::USER_AGENT], "ua");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolves_video_and_audio_origins() {
        let (_root, config) = crate::test_support::prepared_config().await;
        let proxy = proxy(&config, None);
        let cancel = CancellationToken::new();
        let request = MediaRequest {
            resolution: Some("720".into()),
            codec: Some("avc1".into()),
            ..MediaRequest::new("https://fake.test/watch?v=abc123")
        };

        assert_eq!(
            proxy.resolve_video(&request, &cancel).await.unwrap(),
            "https://cdn.example.com/22.mp4"
        );
        assert_eq!(
            proxy.resolve_audio(&request, &cancel).await.unwrap(),
            "https://cdn.example.com/251.webm"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolution_failure_happens_before_any_response() {
        let (_root, config) = crate::test_support::prepared_config().await;
        let proxy = proxy(&config, None);

        let err = proxy
            .proxy_video(
                &MediaRequest::new("https://fake.test/fail"),
                &HeaderMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolRuntime(_)), "{err:?}");
    }
}
