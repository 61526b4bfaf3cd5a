//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::AppConfig;
use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::progress::ProgressBroadcaster;
use crate::proxy::StreamProxy;
use crate::utils::http_client;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8080")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Shared services handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub downloader: Arc<Downloader>,
    pub proxy: Arc<StreamProxy>,
    pub progress: Arc<ProgressBroadcaster>,
    /// Cancelled on shutdown; every request works under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire up the services described by `config`.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let progress = Arc::new(ProgressBroadcaster::new(config.progress_channel_capacity));
        let downloader = Arc::new(Downloader::new(config).with_progress(Arc::clone(&progress)));
        let proxy = StreamProxy::new(
            Arc::clone(&downloader),
            http_client::build_relay_client()?,
            config.proxy_user_agent.as_deref(),
        )?;

        Ok(Self {
            start_time: Instant::now(),
            downloader,
            proxy: Arc::new(proxy),
            progress,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token for one request's work. Cancelled on shutdown.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        let cancel_token = state.shutdown.clone();
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        // Add CORS if enabled
        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path().starts_with("/health") {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Shutdown the server, cancelling every in-flight operation.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
