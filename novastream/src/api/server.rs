//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ApiSettings;
use crate::error::{Error, Result};
use crate::hls::HlsManager;
use crate::queue::ResolveQueue;
use crate::registry::StreamRegistry;
use crate::resolver::PlaybackResolver;
use crate::subtitles::SubtitleManager;

/// Server-level settings: bind address, port, CORS toggle.
pub type ApiServerConfig = ApiSettings;

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub registry: Arc<StreamRegistry>,
    pub hls: Arc<HlsManager>,
    pub subtitles: Arc<SubtitleManager>,
    pub resolver: Arc<PlaybackResolver>,
    pub queue: Arc<ResolveQueue>,
}

impl AppState {
    pub fn new(
        registry: Arc<StreamRegistry>,
        hls: Arc<HlsManager>,
        subtitles: Arc<SubtitleManager>,
        resolver: Arc<PlaybackResolver>,
        queue: Arc<ResolveQueue>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            registry,
            hls,
            subtitles,
            resolver,
            queue,
        }
    }
}

/// The HTTP server: owns the router config and a cancellation token for graceful
/// shutdown, applying the same supervised-process idiom used for the transcoder
/// and extractor children to the server itself.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    use tower_http::trace::MakeSpan;
                    tower_http::trace::DefaultMakeSpan::new()
                        .level(tracing::Level::INFO)
                        .make_span(req)
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        use tower_http::trace::OnResponse;
                        tower_http::trace::DefaultOnResponse::new()
                            .level(tracing::Level::INFO)
                            .on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        use tower_http::trace::OnFailure;
                        tower_http::trace::DefaultOnFailure::new()
                            .level(tracing::Level::ERROR)
                            .on_failure(class, latency, span);
                    },
                ),
        );

        router
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::internal(format!("invalid bind address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(%addr, "API server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down");
            })
            .await
            .map_err(|e| Error::internal(format!("server error: {e}")))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
