//! Web layer module
//!
//! The HTTP surface of the relay: source lookups under `/api/v1/sources`,
//! the signed relay under `/api/v1/relay`, and health probes. Handlers are
//! thin and delegate to [`SourceService`] and [`RelayService`].
//!
//! The relay answers its own CORS preflight and sets its own CORS headers, so
//! the permissive CORS layer only wraps the JSON routes.

use anyhow::Result;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    config::Config,
    errors::AppResult,
    proxy::{self, RelayService},
    services::{AvailabilityRanker, SourceAggregator, SourceResolver, SourceService},
    sources::ProviderFactory,
    utils::{HttpClientFactory, UrlProtector},
};

pub mod handlers;
pub mod middleware;
pub mod responses;

pub use responses::{ApiResponse, handle_error, handle_result};

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub source_service: Arc<SourceService>,
    pub relay_service: Arc<RelayService>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wire every service from configuration
    ///
    /// The signing key is shared between the source pipeline, which issues
    /// relay URLs, and the relay, which verifies them.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let http = HttpClientFactory::new(config.relay.user_agent.clone());
        let protector = Arc::new(UrlProtector::new(
            &config.relay.signing_secret,
            config.relay.signature_length,
        )?);
        let relay_endpoint = proxy::relay_endpoint(&config.web.base_url);

        let metadata = ProviderFactory::create_metadata(&config, &http)?;
        let subtitles = ProviderFactory::create_subtitles(&config, &http)?;
        let adapters = ProviderFactory::create_adapters(&config, &http, &metadata);

        let source_service = SourceService::new(
            SourceAggregator::new(adapters, config.aggregation.deadline),
            SourceResolver::new(&config.aggregation, &http)?,
            AvailabilityRanker::new(&config.aggregation, &http, config.web.base_url.clone())?,
            Arc::clone(&protector),
            metadata,
            subtitles,
            relay_endpoint.clone(),
        );
        let relay_service = RelayService::new(&config, &http, protector, relay_endpoint)?;

        Ok(Self {
            config: Arc::new(config),
            source_service: Arc::new(source_service),
            relay_service: Arc::new(relay_service),
            start_time: chrono::Utc::now(),
        })
    }
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", state.config.web.host, state.config.web.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

        Ok(Self {
            app: Self::create_router(state),
            addr,
        })
    }

    /// Build the full router; also used directly by integration tests
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health::health_check))
            .route("/live", get(handlers::health::liveness_check))
            .nest("/api/v1", Self::api_v1_routes())
            .layer(axum::middleware::from_fn(
                middleware::security_headers_middleware,
            ))
            .layer(axum::middleware::from_fn(
                middleware::request_logging_middleware,
            ))
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        let sources = Router::new()
            .route(
                "/sources/{kind}/{id}",
                get(handlers::sources::get_sources),
            )
            .route(
                "/sources/{kind}/{id}/{season}/{episode}",
                get(handlers::sources::get_episode_sources),
            )
            .layer(CorsLayer::permissive());

        // GET routes answer HEAD as well, with the body stripped
        Router::new()
            .route(
                "/relay",
                get(handlers::relay::relay_stream).options(handlers::relay::relay_preflight),
            )
            .merge(sources)
    }

    /// Serve until SIGTERM or SIGINT, then drain in-flight requests
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.addr, e))?;
        info!("Listening on http://{}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down gracefully");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                    }
                }
            }
            _ => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully"),
        // Without a handler the server runs until killed
        Err(_) => std::future::pending::<()>().await,
    }
}
