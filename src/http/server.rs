//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the cache and pass-through routes
//! - Wire up middleware (request ID, tracing, time-to-headers limit)
//! - Normalize routed requests and hand them to the proxy core
//! - Serve until the shutdown signal fires

use axum::{
    body::Body,
    extract::{Path, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::request::inbound_request;
use crate::observability::{metrics, spans::make_request_span};
use crate::proxy::{CacheProxy, SetupError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: CacheProxy,
}

/// HTTP server for the caching proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    proxy: CacheProxy,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, SetupError> {
        let proxy = CacheProxy::new(&config)?;
        let state = AppState {
            proxy: proxy.clone(),
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            proxy,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/cache/{protocol}/{*url}", any(cache_handler))
            .route("/proxy/{host}/", any(proxy_root_handler))
            .route("/proxy/{host}/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Router with state and middleware applied, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            cache_dir = %self.proxy.store().dir().display(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// `/cache/{protocol}/{*url}`: serve from cache, or relay and persist.
async fn cache_handler(
    State(state): State<AppState>,
    Path((protocol, url)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let (parts, _body) = request.into_parts();
    let inbound = inbound_request(&protocol, &url, &parts);

    tracing::debug!(method = %inbound.method, identity = %inbound.identity(), "Cache request");

    let response = state.proxy.handle(inbound).await;
    metrics::record_request("cache", response.status().as_u16(), start);
    response
}

/// `/proxy/{host}/{*path}`: relay `https://host/path` without caching.
async fn proxy_handler(
    State(state): State<AppState>,
    Path((host, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    pass_through(state, &host, &path, request).await
}

/// `/proxy/{host}/`: the wildcard never matches an empty path.
async fn proxy_root_handler(
    State(state): State<AppState>,
    Path(host): Path<String>,
    request: Request<Body>,
) -> Response {
    pass_through(state, &host, "", request).await
}

async fn pass_through(state: AppState, host: &str, path: &str, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, _body) = request.into_parts();
    let inbound = inbound_request("https", &format!("{}/{}", host, path), &parts);

    tracing::debug!(method = %inbound.method, identity = %inbound.identity(), "Pass-through request");

    let response = state.proxy.pass_through(inbound).await;
    metrics::record_request("proxy", response.status().as_u16(), start);
    response
}
