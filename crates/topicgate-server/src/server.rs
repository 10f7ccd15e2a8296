use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use topicgate_auth::{CredentialCache, DecisionEngine, HttpIdentityProvider, IdentityProvider};

use crate::{
    config::AppConfig,
    gateway::{GatewayError, RouteTable},
    handlers, middleware as app_middleware,
};

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub identity: Arc<HttpIdentityProvider>,
    pub routes: Arc<RouteTable>,
    /// Pooled client for upstream requests
    pub http_client: reqwest::Client,
    pub body_limit: usize,
    pub started_at: Instant,
}

pub struct TopicgateServer {
    addr: SocketAddr,
    app: Router,
    engine: Arc<DecisionEngine>,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    let request_timeout = cfg.request_timeout();

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Everything else is proxied
        .fallback(handlers::proxy_request)
        // Layers wrap bottom-up: request id -> trace -> metrics -> timeout -> body limit -> authorization
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::authorization_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
        .layer(middleware::from_fn(app_middleware::track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status().as_u16();
                        span.record("http.status_code", status);
                        let elapsed_ms = latency.as_millis() as u64;
                        if status >= 500 {
                            tracing::error!(http.status = status, elapsed_ms, "request handled");
                        } else if status >= 400 {
                            tracing::warn!(http.status = status, elapsed_ms, "request handled");
                        } else {
                            tracing::info!(http.status = status, elapsed_ms, "request handled");
                        }
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .with_state(state)
}

async fn handle_middleware_error(err: BoxError) -> GatewayError {
    if err.is::<tower::timeout::error::Elapsed>() {
        GatewayError::RequestTimeout
    } else {
        GatewayError::internal(format!("unhandled middleware error: {err}"))
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Connect to the identity service and assemble the application.
    ///
    /// # Errors
    ///
    /// Fails if the service account cannot authenticate or the route table
    /// is invalid. A failed role warm-up is only logged.
    pub async fn build(self) -> anyhow::Result<TopicgateServer> {
        let cfg = self.config;

        let provider_config = cfg
            .identity
            .provider_config()
            .map_err(anyhow::Error::msg)?;
        let identity = Arc::new(HttpIdentityProvider::new(provider_config)?);
        identity
            .authenticate(&cfg.identity.service_account, &cfg.identity.service_password)
            .await
            .context("service account authentication failed")?;

        let cache = Arc::new(CredentialCache::new(cfg.cache_ttl()));
        let provider: Arc<dyn IdentityProvider> = identity.clone();
        let engine = Arc::new(DecisionEngine::new(provider, cache, cfg.engine_config()));

        if let Err(e) = engine.warm_up().await {
            tracing::warn!(error = %e, "role warm-up failed, roles will be fetched on demand");
        }

        let routes = Arc::new(RouteTable::from_config(&cfg.routes)?);
        tracing::info!(routes = routes.len(), "route table loaded");

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(cfg.identity.max_idle_per_host)
            .build()
            .context("failed to create upstream HTTP client")?;

        let state = AppState {
            engine: engine.clone(),
            identity,
            routes,
            http_client,
            body_limit: cfg.server.body_limit_bytes,
            started_at: Instant::now(),
        };

        Ok(TopicgateServer {
            addr: self.addr,
            app: build_app(&cfg, state),
            engine,
        })
    }
}

impl TopicgateServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl+C.
    ///
    /// On Unix, SIGHUP clears the credential cache and preloads roles again.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        spawn_reload_on_hangup(self.engine);
        tracing::info!(%addr, "listening");
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

#[cfg(unix)]
fn spawn_reload_on_hangup(engine: Arc<DecisionEngine>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGHUP, cache reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading credential cache");
            if let Err(e) = engine.reload().await {
                tracing::warn!(error = %e, "role reload failed, roles will be fetched on demand");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_engine: Arc<DecisionEngine>) {}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
