use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use topicgate_auth::Grant;

use crate::gateway::{GatewayError, proxy};
use crate::metrics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: HealthComponents,
    pub cache: CacheSummary,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub identity_service: String,
}

#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub identities: usize,
    pub roles: usize,
}

/// Gateway liveness plus identity service reachability.
///
/// Always answers 200; a failing identity service reports `degraded`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, identity_service) = match state.identity.check_health().await {
        Ok(()) => ("ok", "ok".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "identity service health check failed");
            ("degraded", format!("error: {e}"))
        }
    };
    let stats = state.engine.stats();

    let body = HealthResponse {
        status,
        components: HealthComponents { identity_service },
        cache: CacheSummary {
            identities: stats.identity_count,
            roles: stats.role_count,
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    };
    (StatusCode::OK, Json(body))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    metrics::record_cache_stats(&state.engine.stats());
    match metrics::render_metrics() {
        Some(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Fallback handler: resolve the route and forward upstream.
pub async fn proxy_request(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, GatewayError> {
    let path = req.uri().path().to_string();
    let route = state
        .routes
        .resolve(&path)
        .ok_or_else(|| GatewayError::RouteNotFound { path: path.clone() })?;

    let grant = req.extensions().get::<Grant>().cloned();
    proxy::forward(
        &state.http_client,
        route,
        req,
        grant.as_ref(),
        state.body_limit,
    )
    .await
}
