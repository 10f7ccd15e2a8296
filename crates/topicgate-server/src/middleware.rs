use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use topicgate_auth::{AccessDecision, AccessRequest, DenyReason};

use crate::gateway::{GatewayError, has_dot_segment};
use crate::metrics;
use crate::server::AppState;

// =============================================================================
// Authorization Middleware
// =============================================================================

/// Authorize every gateway request before it reaches the route table.
///
/// Paths with `.` or `..` segments are rejected with 400 up front, since the
/// upstream URL would resolve them to a path that was never authorized.
///
/// Gateway endpoints and routes configured with `protected = false` pass
/// through untouched. Everything else, including paths with no route, must
/// carry `Authorization: Bearer <token>` accepted by the decision engine.
/// On success the [`topicgate_auth::Grant`] is stored in request extensions.
pub async fn authorization_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if has_dot_segment(&path) {
        tracing::info!(path = %path, "rejecting path with dot segments");
        return GatewayError::BadRequest("path contains dot segments".into()).into_response();
    }
    if should_skip_authorization(&state, &path) {
        return next.run(req).await;
    }

    let token = match bearer_token(&req) {
        Ok(token) => token,
        Err(reason) => {
            tracing::debug!(path = %path, reason = reason.code(), "rejecting request before engine");
            metrics::record_auth_failure(reason);
            return GatewayError::Denied(reason).into_response();
        }
    };

    let access = AccessRequest::new(token, req.method().as_str(), path);
    let started = Instant::now();
    let decision = state.engine.authorize(&access).await;
    metrics::record_auth_decision(started.elapsed(), decision.is_allowed());

    match decision {
        AccessDecision::Allow(grant) => {
            tracing::debug!(
                user_id = %grant.identity.id,
                role = %grant.role.name,
                permission = %grant.permission,
                pattern = %grant.matched_pattern,
                "request authorized"
            );
            req.extensions_mut().insert(grant);
            next.run(req).await
        }
        AccessDecision::Deny(reason) => {
            tracing::info!(
                method = %access.method,
                path = %access.path,
                reason = reason.code(),
                "request denied"
            );
            metrics::record_auth_failure(reason);
            GatewayError::Denied(reason).into_response()
        }
    }
}

fn should_skip_authorization(state: &AppState, path: &str) -> bool {
    if matches!(path, "/health" | "/metrics") {
        return true;
    }
    state
        .routes
        .resolve(path)
        .is_some_and(|route| !route.protected)
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The header must split on a single space into exactly two parts with the
/// scheme `Bearer`. An empty token is reported as missing by the engine.
fn bearer_token(req: &Request<Body>) -> Result<String, DenyReason> {
    let header = match req.headers().get(AUTHORIZATION) {
        Some(value) => value.to_str().map_err(|_| DenyReason::MalformedToken)?,
        None => return Err(DenyReason::MissingToken),
    };
    if header.is_empty() {
        return Err(DenyReason::MissingToken);
    }

    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token.to_string()),
        _ => Err(DenyReason::MalformedToken),
    }
}

// =============================================================================
// Request Id / Metrics
// =============================================================================

// Request ID middleware: preserves incoming X-Request-Id or generates a UUID v4
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(generate_request_id);

    // Available to the trace span and the proxy
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

fn generate_request_id() -> HeaderValue {
    // A hyphenated UUID is always a valid header value
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// Count requests, latency and in-flight connections.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    metrics::increment_active_connections();
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::decrement_active_connections();

    metrics::record_http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/x");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&request_with(Some("Bearer abc"))), Ok("abc".to_string()));
        assert_eq!(bearer_token(&request_with(Some("Bearer "))), Ok(String::new()));
        assert_eq!(bearer_token(&request_with(None)), Err(DenyReason::MissingToken));
        assert_eq!(bearer_token(&request_with(Some(""))), Err(DenyReason::MissingToken));
    }

    #[test]
    fn test_bearer_token_rejects_other_shapes() {
        for header in ["Basic dXNlcjpwYXNz", "bearer abc", "Bearer a b", "Bearer", "abc"] {
            assert_eq!(
                bearer_token(&request_with(Some(header))),
                Err(DenyReason::MalformedToken),
                "header {header:?}"
            );
        }
    }
}
