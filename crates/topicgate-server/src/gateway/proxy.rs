//! Forwarding of authorized requests to upstream services.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    response::Response,
};
use tracing::{debug, warn};

use topicgate_auth::Grant;

use super::error::GatewayError;
use super::router::Route;

/// Identity headers set by the gateway. Incoming copies are always dropped.
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USERNAME: HeaderName = HeaderName::from_static("x-username");
pub const X_ROLE_ID: HeaderName = HeaderName::from_static("x-role-id");
pub const X_ROLE_NAME: HeaderName = HeaderName::from_static("x-role-name");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Forward `request` to the upstream selected by `route`.
///
/// # Arguments
///
/// * `grant` - Authorization result, absent for unprotected routes
/// * `body_limit` - Maximum request body size read into memory
///
/// # Errors
///
/// Returns [`GatewayError::UpstreamTimeout`] when the route timeout elapses and
/// [`GatewayError::Upstream`] for any other transport failure.
pub async fn forward(
    client: &reqwest::Client,
    route: &Route,
    request: Request<Body>,
    grant: Option<&Grant>,
    body_limit: usize,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let url = route.upstream_url(parts.uri.path(), parts.uri.query());
    let request_id = parts.extensions.get::<HeaderValue>().cloned();

    let mut headers = filter_request_headers(&parts.headers);
    if let Some(grant) = grant {
        inject_identity_headers(&mut headers, grant);
    }
    if let Some(request_id) = request_id {
        headers.insert(X_REQUEST_ID, request_id);
    }

    let body_bytes = axum::body::to_bytes(body, body_limit)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("failed to read request body: {e}")))?;

    debug!(
        method = %parts.method,
        upstream = %url,
        prefix = %route.path_prefix,
        "forwarding request"
    );

    let upstream_request = client
        .request(parts.method.clone(), url.clone())
        .headers(headers)
        .body(body_bytes)
        .timeout(route.timeout)
        .build()
        .map_err(|e| GatewayError::internal(format!("failed to build upstream request: {e}")))?;

    let upstream_response = client.execute(upstream_request).await.map_err(|e| {
        if e.is_timeout() {
            warn!(upstream = %url, timeout_ms = route.timeout.as_millis(), "upstream timed out");
            GatewayError::UpstreamTimeout {
                timeout_ms: route.timeout.as_millis(),
            }
        } else if e.is_connect() {
            warn!(upstream = %url, error = %e, "failed to connect to upstream");
            GatewayError::upstream(format!("failed to connect to upstream: {e}"))
        } else {
            warn!(upstream = %url, error = %e, "upstream request failed");
            GatewayError::upstream(format!("upstream request failed: {e}"))
        }
    })?;

    let status = upstream_response.status();
    debug!(status = %status, upstream = %url, "upstream responded");

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    let response_body = upstream_response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout {
                timeout_ms: route.timeout.as_millis(),
            }
        } else {
            GatewayError::upstream(format!("failed to read upstream body: {e}"))
        }
    })?;

    builder
        .body(Body::from(response_body))
        .map_err(|e| GatewayError::internal(format!("failed to build response: {e}")))
}

/// Copy client headers minus hop-by-hop, credentials and gateway-owned identity headers.
fn filter_request_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str) || is_auth_header(name_str) || is_identity_header(name_str)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn inject_identity_headers(headers: &mut HeaderMap, grant: &Grant) {
    let values = [
        (X_USER_ID, grant.identity.id.as_str()),
        (X_USERNAME, grant.identity.username.as_str()),
        (X_ROLE_ID, grant.role.id.as_str()),
        (X_ROLE_NAME, grant.role.name.as_str()),
    ];
    for (name, value) in values {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "identity value is not a valid header value, skipped"),
        }
    }
}

/// Hop-by-hop headers (RFC 7230 section 6.1) plus `host`, which is set for the target.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn is_auth_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization")
}

fn is_identity_header(name: &str) -> bool {
    [X_USER_ID, X_USERNAME, X_ROLE_ID, X_ROLE_NAME, X_REQUEST_ID]
        .iter()
        .any(|h| h.as_str().eq_ignore_ascii_case(name))
}
