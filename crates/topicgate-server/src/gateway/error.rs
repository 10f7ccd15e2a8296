//! Gateway error types and their JSON representation.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use topicgate_auth::DenyReason;

/// Errors returned to gateway clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The authorization pipeline refused the request.
    #[error("{0}")]
    Denied(DenyReason),

    /// No route prefix matches the request path.
    #[error("no route configured for this path")]
    RouteNotFound { path: String },

    /// Upstream could not be reached or failed mid-response.
    #[error("backend service error: {0}")]
    Upstream(String),

    /// Upstream did not answer within the route timeout.
    #[error("backend service timed out after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u128 },

    /// The whole request exceeded the server request timeout.
    #[error("request timed out")]
    RequestTimeout,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Denied(reason) => StatusCode::from_u16(reason.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } | Self::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidConfig(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the caller has to present valid credentials.
    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        matches!(self, Self::Denied(reason) if reason.is_authentication_failure())
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Denied(reason) => reason.code(),
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Upstream(_) => "upstream_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::RequestTimeout => "request_timeout",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message shown to the client. Server-side details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Denied(reason) if reason.is_server_error() => "internal server error".into(),
            Self::Denied(reason) => reason.to_string(),
            Self::Upstream(_) => "backend service error".into(),
            Self::UpstreamTimeout { .. } => "backend service timeout".into(),
            Self::InvalidConfig(_) | Self::Internal(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl From<DenyReason> for GatewayError {
    fn from(reason: DenyReason) -> Self {
        Self::Denied(reason)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "gateway error");
        }

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let body = json!({
            "error": self.public_message(),
            "code": self.code(),
            "status": status.as_u16(),
            "timestamp": timestamp,
        });

        let challenge = self.requires_authentication();
        let mut response = (status, Json(body)).into_response();
        if challenge {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_has_challenge() {
        let response = GatewayError::Denied(DenyReason::MissingToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");

        let body = body_json(response).await;
        assert_eq!(body["error"], "missing authorization token");
        assert_eq!(body["code"], "missing_token");
        assert_eq!(body["status"], 401);
        assert!(body["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn test_challenge_only_for_authentication_failures() {
        for reason in [
            DenyReason::MissingToken,
            DenyReason::MalformedToken,
            DenyReason::InvalidCredential,
        ] {
            let err = GatewayError::Denied(reason);
            assert!(err.requires_authentication(), "{reason:?}");
            assert_eq!(err.into_response().headers()[WWW_AUTHENTICATE], "Bearer");
        }

        for err in [
            GatewayError::Denied(DenyReason::InsufficientPermission),
            GatewayError::Denied(DenyReason::UpstreamUnavailable),
            GatewayError::BadRequest("path contains dot segments".into()),
            GatewayError::RouteNotFound { path: "/x".into() },
        ] {
            assert!(!err.requires_authentication(), "{err:?}");
            assert!(err.into_response().headers().get(WWW_AUTHENTICATE).is_none());
        }
    }

    #[tokio::test]
    async fn test_forbidden_has_no_challenge() {
        let response = GatewayError::Denied(DenyReason::InsufficientPermission).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
        assert_eq!(body_json(response).await["error"], "insufficient permissions");
    }

    #[tokio::test]
    async fn test_server_side_denials_are_opaque() {
        for reason in [DenyReason::RoleResolutionFailed, DenyReason::UpstreamUnavailable] {
            let response = GatewayError::Denied(reason).into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = body_json(response).await;
            assert_eq!(body["error"], "internal server error");
            assert_eq!(body["code"], reason.code());
        }
    }

    #[tokio::test]
    async fn test_upstream_errors() {
        let response = GatewayError::upstream("connection refused").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "backend service error");

        let response = GatewayError::UpstreamTimeout { timeout_ms: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let response = GatewayError::RouteNotFound { path: "/x".into() }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await["error"],
            "no route configured for this path"
        );
    }
}
