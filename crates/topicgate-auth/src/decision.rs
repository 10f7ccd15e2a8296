//! Access requests and the decisions returned for them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::identity::{Identity, Role};

// =============================================================================
// Access Request
// =============================================================================

/// Everything the engine needs to decide one request.
#[derive(Clone)]
pub struct AccessRequest {
    /// Raw bearer token, possibly empty.
    pub token: String,

    /// HTTP method, e.g. `GET`.
    pub method: String,

    /// Request path including the leading `/`.
    pub path: String,
}

impl AccessRequest {
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            method: method.into(),
            path: path.into(),
        }
    }
}

impl fmt::Debug for AccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRequest")
            .field("token", &if self.token.is_empty() { "<empty>" } else { "<redacted>" })
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

// =============================================================================
// Permission Kind
// =============================================================================

/// Which permission list of a role applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    /// Write-like methods: `POST`, `PUT`, `PATCH`, `DELETE`.
    Publish,
    /// Every other method.
    Subscribe,
}

impl PermissionKind {
    /// Classify an HTTP method. Matching is case-insensitive.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        const WRITE_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

        if WRITE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            Self::Publish
        } else {
            Self::Subscribe
        }
    }

    /// Select the matching pattern list from a role.
    #[must_use]
    pub fn patterns(self, role: &Role) -> &[String] {
        match self {
            Self::Publish => &role.publish_patterns,
            Self::Subscribe => &role.subscribe_patterns,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Grant
// =============================================================================

/// The positive outcome of an authorization: who was allowed and why.
#[derive(Debug, Clone)]
pub struct Grant {
    pub identity: Arc<Identity>,
    pub role: Arc<Role>,
    pub permission: PermissionKind,

    /// First pattern in list order that matched the path.
    pub matched_pattern: String,
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Reason an access request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No bearer token was supplied.
    #[error("missing authorization token")]
    MissingToken,

    /// The Authorization header is not of the form `Bearer <token>`.
    #[error("invalid authorization format")]
    MalformedToken,

    /// The token was rejected or the identity is inactive.
    #[error("invalid or expired token")]
    InvalidCredential,

    /// The identity is valid but its role could not be resolved.
    #[error("failed to resolve role")]
    RoleResolutionFailed,

    /// No permission pattern of the role matched the request.
    #[error("insufficient permissions")]
    InsufficientPermission,

    /// The identity service could not be reached in time.
    #[error("authorization service unavailable")]
    UpstreamUnavailable,
}

impl DenyReason {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::InvalidCredential => "invalid_credential",
            Self::RoleResolutionFailed => "role_resolution_failed",
            Self::InsufficientPermission => "insufficient_permission",
            Self::UpstreamUnavailable => "upstream_unavailable",
        }
    }

    /// HTTP status code a gateway should answer with.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::MissingToken | Self::MalformedToken | Self::InvalidCredential => 401,
            Self::InsufficientPermission => 403,
            Self::RoleResolutionFailed | Self::UpstreamUnavailable => 500,
        }
    }

    /// Returns `true` if the caller must authenticate (401).
    #[must_use]
    pub const fn is_authentication_failure(self) -> bool {
        self.status_code() == 401
    }

    /// Returns `true` if the failure is on the gateway's side.
    #[must_use]
    pub const fn is_server_error(self) -> bool {
        self.status_code() >= 500
    }
}

// =============================================================================
// Access Decision
// =============================================================================

/// Result of authorizing one request.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    /// Access is granted.
    Allow(Grant),
    /// Access is denied with a reason.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Get the deny reason if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Deny(reason) => Some(*reason),
            Self::Allow(_) => None,
        }
    }

    /// Get the grant if access was allowed.
    #[must_use]
    pub fn grant(&self) -> Option<&Grant> {
        match self {
            Self::Allow(grant) => Some(grant),
            Self::Deny(_) => None,
        }
    }
}
