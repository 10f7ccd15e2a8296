//! Identity service adapter.
//!
//! The decision engine needs exactly three things from the identity service:
//! validate a caller's token, fetch one role, and list all roles for cache
//! warm-up. [`IdentityProvider`] captures that contract; [`HttpIdentityProvider`]
//! implements it against a PocketBase-style collections API.

mod http;

pub use http::{HttpIdentityProvider, HttpIdentityProviderConfig};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// An authenticated principal as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Record identifier.
    pub id: String,

    /// Login name.
    #[serde(default)]
    pub username: String,

    /// Identifier of the role this identity belongs to.
    #[serde(rename = "roleID", alias = "role_id", alias = "roleId", default)]
    pub role_id: String,

    /// Inactive identities are never treated as authenticated.
    #[serde(default)]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// =============================================================================
// Role
// =============================================================================

/// A named bundle of permission patterns.
///
/// `publish_patterns` govern write-like methods and `subscribe_patterns`
/// govern read-like methods. Order is preserved as delivered by the identity
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(
        rename = "publish_permissions",
        default,
        deserialize_with = "deserialize_patterns"
    )]
    pub publish_patterns: Vec<String>,

    #[serde(
        rename = "subscribe_permissions",
        default,
        deserialize_with = "deserialize_patterns"
    )]
    pub subscribe_patterns: Vec<String>,
}

impl Role {
    /// Create a role with empty permission lists.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            publish_patterns: Vec::new(),
            subscribe_patterns: Vec::new(),
        }
    }

    /// Set the publish (write) patterns.
    #[must_use]
    pub fn with_publish<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the subscribe (read) patterns.
    #[must_use]
    pub fn with_subscribe<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Accepts a JSON array of strings, `null`, or a string holding a JSON array.
///
/// JSON fields in the identity service are sometimes delivered pre-encoded.
fn deserialize_patterns<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPatterns {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<RawPatterns>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(RawPatterns::List(list)) => Ok(list),
        Some(RawPatterns::Encoded(encoded)) if encoded.trim().is_empty() => Ok(Vec::new()),
        Some(RawPatterns::Encoded(encoded)) => serde_json::from_str(&encoded)
            .map_err(|e| D::Error::custom(format!("invalid permission list: {e}"))),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by an identity service adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    /// The token was rejected or belongs to an inactive identity.
    #[error("Invalid credential: {message}")]
    InvalidCredential {
        /// Description of why the credential was rejected.
        message: String,
    },

    /// The requested record does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// Identifier of the missing record.
        resource: String,
    },

    /// The identity service could not be reached or timed out.
    #[error("Identity service unavailable: {message}")]
    Unavailable {
        /// Description of the transport failure.
        message: String,
    },

    /// The identity service answered with something we could not decode.
    #[error("Identity service protocol error: {message}")]
    Protocol {
        /// Description of the decoding failure.
        message: String,
    },
}

impl IdentityError {
    /// Creates a new `InvalidCredential` error.
    #[must_use]
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if the service itself could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Type alias for identity adapter results.
pub type IdentityResult<T> = Result<T, IdentityError>;

// =============================================================================
// Provider Trait
// =============================================================================

/// Capabilities the decision engine requires from the identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate a raw bearer token and return its identity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredential` if the token is rejected or the identity
    /// is inactive, `Unavailable` if the service cannot be reached.
    async fn validate_token(&self, raw_token: &str) -> IdentityResult<Identity>;

    /// Fetch a single role by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the role does not exist.
    async fn fetch_role(&self, role_id: &str) -> IdentityResult<Role>;

    /// Fetch every role, used to pre-warm the role cache.
    async fn fetch_all_roles(&self) -> IdentityResult<Vec<Role>>;
}
