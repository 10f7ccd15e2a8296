//! Authorization decision engine.
//!
//! Combines the credential cache, the identity provider and the topic matcher
//! into one allow/deny decision per request:
//!
//! 1. an empty token is denied without any external call
//! 2. an expired cache is cleared and roles are preloaded (best effort)
//! 3. the identity is taken from the cache or validated upstream
//! 4. the role is taken from the cache or fetched upstream
//! 5. the HTTP method selects the publish or subscribe pattern list
//! 6. the first pattern matching the path grants access
//!
//! The engine itself holds no mutable state. Each external call is made at
//! most once per request and is bounded by [`EngineConfig::call_timeout`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use topicgate_auth::{AccessRequest, CredentialCache, DecisionEngine, EngineConfig};
//!
//! let cache = Arc::new(CredentialCache::new(Duration::from_secs(300)));
//! let engine = DecisionEngine::new(provider, cache, EngineConfig::default());
//!
//! let decision = engine.authorize(&AccessRequest::new(token, "GET", "/api/v1/devices")).await;
//! if decision.is_allowed() {
//!     // forward the request
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, CredentialCache};
use crate::decision::{AccessDecision, AccessRequest, DenyReason, Grant, PermissionKind};
use crate::digest::TokenDigest;
use crate::identity::{Identity, IdentityError, IdentityProvider, IdentityResult, Role};
use crate::matcher::{first_match, path_to_topic};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the decision engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for each identity service call (default: 5 seconds).
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

// =============================================================================
// Decision Engine
// =============================================================================

/// Decides whether a request may proceed.
pub struct DecisionEngine {
    provider: Arc<dyn IdentityProvider>,
    cache: Arc<CredentialCache>,
    config: EngineConfig,
}

impl DecisionEngine {
    /// Create a new engine.
    ///
    /// # Arguments
    ///
    /// * `provider` - Identity service adapter
    /// * `cache` - Credential cache owned by the caller
    /// * `config` - Engine configuration
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        cache: Arc<CredentialCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// The credential cache used by this engine.
    #[must_use]
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Decide a single request.
    ///
    /// Never fails: every error is resolved into a [`DenyReason`].
    pub async fn authorize(&self, request: &AccessRequest) -> AccessDecision {
        if request.token.is_empty() {
            tracing::debug!(method = %request.method, path = %request.path, "Denied: missing token");
            return AccessDecision::Deny(DenyReason::MissingToken);
        }

        if self.cache.refresh_if_expired()
            && let Err(e) = self.preload_roles().await
        {
            tracing::warn!(error = %e, "Role preload failed, falling back to lazy fetches");
        }

        let identity = match self.resolve_identity(&request.token).await {
            Ok(identity) => identity,
            Err(reason) => return AccessDecision::Deny(reason),
        };

        let role = match self.resolve_role(&identity).await {
            Ok(role) => role,
            Err(reason) => return AccessDecision::Deny(reason),
        };

        let permission = PermissionKind::from_method(&request.method);
        let topic = path_to_topic(&request.path);

        let matched = first_match(permission.patterns(&role), topic).map(str::to_string);

        match matched {
            Some(matched_pattern) => {
                tracing::debug!(
                    user_id = %identity.id,
                    role = %role.name,
                    permission = %permission,
                    pattern = %matched_pattern,
                    topic = %topic,
                    "Access granted"
                );
                AccessDecision::Allow(Grant {
                    identity,
                    role,
                    permission,
                    matched_pattern,
                })
            }
            None => {
                tracing::debug!(
                    user_id = %identity.id,
                    role = %role.name,
                    permission = %permission,
                    topic = %topic,
                    "Denied: no matching pattern"
                );
                AccessDecision::Deny(DenyReason::InsufficientPermission)
            }
        }
    }

    /// Clear the cache if it is due and preload every role.
    ///
    /// Intended for startup; unlike [`authorize`](Self::authorize) the preload
    /// error is returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns the identity service error if the role listing fails.
    pub async fn warm_up(&self) -> IdentityResult<usize> {
        self.cache.refresh_if_expired();
        let loaded = self.preload_roles().await?;
        tracing::info!(roles = loaded, "Credential cache warmed up");
        Ok(loaded)
    }

    /// Drop every cached credential and preload roles again.
    ///
    /// Identities are revalidated lazily on their next request.
    ///
    /// # Errors
    ///
    /// Returns the identity service error if the role listing fails. The
    /// cache stays cleared in that case.
    pub async fn reload(&self) -> IdentityResult<usize> {
        self.cache.invalidate();
        self.cache.refresh_if_expired();
        let loaded = self.preload_roles().await?;
        tracing::info!(roles = loaded, "Credential cache reloaded");
        Ok(loaded)
    }

    async fn preload_roles(&self) -> IdentityResult<usize> {
        let generation = self.cache.generation();
        let roles = self.bounded(self.provider.fetch_all_roles()).await?;
        Ok(self.cache.bulk_load_roles_at(generation, roles).unwrap_or(0))
    }

    async fn resolve_identity(&self, token: &str) -> Result<Arc<Identity>, DenyReason> {
        if let Some(identity) = self.cache.lookup_identity(token) {
            return Ok(identity);
        }

        match self.bounded(self.provider.validate_token(token)).await {
            Ok(identity) if identity.active => Ok(self.cache.store_identity(token, identity)),
            Ok(identity) => {
                tracing::debug!(user_id = %identity.id, "Denied: identity inactive");
                Err(DenyReason::InvalidCredential)
            }
            Err(e) => {
                let reason = if e.is_unavailable() {
                    DenyReason::UpstreamUnavailable
                } else {
                    DenyReason::InvalidCredential
                };
                tracing::debug!(
                    token = %TokenDigest::of(token),
                    error = %e,
                    reason = reason.code(),
                    "Token validation failed"
                );
                Err(reason)
            }
        }
    }

    async fn resolve_role(&self, identity: &Identity) -> Result<Arc<Role>, DenyReason> {
        if identity.role_id.is_empty() {
            tracing::warn!(user_id = %identity.id, "Identity has no role assigned");
            return Err(DenyReason::RoleResolutionFailed);
        }

        if let Some(role) = self.cache.lookup_role(&identity.role_id) {
            return Ok(role);
        }

        match self.bounded(self.provider.fetch_role(&identity.role_id)).await {
            Ok(role) => Ok(self.cache.store_role(&identity.role_id, role)),
            Err(e) => {
                let reason = if e.is_unavailable() {
                    DenyReason::UpstreamUnavailable
                } else {
                    DenyReason::RoleResolutionFailed
                };
                tracing::warn!(
                    user_id = %identity.id,
                    role_id = %identity.role_id,
                    error = %e,
                    reason = reason.code(),
                    "Role resolution failed"
                );
                Err(reason)
            }
        }
    }

    /// Run an identity service call under the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> IdentityResult<T>
    where
        F: Future<Output = IdentityResult<T>>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IdentityError::unavailable(format!(
                "identity service call exceeded {}ms",
                self.config.call_timeout.as_millis()
            ))),
        }
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
