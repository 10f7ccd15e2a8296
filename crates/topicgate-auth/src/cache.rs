//! Credential cache for resolved identities and roles.
//!
//! Identities are keyed by the digest of the caller's raw token and roles by
//! role id. Both maps share one refresh timestamp: when the TTL elapses the
//! whole cache is cleared at once, there is no per-entry expiry.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use topicgate_auth::cache::CredentialCache;
//! use topicgate_auth::identity::Role;
//!
//! let cache = CredentialCache::new(Duration::from_secs(300));
//! assert!(cache.refresh_if_expired());
//! assert!(!cache.refresh_if_expired());
//!
//! cache.store_role("r1", Role::new("r1", "reader"));
//! assert!(cache.lookup_role("r1").is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::digest::TokenDigest;
use crate::identity::{Identity, Role};

// =============================================================================
// Cache State
// =============================================================================

#[derive(Default)]
struct CacheState {
    identities: HashMap<TokenDigest, Arc<Identity>>,
    roles: HashMap<String, Arc<Role>>,

    /// `None` until the first refresh, and again after `invalidate`.
    last_refresh: Option<Instant>,

    refresh_count: u64,

    /// Bumped by every refresh and invalidation.
    generation: u64,
}

impl CacheState {
    fn is_expired(&self, ttl: Duration) -> bool {
        match self.last_refresh {
            None => true,
            Some(at) => at.elapsed() > ttl,
        }
    }
}

// =============================================================================
// Credential Cache
// =============================================================================

/// Concurrent, TTL-bounded store of identities and roles.
///
/// All state sits behind a single synchronous reader/writer lock. Every
/// critical section is a plain map operation, so the lock is never held
/// across an `.await`.
pub struct CredentialCache {
    state: RwLock<CacheState>,
    ttl: Duration,
}

impl CredentialCache {
    /// Create an empty cache.
    ///
    /// The cache starts out expired, so the first call to
    /// [`refresh_if_expired`](Self::refresh_if_expired) returns `true`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
        }
    }

    /// Configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up the identity previously stored for `raw_token`.
    #[must_use]
    pub fn lookup_identity(&self, raw_token: &str) -> Option<Arc<Identity>> {
        let digest = TokenDigest::of(raw_token);
        let state = self.state.read();
        let found = state.identities.get(&digest).cloned();

        tracing::trace!(token = %digest, hit = found.is_some(), "Identity cache lookup");
        found
    }

    /// Look up a role by id.
    #[must_use]
    pub fn lookup_role(&self, role_id: &str) -> Option<Arc<Role>> {
        let state = self.state.read();
        let found = state.roles.get(role_id).cloned();

        tracing::trace!(role_id = %role_id, hit = found.is_some(), "Role cache lookup");
        found
    }

    /// Store an identity under the digest of `raw_token`, replacing any
    /// previous entry.
    pub fn store_identity(&self, raw_token: &str, identity: Identity) -> Arc<Identity> {
        let digest = TokenDigest::of(raw_token);
        let identity = Arc::new(identity);

        tracing::debug!(
            token = %digest,
            user_id = %identity.id,
            "Caching identity"
        );

        self.state
            .write()
            .identities
            .insert(digest, Arc::clone(&identity));
        identity
    }

    /// Store a role under `role_id`, replacing any previous entry.
    pub fn store_role(&self, role_id: &str, role: Role) -> Arc<Role> {
        let role = Arc::new(role);

        tracing::debug!(role_id = %role_id, role_name = %role.name, "Caching role");

        self.state
            .write()
            .roles
            .insert(role_id.to_string(), Arc::clone(&role));
        role
    }

    /// Clear the cache if the TTL has elapsed since the last refresh.
    ///
    /// Returns `true` if this call performed the refresh. Expiry is checked
    /// under the shared lock and re-checked under the exclusive lock, so of
    /// several concurrent callers only one observes `true`.
    pub fn refresh_if_expired(&self) -> bool {
        if !self.state.read().is_expired(self.ttl) {
            return false;
        }

        let mut state = self.state.write();
        if !state.is_expired(self.ttl) {
            return false;
        }

        let dropped_identities = state.identities.len();
        let dropped_roles = state.roles.len();

        state.identities = HashMap::new();
        state.roles = HashMap::new();
        state.last_refresh = Some(Instant::now());
        state.refresh_count += 1;
        state.generation += 1;
        drop(state);

        tracing::debug!(
            dropped_identities,
            dropped_roles,
            ttl_secs = self.ttl.as_secs(),
            "Credential cache refreshed"
        );
        true
    }

    /// Current cache generation.
    ///
    /// Capture it before a slow fetch and hand it to
    /// [`bulk_load_roles_at`](Self::bulk_load_roles_at) so the result is
    /// dropped if the cache was cleared in the meantime.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Insert every role, keyed by its own id.
    pub fn bulk_load_roles<I>(&self, roles: I) -> usize
    where
        I: IntoIterator<Item = Role>,
    {
        let mut state = self.state.write();
        let loaded = Self::insert_roles(&mut state, roles);
        let total = state.roles.len();
        drop(state);

        tracing::debug!(loaded, total, "Bulk-loaded roles into cache");
        loaded
    }

    /// Like [`bulk_load_roles`](Self::bulk_load_roles), but only if the cache
    /// is still at `generation`.
    ///
    /// Returns `None` without touching the cache when a refresh or
    /// invalidation happened after `generation` was read.
    pub fn bulk_load_roles_at<I>(&self, generation: u64, roles: I) -> Option<usize>
    where
        I: IntoIterator<Item = Role>,
    {
        let mut state = self.state.write();
        if state.generation != generation {
            let current = state.generation;
            drop(state);
            tracing::debug!(
                expected = generation,
                current,
                "Discarding roles fetched for a previous cache generation"
            );
            return None;
        }
        let loaded = Self::insert_roles(&mut state, roles);
        let total = state.roles.len();
        drop(state);

        tracing::debug!(loaded, total, generation, "Bulk-loaded roles into cache");
        Some(loaded)
    }

    fn insert_roles<I>(state: &mut CacheState, roles: I) -> usize
    where
        I: IntoIterator<Item = Role>,
    {
        let mut loaded = 0usize;
        for role in roles {
            state.roles.insert(role.id.clone(), Arc::new(role));
            loaded += 1;
        }
        loaded
    }

    /// Force the next [`refresh_if_expired`](Self::refresh_if_expired) to
    /// clear the cache.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.last_refresh = None;
        state.generation += 1;
        drop(state);
        tracing::debug!("Credential cache invalidated");
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            identity_count: state.identities.len(),
            role_count: state.roles.len(),
            ttl: self.ttl,
            last_refresh_age: state.last_refresh.map(|at| at.elapsed()),
            refresh_count: state.refresh_count,
        }
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CredentialCache")
            .field("identities", &stats.identity_count)
            .field("roles", &stats.role_count)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Point-in-time statistics about the credential cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached identities.
    pub identity_count: usize,

    /// Number of cached roles.
    pub role_count: usize,

    /// Cache TTL.
    pub ttl: Duration,

    /// Time since the last refresh, `None` if the cache has never been
    /// refreshed or was invalidated.
    pub last_refresh_age: Option<Duration>,

    /// Number of refreshes performed since construction.
    pub refresh_count: u64,
}

// =============================================================================
// Tests
// =============================================================================
