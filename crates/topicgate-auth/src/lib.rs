//! # topicgate-auth
//!
//! Authorization decision pipeline for the topicgate gateway.
//!
//! Requests are authorized by resolving the caller's bearer token to an
//! identity and role through an external identity service, then matching the
//! request path against the role's topic-style permission patterns.
//!
//! ## Modules
//!
//! - [`matcher`] - Topic pattern matching (`/ + #` and `. * >` dialects)
//! - [`digest`] - One-way token digests used as cache keys
//! - [`cache`] - TTL-bounded credential cache
//! - [`identity`] - Identity service adapter trait and HTTP implementation
//! - [`decision`] - Access requests, grants and deny reasons
//! - [`engine`] - The decision engine tying everything together

pub mod cache;
pub mod decision;
pub mod digest;
pub mod engine;
pub mod identity;
pub mod matcher;

pub use cache::{CacheStats, CredentialCache};
pub use decision::{AccessDecision, AccessRequest, DenyReason, Grant, PermissionKind};
pub use digest::TokenDigest;
pub use engine::{DecisionEngine, EngineConfig};
pub use identity::{
    HttpIdentityProvider, HttpIdentityProviderConfig, Identity, IdentityError, IdentityProvider,
    IdentityResult, Role,
};
pub use matcher::TopicSchema;
