//! Reverse proxy in front of the upstream services.
//!
//! Every request that is not a gateway endpoint goes through the same
//! pipeline:
//!
//! ```text
//! ┌─────────────┐
//! │   Request   │
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ authorization layer  │  (bearer token -> Grant, unless route is unprotected)
//! └──────┬───────────────┘
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ RouteTable           │  (longest path prefix)
//! └──────┬───────────────┘
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ proxy::forward       │  (identity headers injected, Authorization dropped)
//! └──────────────────────┘
//! ```

pub mod error;
pub mod proxy;
pub mod router;

pub use error::GatewayError;
pub use router::{Route, RouteTable, has_dot_segment};
