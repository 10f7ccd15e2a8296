pub mod config;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, CacheConfig, IdentityConfig, LoggingConfig, RouteConfig, ServerConfig};
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, TopicgateServer, build_app};
