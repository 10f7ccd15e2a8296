use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, time::Duration};
use url::Url;

use topicgate_auth::{EngineConfig, HttpIdentityProviderConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity service connection
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Credential cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upstream routes, matched by longest path prefix
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(String),

    #[error("config deserialize error: {0}")]
    Deserialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Identity service validations
        if self.identity.url.trim().is_empty() {
            return Err("identity.url is required".into());
        }
        self.identity.base_url()?;
        if self.identity.service_account.is_empty() || self.identity.service_password.is_empty() {
            return Err("identity.service_account and identity.service_password are required".into());
        }
        if self.identity.user_collection.is_empty() || self.identity.role_collection.is_empty() {
            return Err("identity collections must not be empty".into());
        }
        if self.identity.request_timeout.is_zero() {
            return Err("identity.request_timeout must be > 0".into());
        }
        // Cache validation
        if self.cache.ttl_seconds == 0 {
            return Err("cache.ttl_seconds must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Route validations
        if self.routes.is_empty() {
            return Err("at least one [[routes]] entry is required".into());
        }
        for (idx, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| format!("routes[{idx}]: {e}"))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    /// Engine settings derived from the identity service timeout.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_call_timeout(self.identity.request_timeout)
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Upper bound for handling one request end to end
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9000
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

// =============================================================================
// Identity Service
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Base URL, e.g. `http://127.0.0.1:8090`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub service_account: String,
    #[serde(default)]
    pub service_password: String,
    #[serde(default = "default_user_collection")]
    pub user_collection: String,
    #[serde(default = "default_role_collection")]
    pub role_collection: String,
    #[serde(default = "default_identity_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

fn default_user_collection() -> String {
    "users".into()
}
fn default_role_collection() -> String {
    "mqtt_roles".into()
}
fn default_identity_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_max_idle_per_host() -> usize {
    10
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_account: String::new(),
            service_password: String::new(),
            user_collection: default_user_collection(),
            role_collection: default_role_collection(),
            request_timeout: default_identity_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

impl IdentityConfig {
    pub fn base_url(&self) -> Result<Url, String> {
        let url = Url::parse(self.url.trim())
            .map_err(|e| format!("identity.url is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("identity.url must use http or https".into());
        }
        Ok(url)
    }

    /// HTTP client settings for the identity provider.
    pub fn provider_config(&self) -> Result<HttpIdentityProviderConfig, String> {
        Ok(HttpIdentityProviderConfig::new(self.base_url()?)
            .with_user_collection(&self.user_collection)
            .with_role_collection(&self.role_collection)
            .with_request_timeout(self.request_timeout)
            .with_max_idle_per_host(self.max_idle_per_host))
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("url", &self.url)
            .field("service_account", &self.service_account)
            .field("service_password", &"***")
            .field("user_collection", &self.user_collection)
            .field("role_collection", &self.role_collection)
            .field("request_timeout", &self.request_timeout)
            .field("max_idle_per_host", &self.max_idle_per_host)
            .finish()
    }
}

// =============================================================================
// Cache / Logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}
fn default_cache_ttl() -> u64 {
    300
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Routes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Request path prefix, must start with `/`
    pub path_prefix: String,
    /// Upstream base URL
    pub target_url: String,
    /// Remove `path_prefix` before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Require authorization (default: true)
    #[serde(default = "default_protected")]
    pub protected: bool,
    /// Upstream request timeout
    #[serde(default = "default_route_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_protected() -> bool {
    true
}
fn default_route_timeout() -> Duration {
    Duration::from_secs(30)
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.path_prefix.is_empty() {
            return Err("path_prefix is required".into());
        }
        if !self.path_prefix.starts_with('/') {
            return Err(format!("path_prefix '{}' must start with '/'", self.path_prefix));
        }
        if self.target_url.is_empty() {
            return Err("target_url is required".into());
        }
        let target = Url::parse(&self.target_url)
            .map_err(|e| format!("invalid target_url '{}': {e}", self.target_url))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(format!("target_url '{}' must use http or https", self.target_url));
        }
        if self.timeout.is_zero() {
            return Err("timeout must be > 0".into());
        }
        Ok(())
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File, FileFormat};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "topicgate.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf).format(FileFormat::Toml));
        }
        // Environment variable overrides, e.g., TOPICGATE__IDENTITY__URL=http://pb:8090
        builder = builder.add_source(
            Environment::with_prefix("TOPICGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate().map_err(ConfigError::Invalid)?;
        Ok(merged)
    }
}
