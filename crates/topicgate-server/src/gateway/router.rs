//! Static route table mapping path prefixes to upstream services.

use std::time::Duration;

use url::Url;

use super::error::GatewayError;
use crate::config::RouteConfig;

/// One resolved upstream route.
#[derive(Debug, Clone)]
pub struct Route {
    pub path_prefix: String,
    pub target: Url,
    pub strip_prefix: bool,
    pub protected: bool,
    pub timeout: Duration,
}

impl Route {
    /// Build a route from its configuration entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfig`] if the target URL does not parse.
    pub fn from_config(cfg: &RouteConfig) -> Result<Self, GatewayError> {
        let target = Url::parse(&cfg.target_url).map_err(|e| {
            GatewayError::InvalidConfig(format!("invalid target_url '{}': {e}", cfg.target_url))
        })?;
        Ok(Self {
            path_prefix: cfg.path_prefix.clone(),
            target,
            strip_prefix: cfg.strip_prefix,
            protected: cfg.protected,
            timeout: cfg.timeout,
        })
    }

    /// Path to request upstream. Always starts with `/`.
    pub fn upstream_path(&self, path: &str) -> String {
        let rest = if self.strip_prefix {
            path.strip_prefix(self.path_prefix.as_str()).unwrap_or(path)
        } else {
            path
        };
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }

    /// Full upstream URL for a request path and optional query string.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.target.clone();
        let base = self.target.path().trim_end_matches('/');
        url.set_path(&format!("{base}{}", self.upstream_path(path)));
        url.set_query(query);
        url
    }
}

/// Whether any path segment is `.` or `..`, literally or percent-encoded.
///
/// URL serialization collapses such segments, so the upstream path would no
/// longer be the path that was routed and authorized.
pub fn has_dot_segment(path: &str) -> bool {
    path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        matches!(decoded.as_str(), "." | "..")
    })
}

/// Routes ordered so that the longest prefix is tried first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// # Errors
    ///
    /// Fails on the first route whose target URL is invalid.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, GatewayError> {
        let mut routes = routes
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort keeps configuration order among equal prefixes
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        for route in &routes {
            tracing::debug!(
                prefix = %route.path_prefix,
                target = %route.target,
                protected = route.protected,
                "route registered"
            );
        }
        Ok(Self { routes })
    }

    /// Longest route whose prefix the path starts with.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| path.starts_with(route.path_prefix.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
