//! HTTP identity provider for a PocketBase-style collections API.
//!
//! Endpoints used:
//!
//! - `POST /api/collections/_superusers/auth-with-password` - service session
//! - `POST /api/collections/{users}/auth-refresh` - token validation
//! - `GET  /api/collections/{roles}/records/{id}` - single role
//! - `GET  /api/collections/{roles}/records?page=N&perPage=200` - role listing
//! - `GET  /api/health` - liveness

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{Identity, IdentityError, IdentityProvider, IdentityResult, Role};

/// Records requested per page when listing roles.
const ROLE_PAGE_SIZE: u32 = 200;

/// Upper bound on pages followed when listing roles.
const MAX_ROLE_PAGES: u32 = 1000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`HttpIdentityProvider`].
#[derive(Debug, Clone)]
pub struct HttpIdentityProviderConfig {
    /// Base URL of the identity service.
    pub base_url: Url,

    /// Collection holding end-user records (default: `users`).
    pub user_collection: String,

    /// Collection holding role records (default: `mqtt_roles`).
    pub role_collection: String,

    /// Per-request HTTP timeout (default: 5 seconds).
    pub request_timeout: Duration,

    /// Idle connections kept per host (default: 10).
    pub max_idle_per_host: usize,
}

impl HttpIdentityProviderConfig {
    /// Creates a configuration with default collections and timeouts.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            user_collection: "users".to_string(),
            role_collection: "mqtt_roles".to_string(),
            request_timeout: Duration::from_secs(5),
            max_idle_per_host: 10,
        }
    }

    /// Sets the user collection name.
    #[must_use]
    pub fn with_user_collection(mut self, collection: impl Into<String>) -> Self {
        self.user_collection = collection.into();
        self
    }

    /// Sets the role collection name.
    #[must_use]
    pub fn with_role_collection(mut self, collection: impl Into<String>) -> Self {
        self.role_collection = collection.into();
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the idle connection pool size per host.
    #[must_use]
    pub fn with_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.max_idle_per_host = max_idle;
        self
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ServiceAuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AuthRefreshResponse {
    record: Identity,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

// =============================================================================
// Provider
// =============================================================================

/// [`IdentityProvider`] backed by the identity service's HTTP API.
///
/// Role reads use a service session obtained with
/// [`authenticate`](Self::authenticate). Token validation uses the caller's
/// own token and needs no service session.
pub struct HttpIdentityProvider {
    http_client: reqwest::Client,
    config: HttpIdentityProviderConfig,
    service_token: RwLock<Option<String>>,
}

impl HttpIdentityProvider {
    /// Creates a provider with a pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the HTTP client cannot be built.
    pub fn new(config: HttpIdentityProviderConfig) -> IdentityResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                IdentityError::unavailable(format!("failed to create HTTP client: {e}"))
            })?;

        tracing::debug!(
            base_url = %config.base_url,
            user_collection = %config.user_collection,
            role_collection = %config.role_collection,
            timeout_ms = config.request_timeout.as_millis() as u64,
            "Created identity service client"
        );

        Ok(Self {
            http_client,
            config,
            service_token: RwLock::new(None),
        })
    }

    /// Provider configuration.
    #[must_use]
    pub fn config(&self) -> &HttpIdentityProviderConfig {
        &self.config
    }

    /// Whether a service session has been established.
    #[must_use]
    pub fn has_service_session(&self) -> bool {
        self.service_token.read().is_some()
    }

    /// Authenticate the gateway's service account and keep the session token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredential` if the service rejects the credentials,
    /// `Unavailable` if it cannot be reached, `Protocol` if the response
    /// carries no token.
    pub async fn authenticate(&self, identity: &str, password: &str) -> IdentityResult<()> {
        let url = self.endpoint(&["api", "collections", "_superusers", "auth-with-password"])?;
        tracing::debug!(endpoint = %url, "Authenticating service account");

        let response = self
            .http_client
            .post(url)
            .json(&serde_json::json!({ "identity": identity, "password": password }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Service account authentication rejected");
            return Err(if status.is_client_error() {
                IdentityError::invalid_credential(format!(
                    "service account rejected with status {}: {}",
                    status.as_u16(),
                    truncate(&body)
                ))
            } else {
                IdentityError::unavailable(format!(
                    "service authentication failed with status {}",
                    status.as_u16()
                ))
            });
        }

        let auth: ServiceAuthResponse = decode(response).await?;
        if auth.token.is_empty() {
            return Err(IdentityError::protocol("service authentication returned an empty token"));
        }

        *self.service_token.write() = Some(auth.token);
        tracing::info!("Authenticated with identity service");
        Ok(())
    }

    /// Check that the identity service responds to its health endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the service is unreachable or unhealthy.
    pub async fn check_health(&self) -> IdentityResult<()> {
        let url = self.endpoint(&["api", "health"])?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IdentityError::unavailable(format!(
                "health check returned status {}",
                response.status().as_u16()
            )))
        }
    }

    /// Build an endpoint URL below the base URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> IdentityResult<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| IdentityError::protocol("identity service URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn require_service_token(&self) -> IdentityResult<String> {
        self.service_token
            .read()
            .clone()
            .ok_or_else(|| IdentityError::unavailable("no service session established"))
    }

    /// Map a non-success status on a service-session request.
    fn service_status_error(status: StatusCode, resource: &str) -> IdentityError {
        match status {
            StatusCode::NOT_FOUND => IdentityError::not_found(resource),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IdentityError::unavailable(
                format!("service session rejected with status {}", status.as_u16()),
            ),
            s if s.is_server_error() => {
                IdentityError::unavailable(format!("identity service returned {}", s.as_u16()))
            }
            s => IdentityError::protocol(format!(
                "unexpected status {} for {resource}",
                s.as_u16()
            )),
        }
    }

    async fn fetch_role_page(&self, page: u32, token: &str) -> IdentityResult<ListResponse<Role>> {
        let mut url = self.endpoint(&["api", "collections", self.config.role_collection.as_str(), "records"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("perPage", &ROLE_PAGE_SIZE.to_string());

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::service_status_error(status, "role listing"));
        }
        decode(response).await
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn validate_token(&self, raw_token: &str) -> IdentityResult<Identity> {
        let url = self.endpoint(&[
            "api",
            "collections",
            self.config.user_collection.as_str(),
            "auth-refresh",
        ])?;

        let response = self
            .http_client
            .post(url)
            .bearer_auth(raw_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IdentityError::unavailable(format!(
                "token validation failed with status {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Token rejected by identity service");
            return Err(IdentityError::invalid_credential(format!(
                "token rejected with status {}",
                status.as_u16()
            )));
        }

        let refreshed: AuthRefreshResponse = decode(response).await?;
        let identity = refreshed.record;

        if !identity.active {
            tracing::debug!(user_id = %identity.id, "Identity is inactive");
            return Err(IdentityError::invalid_credential(format!(
                "identity {} is inactive",
                identity.id
            )));
        }

        Ok(identity)
    }

    async fn fetch_role(&self, role_id: &str) -> IdentityResult<Role> {
        let token = self.require_service_token()?;
        let url = self.endpoint(&[
            "api",
            "collections",
            self.config.role_collection.as_str(),
            "records",
            role_id,
        ])?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::service_status_error(status, &format!("role {role_id}")));
        }

        decode(response).await
    }

    async fn fetch_all_roles(&self) -> IdentityResult<Vec<Role>> {
        let token = self.require_service_token()?;

        let mut roles = Vec::new();
        let mut page = 1u32;
        loop {
            let list = self.fetch_role_page(page, &token).await?;
            let received = list.items.len();
            roles.extend(list.items);

            let current = list.page.max(page);
            if received == 0 || current >= list.total_pages || page >= MAX_ROLE_PAGES {
                break;
            }
            page = current + 1;
        }

        tracing::debug!(count = roles.len(), pages = page, "Fetched roles from identity service");
        Ok(roles)
    }
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("base_url", &self.config.base_url.as_str())
            .field("has_service_session", &self.has_service_session())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn transport_error(e: reqwest::Error) -> IdentityError {
    if e.is_timeout() {
        IdentityError::unavailable("request to identity service timed out")
    } else if e.is_decode() {
        IdentityError::protocol(e.to_string())
    } else {
        IdentityError::unavailable(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> IdentityResult<T> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| IdentityError::protocol(format!("failed to decode response: {e}")))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpIdentityProvider {
        let config = HttpIdentityProviderConfig::new(Url::parse(&server.uri()).unwrap())
            .with_request_timeout(Duration::from_millis(500));
        HttpIdentityProvider::new(config).unwrap()
    }

    async fn authenticated(server: &MockServer) -> HttpIdentityProvider {
        Mock::given(method("POST"))
            .and(path("/api/collections/_superusers/auth-with-password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "service-token",
                "record": {"id": "admin"}
            })))
            .mount(server)
            .await;

        let provider = provider(server);
        provider.authenticate("svc@example.com", "pw").await.unwrap();
        provider
    }

    fn user_record(active: bool) -> serde_json::Value {
        json!({
            "token": "refreshed",
            "record": {
                "id": "u1",
                "username": "alice",
                "email": "alice@example.com",
                "roleID": "r1",
                "active": active
            }
        })
    }

    // -------------------------------------------------------------------------
    // Service Session
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_authenticate_stores_service_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/_superusers/auth-with-password"))
            .and(body_json(json!({"identity": "svc@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "svc"})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert!(!provider.has_service_session());
        provider.authenticate("svc@example.com", "pw").await.unwrap();
        assert!(provider.has_service_session());
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/_superusers/auth-with-password"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .authenticate("svc@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredential { .. }));
    }

    #[tokio::test]
    async fn test_role_calls_require_service_session() {
        let server = MockServer::start().await;
        let err = provider(&server).fetch_role("r1").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    // -------------------------------------------------------------------------
    // Token Validation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_validate_token_active_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .and(header("authorization", "Bearer caller-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_record(true)))
            .mount(&server)
            .await;

        let identity = provider(&server).validate_token("caller-token").await.unwrap();
        assert_eq!(identity.id, "u1");
        assert_eq!(identity.role_id, "r1");
    }

    #[tokio::test]
    async fn test_validate_token_inactive_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_record(false)))
            .mount(&server)
            .await;

        let err = provider(&server).validate_token("tok").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredential { .. }));
    }

    #[tokio::test]
    async fn test_validate_token_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server).validate_token("tok").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredential { .. }));
    }

    #[tokio::test]
    async fn test_validate_token_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).validate_token("tok").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_validate_token_timeout_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_record(true))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = provider(&server).validate_token("tok").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_validate_token_garbage_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/users/auth-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = provider(&server).validate_token("tok").await.unwrap_err();
        assert!(matches!(err, IdentityError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_custom_user_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/members/auth-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_record(true)))
            .expect(1)
            .mount(&server)
            .await;

        let config = HttpIdentityProviderConfig::new(Url::parse(&server.uri()).unwrap())
            .with_user_collection("members");
        let provider = HttpIdentityProvider::new(config).unwrap();
        provider.validate_token("tok").await.unwrap();
    }

    // -------------------------------------------------------------------------
    // Roles
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_role() {
        let server = MockServer::start().await;
        let provider = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/collections/mqtt_roles/records/r1"))
            .and(header("authorization", "Bearer service-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r1",
                "name": "device-writer",
                "publish_permissions": ["api/v1/devices/+"],
                "subscribe_permissions": ["api/v1/#"]
            })))
            .mount(&server)
            .await;

        let role = provider.fetch_role("r1").await.unwrap();
        assert_eq!(role.name, "device-writer");
        assert_eq!(role.publish_patterns, vec!["api/v1/devices/+"]);
    }

    #[tokio::test]
    async fn test_fetch_role_not_found() {
        let server = MockServer::start().await;
        let provider = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/collections/mqtt_roles/records/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider.fetch_role("missing").await.unwrap_err();
        assert!(matches!(err, IdentityError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fetch_all_roles_follows_pages() {
        let server = MockServer::start().await;
        let provider = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/collections/mqtt_roles/records"))
            .and(query_param("page", "1"))
            .and(query_param("perPage", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1, "perPage": 200, "totalItems": 2, "totalPages": 2,
                "items": [{"id": "r1", "name": "a", "publish_permissions": []}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/collections/mqtt_roles/records"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 2, "perPage": 200, "totalItems": 2, "totalPages": 2,
                "items": [{"id": "r2", "name": "b", "subscribe_permissions": "[\"#\"]"}]
            })))
            .mount(&server)
            .await;

        let roles = provider.fetch_all_roles().await.unwrap();
        let ids: Vec<_> = roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(roles[1].subscribe_patterns, vec!["#"]);
    }

    #[tokio::test]
    async fn test_fetch_all_roles_server_error() {
        let server = MockServer::start().await;
        let provider = authenticated(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/collections/mqtt_roles/records"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider.fetch_all_roles().await.unwrap_err();
        assert!(err.is_unavailable());
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_check_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
            .mount(&server)
            .await;

        tokio_test::assert_ok!(provider(&server).check_health().await);
    }

    #[tokio::test]
    async fn test_check_health_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        tokio_test::assert_err!(provider(&server).check_health().await);
    }

    #[test]
    fn test_endpoint_handles_base_path() {
        let config = HttpIdentityProviderConfig::new(Url::parse("http://pb.local/base/").unwrap());
        let provider = HttpIdentityProvider::new(config).unwrap();
        let url = provider.endpoint(&["api", "health"]).unwrap();
        assert_eq!(url.as_str(), "http://pb.local/base/api/health");

        let url = provider.endpoint(&["api", "records", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "http://pb.local/base/api/records/a%2Fb");
    }
}
