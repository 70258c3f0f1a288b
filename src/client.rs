//! HTTP API client for the Passbolt REST API.
//!
//! Handles all low-level HTTP communication with a Passbolt server including:
//! - Request building with GPGAuth cookie authentication and CSRF header
//! - Query parameter construction for Passbolt's `contain[]` and `filter[]` system
//! - Response envelope unwrapping (`ApiResponse<T>`)
//! - Error mapping from HTTP status codes to `PassboltError`

use crate::types::*;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Passbolt API client.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct ApiClient {
    /// HTTP client with the session cookie jar.
    client: Client,
    /// Server base URL.
    base_url: String,
    /// Current session state.
    session: SessionState,
    /// Whether TLS verification is enabled.
    verify_tls: bool,
    /// Request timeout.
    timeout: Duration,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(base_url: &str, verify_tls: bool, timeout_secs: u64) -> Result<Self, PassboltError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .user_agent(concat!("passbolt-ensure/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(timeout)
            .build()
            .map_err(|e| PassboltError::network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: SessionState::default(),
            verify_tls,
            timeout,
        })
    }

    /// Create from a `Config`.
    pub fn from_config(config: &Config) -> Result<Self, PassboltError> {
        Self::new(
            &config.server_url,
            config.verify_tls,
            config.request_timeout_secs,
        )
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get a reference to the current session.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Get a mutable reference to the session.
    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Replace the session state.
    pub fn set_session(&mut self, session: SessionState) {
        self.session = session;
    }

    /// Check if authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }

    // ── Request building ────────────────────────────────────────────

    /// Build a URL from a path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create an authenticated request builder. The session cookie rides in
    /// the client's jar; only the CSRF header is added here.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        // Method and path only; bodies may carry secret material.
        debug!("{} {}", method, path);
        let url = self.url(path);
        let mut builder = self.client.request(method, &url);

        if let Some(ref csrf) = self.session.csrf_token {
            builder = builder.header("X-CSRF-Token", csrf.as_str());
        }

        builder
    }

    // ── Response handling ───────────────────────────────────────────

    /// Send a request and decode the standard Passbolt envelope.
    async fn execute<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<ApiResponse<T>, PassboltError> {
        let response = self.execute_raw(builder).await?;
        let status = response.status();
        let url = response.url().to_string();
        let text = response
            .text()
            .await
            .map_err(|e| PassboltError::parse(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(self.error_from_status(status, &text, Some(&url)));
        }
        // An HTML error page behind a 200 lands here as a parse error.
        serde_json::from_str(&text).map_err(|e| {
            PassboltError::parse(format!(
                "Failed to parse response JSON: {} (url: {})",
                e, url
            ))
        })
    }

    /// Send a request returning the response directly (for auth flows).
    async fn execute_raw(&self, builder: RequestBuilder) -> Result<Response, PassboltError> {
        builder
            .send()
            .await
            .map_err(|e| PassboltError::network(format!("Request failed: {}", e)))
    }

    /// Map a non-success HTTP status to a `PassboltError`. The URL, when
    /// known, rides in the message so a failing call can be pinpointed.
    fn error_from_status(&self, status: StatusCode, body: &str, url: Option<&str>) -> PassboltError {
        let detail = match url {
            Some(u) if body.is_empty() => u.to_string(),
            Some(u) => format!("{} ({})", body, u),
            None => body.to_string(),
        };
        match status {
            StatusCode::BAD_REQUEST => {
                PassboltError::bad_request(format!("Bad request: {}", detail))
            }
            StatusCode::UNAUTHORIZED => {
                PassboltError::session_expired("Authentication required or session expired")
            }
            StatusCode::FORBIDDEN => PassboltError::forbidden(format!("Access denied: {}", detail)),
            StatusCode::NOT_FOUND => PassboltError::not_found(format!("Not found: {}", detail)),
            StatusCode::CONFLICT => {
                PassboltError::conflict("Entity was modified by another user")
            }
            StatusCode::TOO_MANY_REQUESTS => PassboltError::rate_limited("Rate limited by server"),
            s if s.is_server_error() => {
                PassboltError::server(format!("Server error {}: {}", s.as_u16(), detail))
            }
            _ => PassboltError::api(format!(
                "Unexpected status {}: {}",
                status.as_u16(),
                detail
            )),
        }
    }

    /// Shared plumbing for the JSON-body verbs.
    async fn send_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, PassboltError> {
        self.execute(self.request(method, path).json(body)).await
    }

    // ── Convenience HTTP methods ────────────────────────────────────

    /// GET request.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, PassboltError> {
        self.execute(self.request(Method::GET, path)).await
    }

    /// GET request with query parameters.
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &std::collections::HashMap<String, String>,
    ) -> Result<ApiResponse<T>, PassboltError> {
        let pairs: Vec<(String, String)> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.execute(self.request(Method::GET, path).query(&pairs))
            .await
    }

    /// GET returning the raw response (for cookie inspection).
    pub async fn get_raw(&self, path: &str) -> Result<Response, PassboltError> {
        self.execute_raw(self.request(Method::GET, path)).await
    }

    /// POST request with JSON body.
    pub async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, PassboltError> {
        self.send_json(Method::POST, path, body).await
    }

    /// PUT request with JSON body.
    pub async fn put<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, PassboltError> {
        self.send_json(Method::PUT, path, body).await
    }

    /// DELETE request, discarding the envelope (its body is null).
    pub async fn delete(&self, path: &str) -> Result<(), PassboltError> {
        let response = self.execute_raw(self.request(Method::DELETE, path)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(self.error_from_status(status, &text, None))
    }

    // ── Unauthenticated requests (for auth flows) ───────────────────

    /// GET request without auth decoration.
    pub async fn get_unauthenticated<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, PassboltError> {
        debug!("GET {} (unauthenticated)", path);
        let url = self.url(path);
        self.execute(self.client.get(&url)).await
    }

    /// POST request without auth decoration, returning the raw response.
    pub async fn post_unauthenticated_raw<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, PassboltError> {
        debug!("POST {} (unauthenticated)", path);
        let url = self.url(path);
        self.execute_raw(self.client.post(&url).json(body)).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ApiClient::new("https://example.com", true, 30);
        assert!(client.is_ok());
        let c = client.unwrap();
        assert_eq!(c.base_url(), "https://example.com");
        assert!(!c.is_authenticated());
    }

    #[test]
    fn test_client_from_config() {
        let config = Config {
            server_url: "https://passbolt.test/".into(),
            ..Default::default()
        };
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "https://passbolt.test");
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let client = ApiClient::new("https://example.com/", true, 30).unwrap();
        assert_eq!(client.base_url(), "https://example.com");
    }

    #[test]
    fn test_session_management() {
        let mut client = ApiClient::new("https://example.com", true, 30).unwrap();
        assert!(!client.is_authenticated());

        client.session_mut().authenticated = true;
        client.session_mut().csrf_token = Some("csrf-abc".into());

        assert!(client.is_authenticated());
        assert_eq!(client.session().csrf_token.as_deref(), Some("csrf-abc"));
    }

    #[test]
    fn test_error_from_status() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::NOT_FOUND, "missing", None);
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_error_from_status_includes_url() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(
            StatusCode::NOT_FOUND,
            "missing",
            Some("https://example.com/folders/x.json"),
        );
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
        assert!(err.message.contains("/folders/x.json"));

        // An empty body still yields a usable message.
        let err = client.error_from_status(StatusCode::FORBIDDEN, "", Some("https://x/y.json"));
        assert!(err.message.contains("y.json"));
    }

    #[test]
    fn test_error_from_status_unauthorized() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::UNAUTHORIZED, "", None);
        assert_eq!(err.kind, PassboltErrorKind::SessionExpired);
    }

    #[test]
    fn test_error_from_status_forbidden() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::FORBIDDEN, "denied", None);
        assert_eq!(err.kind, PassboltErrorKind::Forbidden);
    }

    #[test]
    fn test_error_from_status_conflict() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::CONFLICT, "conflict", None);
        assert_eq!(err.kind, PassboltErrorKind::Conflict);
    }

    #[test]
    fn test_error_from_status_server_error() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::BAD_GATEWAY, "upstream down", None);
        assert_eq!(err.kind, PassboltErrorKind::ServerError);
        assert!(err.message.contains("502"));
    }

    #[test]
    fn test_error_from_status_rate_limited() {
        let client = ApiClient::new("https://example.com", true, 30).unwrap();
        let err = client.error_from_status(StatusCode::TOO_MANY_REQUESTS, "", None);
        assert_eq!(err.kind, PassboltErrorKind::RateLimited);
    }
}
