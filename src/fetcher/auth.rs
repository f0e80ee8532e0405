//! Authentication
//!
//! The fetcher only needs something that hands out a valid token and can be
//! told to forget it after a 401. Two providers exist: a static SSWS API token
//! and an OAuth 2.0 client-credentials flow with a cached bearer token.

use crate::config::AuthConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before they expire
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Authentication errors
///
/// Everything except [`AuthError::TokenUnavailable`] is fatal to the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// No usable credentials configured
    #[error("no authentication credentials available (API token or OAuth client credentials)")]
    MissingCredentials,

    /// The API kept rejecting the token after a refresh
    #[error("credentials rejected with HTTP {status} after token refresh")]
    Rejected {
        /// Status returned by the API
        status: u16,
    },

    /// Token endpoint refused the credentials
    #[error("token request failed: {0}")]
    TokenRequest(String),

    /// Token endpoint unreachable, throttling or failing with 5xx
    #[error("token endpoint unavailable: {message}")]
    TokenUnavailable {
        /// Status returned by the token endpoint, if it answered
        status: Option<u16>,
        /// Error text
        message: String,
    },

    /// Token endpoint answered with something unusable
    #[error("invalid token response: {0}")]
    InvalidTokenResponse(String),
}

impl AuthError {
    /// Whether retrying the token request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::TokenUnavailable { .. })
    }
}

/// Authorization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Okta API token
    Ssws,
    /// OAuth 2.0 access token
    Bearer,
}

/// A token ready to be placed in the `Authorization` header
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    scheme: AuthScheme,
    value: String,
}

impl AuthToken {
    /// SSWS token
    pub fn ssws(value: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Ssws,
            value: value.into(),
        }
    }

    /// Bearer token
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            value: value.into(),
        }
    }

    /// Scheme of this token
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        match self.scheme {
            AuthScheme::Ssws => format!("SSWS {}", self.value),
            AuthScheme::Bearer => format!("Bearer {}", self.value),
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Source of API tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a valid token, fetching one if the cache is empty or stale
    async fn token(&self) -> Result<AuthToken, AuthError>;

    /// Drop any cached token so the next call fetches a fresh one
    fn invalidate(&self);
}

/// Build the provider selected by configuration; the API token wins
pub fn provider_from_config(
    config: &AuthConfig,
    base_url: &str,
    client: Client,
) -> Result<Arc<dyn TokenProvider>, AuthError> {
    if let Some(token) = config.api_token.as_deref().filter(|t| !t.is_empty()) {
        debug!("Using SSWS API token authentication");
        return Ok(Arc::new(StaticToken::new(token)));
    }
    match (&config.client_id, &config.client_secret) {
        (Some(id), Some(secret)) => {
            debug!("Using OAuth client-credentials authentication");
            Ok(Arc::new(OAuthClientCredentials::new(
                client,
                base_url,
                id.clone(),
                secret.clone(),
                config.scopes.clone(),
            )))
        }
        _ => Err(AuthError::MissingCredentials),
    }
}

/// Fixed SSWS API token
#[derive(Debug)]
pub struct StaticToken {
    token: AuthToken,
}

impl StaticToken {
    /// Wrap an API token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AuthToken::ssws(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        Ok(self.token.clone())
    }

    fn invalidate(&self) {}
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AuthToken,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth 2.0 client-credentials flow against `/oauth2/v1/token`
pub struct OAuthClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    cache: Mutex<Option<CachedToken>>,
    refresh: tokio::sync::Mutex<()>,
}

impl fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthClientCredentials {
    /// Create a provider for the tenant at `base_url`
    pub fn new(
        client: Client,
        base_url: &str,
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}/oauth2/v1/token", base_url.trim_end_matches('/')),
            client_id,
            client_secret,
            scopes,
            cache: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<AuthToken> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .as_ref()
            .filter(|c| Instant::now() < c.refresh_at)
            .map(|c| c.token.clone())
    }

    async fn fetch(&self) -> Result<CachedToken, AuthError> {
        info!(token_url = %self.token_url, "Requesting OAuth access token");
        let scope = self.scopes.join(" ");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::TokenUnavailable {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {body}");
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(status = status.as_u16(), "Token endpoint unavailable");
                return Err(AuthError::TokenUnavailable {
                    status: Some(status.as_u16()),
                    message,
                });
            }
            return Err(AuthError::TokenRequest(message));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidTokenResponse(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidTokenResponse("empty access_token".to_string()));
        }

        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        let usable = lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in_secs = lifetime.as_secs(), "OAuth access token obtained");
        Ok(CachedToken {
            token: AuthToken::bearer(parsed.access_token),
            refresh_at: Instant::now() + usable,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthClientCredentials {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        // One refresh at a time; later callers reuse the fresh token.
        let _guard = self.refresh.lock().await;
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *self.cache.lock().unwrap_or_else(|p| p.into_inner()) = Some(fresh);
        Ok(token)
    }

    fn invalidate(&self) {
        debug!("Invalidating cached OAuth token");
        *self.cache.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_header_values() {
        assert_eq!(AuthToken::ssws("abc").header_value(), "SSWS abc");
        assert_eq!(AuthToken::bearer("xyz").header_value(), "Bearer xyz");
        assert!(!format!("{:?}", AuthToken::ssws("secret")).contains("secret"));
    }

    #[test]
    fn test_provider_selection() {
        let mut config = AuthConfig::default();
        assert!(matches!(
            provider_from_config(&config, "https://x", Client::new()),
            Err(AuthError::MissingCredentials)
        ));

        config.client_id = Some("id".to_string());
        config.client_secret = Some("secret".to_string());
        assert!(provider_from_config(&config, "https://x", Client::new()).is_ok());
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("t0k3n");
        provider.invalidate();
        assert_eq!(provider.token().await.unwrap().header_value(), "SSWS t0k3n");
    }

    #[tokio::test]
    async fn test_oauth_token_cached_until_invalidated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = OAuthClientCredentials::new(
            Client::new(),
            &server.uri(),
            "id".to_string(),
            "secret".to_string(),
            vec!["okta.governance.access.read".to_string()],
        );

        assert_eq!(provider.token().await.unwrap(), AuthToken::bearer("fresh"));
        assert_eq!(provider.token().await.unwrap(), AuthToken::bearer("fresh"));
        provider.invalidate();
        assert_eq!(provider.token().await.unwrap(), AuthToken::bearer("fresh"));
    }

    #[tokio::test]
    async fn test_oauth_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let provider = OAuthClientCredentials::new(
            Client::new(),
            &server.uri(),
            "id".to_string(),
            "bad".to_string(),
            Vec::new(),
        );
        let err = provider.token().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, AuthError::TokenRequest(msg) if msg.contains("invalid_client")));
    }

    #[tokio::test]
    async fn test_oauth_token_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "second",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let provider = OAuthClientCredentials::new(
            Client::new(),
            &server.uri(),
            "id".to_string(),
            "secret".to_string(),
            Vec::new(),
        );
        let err = provider.token().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, AuthError::TokenUnavailable { status: Some(503), .. }));
        assert_eq!(provider.token().await.unwrap(), AuthToken::bearer("second"));
    }
}
