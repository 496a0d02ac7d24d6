//! OAuth2 grants used by the adapters

use crate::http::map_transport_error;
use chrono::{DateTime, Duration, Utc};
use marketsync_registry::{ProviderError, ProviderResult, RefreshedTokens};
use oauth2::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse,
    RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::{Client, Method};
use std::future::Future;
use tokio::sync::Mutex;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are renewed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Where the client authenticates on the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    BasicHeader,
    RequestBody,
}

/// Token endpoint settings. Grants go through `http`, the adapter's shared
/// client, so they get the configured timeouts.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub http: Client,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub client_auth: ClientAuth,
}

impl OAuthClientConfig {
    pub fn new(
        http: Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        client_auth: ClientAuth,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            client_auth,
        }
    }

    fn client(&self) -> ProviderResult<BasicClient> {
        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|e| ProviderError::InvalidSettings(format!("Invalid token URL: {}", e)))?;
        // Only token-endpoint grants are used; the authorization URL is never visited.
        let auth_url = AuthUrl::new(self.token_url.clone())
            .map_err(|e| ProviderError::InvalidSettings(format!("Invalid token URL: {}", e)))?;
        let auth_type = match self.client_auth {
            ClientAuth::BasicHeader => AuthType::BasicAuth,
            ClientAuth::RequestBody => AuthType::RequestBody,
        };

        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(auth_type))
    }
}

/// Refresh-token grant
pub async fn refresh_access_token(
    config: &OAuthClientConfig,
    refresh_token: &str,
) -> ProviderResult<RefreshedTokens> {
    let token = config
        .client()?
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(|request| send_token_request(&config.http, request))
        .await
        .map_err(map_token_error)?;

    Ok(RefreshedTokens {
        access_token: token.access_token().secret().to_string(),
        refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
        expires_at: expiry_from(token.expires_in()),
    })
}

/// Client-credentials grant
pub async fn client_credentials_token(
    config: &OAuthClientConfig,
    scopes: &[&str],
) -> ProviderResult<RefreshedTokens> {
    let client = config.client()?;
    let mut request = client.exchange_client_credentials();
    for scope in scopes {
        request = request.add_scope(Scope::new((*scope).to_string()));
    }

    let token = request
        .request_async(|request| send_token_request(&config.http, request))
        .await
        .map_err(map_token_error)?;

    Ok(RefreshedTokens {
        access_token: token.access_token().secret().to_string(),
        refresh_token: None,
        expires_at: expiry_from(token.expires_in()),
    })
}

/// Runs an oauth2 token request on the shared reqwest client
async fn send_token_request(
    client: &Client,
    request: HttpRequest,
) -> Result<HttpResponse, ProviderError> {
    let method = Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    let mut builder = client.request(method, request.url.as_str()).body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await.map_err(map_transport_error)?;
    let status_code = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    let body = response.bytes().await.map_err(map_transport_error)?.to_vec();

    Ok(HttpResponse { status_code, headers, body })
}

fn expiry_from(expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let secs = expires_in
        .map(|d| d.as_secs() as i64)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Utc::now() + Duration::seconds(secs)
}

fn map_token_error<T>(err: RequestTokenError<ProviderError, T>) -> ProviderError
where
    T: oauth2::ErrorResponse + std::fmt::Display + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            ProviderError::Authentication(format!("Token endpoint rejected grant: {}", response))
        }
        RequestTokenError::Request(e) => e,
        RequestTokenError::Parse(e, _) => ProviderError::Decode(e.to_string()),
        RequestTokenError::Other(msg) => ProviderError::Authentication(msg),
    }
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Access token cached for the lifetime of one adapter instance
#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token while fresh, otherwise the result of `fetch`
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> ProviderResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<RefreshedTokens>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let tokens = fetch().await?;
        *slot = Some(CachedToken {
            access_token: tokens.access_token.clone(),
            expires_at: tokens.expires_at,
        });
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_refresh_grant_against_mock_endpoint() {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=refresh_token")
                    .body_contains("refresh_token=old-refresh");
                then.status(200).json_body(json!({
                    "access_token": "new-access",
                    "refresh_token": "new-refresh",
                    "token_type": "bearer",
                    "expires_in": 43199
                }));
            })
            .await;

        let config = OAuthClientConfig::new(
            Client::new(),
            "cid",
            "secret",
            server.url("/token"),
            ClientAuth::BasicHeader,
        );
        let tokens = refresh_access_token(&config, "old-refresh").await.unwrap();

        token_mock.assert_async().await;
        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("new-refresh"));
        assert!(tokens.expires_at > Utc::now() + Duration::hours(11));
    }

    #[tokio::test]
    async fn test_rejected_grant_is_authentication_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).json_body(json!({"error": "invalid_grant"}));
            })
            .await;

        let config = OAuthClientConfig::new(
            Client::new(),
            "cid",
            "secret",
            server.url("/token"),
            ClientAuth::RequestBody,
        );
        let err = refresh_access_token(&config, "stale").await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_grant_uses_shared_client_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .delay(std::time::Duration::from_millis(500))
                    .json_body(json!({"access_token": "late", "token_type": "bearer"}));
            })
            .await;

        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let config = OAuthClientConfig::new(
            http,
            "cid",
            "secret",
            server.url("/token"),
            ClientAuth::RequestBody,
        );
        let err = client_credentials_token(&config, &["read"]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_client_credentials_grant_sends_scopes() {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body_contains("grant_type=client_credentials")
                    .body_contains("scope=read");
                then.status(200).json_body(json!({
                    "access_token": "cc-access",
                    "token_type": "bearer",
                    "expires_in": 600
                }));
            })
            .await;

        let config = OAuthClientConfig::new(
            Client::new(),
            "cid",
            "secret",
            server.url("/token"),
            ClientAuth::RequestBody,
        );
        let tokens = client_credentials_token(&config, &["read"]).await.unwrap();

        token_mock.assert_async().await;
        assert_eq!(tokens.access_token, "cc-access");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_token_cache_reuses_fresh_token() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let token = cache
                .get_or_fetch(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RefreshedTokens {
                        access_token: "cached".to_string(),
                        refresh_token: None,
                        expires_at: Utc::now() + Duration::hours(1),
                    })
                })
                .await
                .unwrap();
            assert_eq!(token, "cached");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_cache_refetches_near_expiry() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..2 {
            cache
                .get_or_fetch(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RefreshedTokens {
                        access_token: "short".to_string(),
                        refresh_token: None,
                        expires_at: Utc::now() + Duration::seconds(10),
                    })
                })
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
