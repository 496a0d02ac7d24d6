//! Shared HTTP plumbing for provider adapters

use marketsync_registry::{ProviderError, ProviderResult};
use reqwest::{header::RETRY_AFTER, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// Timeouts applied to the shared client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), connect_timeout: Duration::from_secs(10) }
    }
}

/// Build the client shared by every adapter instance
pub fn build_http_client(settings: &HttpSettings) -> ProviderResult<Client> {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("marketsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))
}

/// Thin wrapper binding a client to one provider's base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    provider: &'static str,
}

impl ApiClient {
    pub fn new(http: Client, base_url: impl Into<String>, provider: &'static str) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url, provider }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Send and decode a JSON body
    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Decode(format!("{}: {}", self.provider, e)))
    }

    /// Send and return the raw body
    pub async fn bytes(&self, request: RequestBuilder) -> ProviderResult<Vec<u8>> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }

    /// Send and discard the body
    pub async fn send(&self, request: RequestBuilder) -> ProviderResult<()> {
        self.execute(request).await.map(|_| ())
    }

    async fn execute(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request.send().await.map_err(map_transport_error)?;
        check_status(response).await
    }
}

pub fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_decode() {
        ProviderError::Decode(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Turn non-2xx responses into typed errors
pub async fn check_status(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = truncate(&body, MAX_ERROR_BODY);

    Err(match status.as_u16() {
        401 | 403 => ProviderError::Authentication(format!("HTTP {}: {}", status.as_u16(), message)),
        429 => ProviderError::RateLimited { retry_after_secs },
        code => ProviderError::Api { status: code, message },
    })
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
