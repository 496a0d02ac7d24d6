//! Credential and settings parsing shared by every adapter

use marketsync_registry::{ProviderError, ProviderResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

/// Parse a decrypted credential object, checking required fields first.
///
/// A required field is missing when absent, null, or a blank string.
pub fn parse_credentials<T: DeserializeOwned>(
    credentials: &JsonValue,
    required: &[&str],
) -> ProviderResult<T> {
    let object = credentials.as_object().ok_or_else(|| {
        ProviderError::InvalidCredentials("credentials must be a JSON object".to_string())
    })?;

    for field in required {
        let present = match object.get(*field) {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ProviderError::MissingCredential((*field).to_string()));
        }
    }

    serde_json::from_value(credentials.clone())
        .map_err(|e| ProviderError::InvalidCredentials(e.to_string()))
}

/// Per-integration settings understood by all adapters. Provider-specific
/// keys stay in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Overrides the production/sandbox API host
    pub api_base_url: Option<String>,
    /// Overrides the OAuth token endpoint
    pub token_url: Option<String>,
    pub sandbox: bool,
    pub page_size: Option<u32>,
    /// Pause between consecutive API calls inside one poll
    pub page_delay_ms: Option<u64>,
    /// Upper bound on pages read by adapters that cannot filter server side
    pub max_pages: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ProviderSettings {
    pub fn from_value(settings: &JsonValue) -> ProviderResult<Self> {
        if settings.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(settings.clone())
            .map_err(|e| ProviderError::InvalidSettings(e.to_string()))
    }

    /// Explicit override, else the sandbox or production host
    pub fn base_url(&self, production: &str, sandbox: &str) -> String {
        self.resolve(self.api_base_url.as_deref(), production, sandbox)
    }

    pub fn token_endpoint(&self, production: &str, sandbox: &str) -> String {
        self.resolve(self.token_url.as_deref(), production, sandbox)
    }

    /// Base URL for providers without a public default host
    pub fn required_base_url(&self) -> ProviderResult<String> {
        self.api_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::InvalidSettings("api_base_url is required".to_string()))
    }

    pub fn page_size_or(&self, default: u32) -> u32 {
        self.page_size.filter(|size| *size > 0).unwrap_or(default)
    }

    pub fn max_pages_or(&self, default: u32) -> u32 {
        self.max_pages.filter(|pages| *pages > 0).unwrap_or(default)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    fn resolve(&self, explicit: Option<&str>, production: &str, sandbox: &str) -> String {
        match explicit {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ if self.sandbox => sandbox.to_string(),
            _ => production.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct TokenCredentials {
        api_token: String,
        #[serde(default)]
        sandbox: bool,
    }

    #[test]
    fn test_missing_required_field() {
        let err = parse_credentials::<TokenCredentials>(&json!({"sandbox": true}), &["api_token"])
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::MissingCredential(f) if f == "api_token"));

        let err = parse_credentials::<TokenCredentials>(&json!({"api_token": "  "}), &["api_token"])
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::MissingCredential(_)));
    }

    #[test]
    fn test_parses_valid_credentials() {
        let creds: TokenCredentials =
            parse_credentials(&json!({"api_token": "abc", "extra": 1}), &["api_token"]).unwrap();
        assert_eq!(creds.api_token, "abc");
        assert!(!creds.sandbox);
    }

    #[test]
    fn test_non_object_credentials_rejected() {
        let err = parse_credentials::<TokenCredentials>(&json!("abc"), &["api_token"]).err().unwrap();
        assert!(matches!(err, ProviderError::InvalidCredentials(_)));
    }

    #[test]
    fn test_settings_base_url_resolution() {
        let settings = ProviderSettings::from_value(&json!({})).unwrap();
        assert_eq!(settings.base_url("https://prod", "https://sandbox"), "https://prod");

        let settings = ProviderSettings::from_value(&json!({"sandbox": true})).unwrap();
        assert_eq!(settings.base_url("https://prod", "https://sandbox"), "https://sandbox");

        let settings =
            ProviderSettings::from_value(&json!({"api_base_url": "http://127.0.0.1:9000/", "sandbox": true}))
                .unwrap();
        assert_eq!(settings.base_url("https://prod", "https://sandbox"), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_settings_extra_keys() {
        let settings =
            ProviderSettings::from_value(&json!({"marketplace_id": "A1C3SOZRARQ6R3", "page_size": 0}))
                .unwrap();
        assert_eq!(settings.extra_str("marketplace_id"), Some("A1C3SOZRARQ6R3"));
        assert_eq!(settings.page_size_or(50), 50);
        assert!(ProviderSettings::from_value(&JsonValue::Null).is_ok());
        assert!(settings.required_base_url().is_err());
    }
}
