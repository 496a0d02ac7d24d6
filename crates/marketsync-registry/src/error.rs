//! Error types for providers and the registry

use thiserror::Error;

/// Errors raised by marketplace and carrier adapters
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing credential field '{0}'")]
    MissingCredential(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Operation not supported by {provider}: {operation}")]
    NotSupported { provider: String, operation: String },
}

impl ProviderError {
    pub fn not_supported(provider: &str, operation: &str) -> Self {
        Self::NotSupported { provider: provider.to_string(), operation: operation.to_string() }
    }

    /// Errors that may go away on the next run
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors caused by the integration's own configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::UnknownProvider(_)
                | ProviderError::MissingCredential(_)
                | ProviderError::InvalidCredentials(_)
                | ProviderError::InvalidSettings(_)
        )
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Registry-specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Marketplace provider '{0}' is not registered")]
    UnknownMarketplace(String),

    #[error("Carrier provider '{0}' is not registered")]
    UnknownCarrier(String),

    #[error("Provider '{0}' is registered twice")]
    DuplicateRegistration(String),

    #[error("Failed to construct provider '{provider}': {source}")]
    Construction {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

/// Registry result type
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: Some(3) }.is_transient());
        assert!(ProviderError::Api { status: 503, message: "down".into() }.is_transient());
        assert!(!ProviderError::Api { status: 400, message: "bad".into() }.is_transient());
        assert!(!ProviderError::MissingCredential("api_token".into()).is_transient());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(ProviderError::MissingCredential("client_id".into()).is_configuration());
        assert!(!ProviderError::Timeout("30s".into()).is_configuration());
    }
}
