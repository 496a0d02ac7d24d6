//! Error types for the CLI

use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] marketsync_config::ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] marketsync_registry::RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] marketsync_core::CoreError),

    #[error("Vault error: {0}")]
    Vault(#[from] marketsync_store::VaultError),

    #[error("Sync error: {0}")]
    Sync(#[from] marketsync_sync::SyncError),

    #[error("Provider error: {0}")]
    Provider(#[from] marketsync_registry::ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown marketplace '{0}'. Run 'marketsync providers' to list them.")]
    UnknownProvider(String),

    #[error("General error: {0}")]
    General(String),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::General(format!("{:#}", err))
    }
}

impl From<marketsync_store::StoreError> for CliError {
    fn from(err: marketsync_store::StoreError) -> Self {
        Self::Store(err.into())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
