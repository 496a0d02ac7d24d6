use marketsync_core::CoreError;
use marketsync_registry::{ProviderError, RegistryError};
use marketsync_store::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] CoreError),

    #[error("Invalid credential payload: {0}")]
    Credentials(String),

    #[error("Task cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors caused by the integration's own configuration rather than the remote side
    pub fn is_configuration(&self) -> bool {
        match self {
            SyncError::Vault(_) | SyncError::Credentials(_) => true,
            SyncError::Registry(RegistryError::Construction { source, .. }) => source.is_configuration(),
            SyncError::Registry(_) => true,
            SyncError::Provider(err) => err.is_configuration(),
            _ => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
