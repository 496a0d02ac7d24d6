use crate::error::{SyncError, SyncResult};
use marketsync_core::{AdminStore, TenantStore};
use marketsync_registry::ProviderRegistry;
use marketsync_store::CredentialVault;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles every sync task works against
#[derive(Clone)]
pub struct SyncContext {
    pub registry: Arc<ProviderRegistry>,
    pub vault: CredentialVault,
    pub admin: Arc<dyn AdminStore>,
    pub tenants: Arc<dyn TenantStore>,
}

impl SyncContext {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        vault: CredentialVault,
        admin: Arc<dyn AdminStore>,
        tenants: Arc<dyn TenantStore>,
    ) -> Self {
        Self { registry, vault, admin, tenants }
    }

    pub(crate) fn decrypt_credentials(&self, blob: &str) -> SyncResult<JsonValue> {
        Ok(self.vault.decrypt_json(blob)?)
    }
}

/// Await `future` unless `cancel` fires first
pub(crate) async fn cancellable<F, T, E>(cancel: &CancellationToken, future: F) -> SyncResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<SyncError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = future => result.map_err(Into::into),
    }
}
